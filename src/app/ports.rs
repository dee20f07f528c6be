use crate::types::Selectors;
use async_trait::async_trait;

/// External data source: web API, bulk file mirror, or a test double.
///
/// Implementations return the raw payload bytes; decoding and validation
/// happen in the fetcher so that nothing malformed reaches the cache.
#[async_trait]
pub trait DataSourcePort: Send + Sync {
    async fn get(&self, identifier: &str, selectors: &Selectors) -> Result<Vec<u8>, String>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
