//! Resource fetcher: cache-first retrieval with per-key fetch coalescing.

pub mod cache;
pub mod decode;
pub mod fingerprint;

pub use cache::{CacheEntry, CacheLayer, CacheMeta, CacheStore};
pub use fingerprint::{compute_fingerprint, Fingerprint};

use crate::app::ports::DataSourcePort;
use crate::config::{PipelineConfig, RecordSchema};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::types::{RawRecord, RetrievalRequest, Selectors};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Outcome of one external fetch, shared by every caller that joined it.
/// Errors keep only the cause; each caller rebuilds its own `Retrieval`.
type Flight = OnceCell<std::result::Result<Arc<CacheEntry>, String>>;
type InFlight = Arc<Mutex<HashMap<Fingerprint, Arc<Flight>>>>;

/// A caller's membership in the in-flight fetch for one fingerprint.
/// Dropping it, including when the caller's future is cancelled, prunes the
/// map entry once no other caller holds the same flight.
struct FlightHandle {
    in_flight: InFlight,
    fingerprint: Fingerprint,
    flight: Arc<Flight>,
}

impl FlightHandle {
    fn join(in_flight: &InFlight, fingerprint: &Fingerprint) -> Self {
        let flight = {
            let mut map = in_flight.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        Self {
            in_flight: in_flight.clone(),
            fingerprint: fingerprint.clone(),
            flight,
        }
    }

    /// Detach a finished flight so later callers start a new one
    fn retire(&self) {
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(&self.fingerprint).map_or(false, |f| Arc::ptr_eq(f, &self.flight)) {
            map.remove(&self.fingerprint);
        }
    }
}

impl Drop for FlightHandle {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in this handle
        let last = map
            .get(&self.fingerprint)
            .map_or(false, |f| Arc::ptr_eq(f, &self.flight) && Arc::strong_count(f) <= 2);
        if last {
            map.remove(&self.fingerprint);
        }
    }
}

fn into_cause(err: PipelineError) -> String {
    match err {
        PipelineError::Retrieval { cause, .. } => cause,
        other => other.to_string(),
    }
}

pub struct Fetcher {
    source: Arc<dyn DataSourcePort>,
    cache: CacheStore,
    schema: RecordSchema,
    in_flight: InFlight,
}

impl Fetcher {
    pub fn new(source: Arc<dyn DataSourcePort>, config: &PipelineConfig) -> Self {
        Self {
            source,
            cache: CacheStore::new(config.cache_dir.clone()),
            schema: config.schema.clone(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache.root()
    }

    /// Move the cache. Handles held in memory are dropped; on-disk entries
    /// under the previous directory remain.
    pub fn set_cache_dir(&self, dir: impl Into<PathBuf>) {
        self.cache.set_root(dir);
    }

    pub fn cached_entries(&self) -> Result<Vec<CacheMeta>> {
        self.cache.list()
    }

    /// Remove cached entries for one identifier, or all when `None`
    pub fn remove_cached(&self, identifier: Option<&str>) -> Result<usize> {
        let removed = self.cache.remove(identifier)?;
        info!(identifier = ?identifier, removed, "Removed cached entries");
        Ok(removed)
    }

    /// Retrieve decoded records for `request`, narrowed to its selectors
    pub async fn fetch(&self, request: &RetrievalRequest) -> Result<Vec<RawRecord>> {
        let entry = self.fetch_entry(request).await?;
        let records = decode::decode_payload(&request.identifier, &entry.payload)
            .map_err(|cause| PipelineError::retrieval(&request.identifier, cause))?;
        Ok(decode::apply_selectors(records, &request.selectors, &self.schema))
    }

    /// Retrieve the cached payload for `request`, calling the source only on
    /// a miss or forced refresh.
    ///
    /// At most one external call per fingerprint is outstanding at any time.
    /// Callers that arrive while it runs share its outcome, failures
    /// included; nothing is retried on their behalf.
    pub async fn fetch_entry(&self, request: &RetrievalRequest) -> Result<Arc<CacheEntry>> {
        let fingerprint = compute_fingerprint(&request.identifier, &request.selectors);
        let requested_at = Utc::now();

        if !request.refresh {
            if let Some((entry, layer)) = self.cache.lookup(&fingerprint)? {
                metrics::fetch::cache_hit(layer.as_str());
                debug!(identifier = %request.identifier, layer = layer.as_str(), "Cache hit");
                return Ok(entry);
            }
        }

        loop {
            let handle = FlightHandle::join(&self.in_flight, &fingerprint);
            let mut led = false;
            let outcome = handle
                .flight
                .get_or_init(|| {
                    led = true;
                    self.lead(request, requested_at, &handle)
                })
                .await
                .clone();
            let entry = outcome.map_err(|cause| PipelineError::retrieval(&request.identifier, cause))?;

            // A joined flight may have only re-read an entry older than this refresh
            if request.refresh && entry.fetched_at < requested_at {
                continue;
            }
            if !led {
                metrics::fetch::coalesced();
                debug!(identifier = %request.identifier, "Reusing result of concurrent fetch");
            }
            return Ok(entry);
        }
    }

    async fn lead(
        &self,
        request: &RetrievalRequest,
        requested_at: DateTime<Utc>,
        handle: &FlightHandle,
    ) -> std::result::Result<Arc<CacheEntry>, String> {
        let outcome = self.resolve(request, requested_at, &handle.fingerprint).await;
        handle.retire();
        outcome.map_err(into_cause)
    }

    async fn resolve(
        &self,
        request: &RetrievalRequest,
        requested_at: DateTime<Utc>,
        fingerprint: &Fingerprint,
    ) -> Result<Arc<CacheEntry>> {
        // Someone may have filled the cache since the fast-path check
        if let Some((entry, _)) = self.cache.lookup(fingerprint)? {
            if !request.refresh || entry.fetched_at >= requested_at {
                return Ok(entry);
            }
        }
        metrics::fetch::cache_miss();
        self.fetch_external(request, fingerprint.clone()).await
    }

    /// Selectors as sent upstream: a field projection always asks for the
    /// scale column too, or values would reach the normalizer unscaled.
    fn upstream_selectors(&self, selectors: &Selectors) -> Selectors {
        let mut upstream = selectors.clone();
        if !upstream.fields.is_empty() && !upstream.fields.contains(&self.schema.scale_column) {
            upstream.fields.push(self.schema.scale_column.clone());
        }
        upstream
    }

    async fn fetch_external(&self, request: &RetrievalRequest, fingerprint: Fingerprint) -> Result<Arc<CacheEntry>> {
        let identifier = &request.identifier;
        info!(identifier = %identifier, source = self.source.name(), refresh = request.refresh, "Fetching from source");
        metrics::fetch::external_call(identifier);
        let started = Instant::now();

        let selectors = self.upstream_selectors(&request.selectors);
        let payload = match self.source.get(identifier, &selectors).await {
            Ok(p) => p,
            Err(cause) => {
                metrics::fetch::error(identifier);
                warn!(identifier = %identifier, cause = %cause, "Source request failed");
                return Err(PipelineError::retrieval(identifier, cause));
            }
        };

        // Validate before caching so a malformed payload never lands on disk
        if let Err(cause) = decode::decode_payload(identifier, &payload) {
            metrics::fetch::error(identifier);
            warn!(identifier = %identifier, cause = %cause, "Rejected payload");
            return Err(PipelineError::retrieval(identifier, cause));
        }

        metrics::fetch::payload_bytes(payload.len());
        metrics::fetch::duration(started.elapsed().as_secs_f64());

        self.cache.put(CacheEntry {
            identifier: identifier.clone(),
            fingerprint,
            fetched_at: Utc::now(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingSource {
        calls: AtomicUsize,
        payload: &'static str,
    }

    #[async_trait]
    impl DataSourcePort for CountingSource {
        async fn get(&self, _identifier: &str, _selectors: &Selectors) -> std::result::Result<Vec<u8>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.as_bytes().to_vec())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn fetcher(dir: &TempDir, payload: &'static str) -> (Fetcher, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            payload,
        });
        let config = PipelineConfig {
            cache_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        (Fetcher::new(source.clone(), &config), source)
    }

    struct FailingSource;

    #[async_trait]
    impl DataSourcePort for FailingSource {
        async fn get(&self, _identifier: &str, _selectors: &Selectors) -> std::result::Result<Vec<u8>, String> {
            Err("connection refused".to_string())
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn fetcher_failing(dir: &TempDir) -> (Fetcher, Arc<FailingSource>) {
        let source = Arc::new(FailingSource);
        let config = PipelineConfig {
            cache_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        (Fetcher::new(source.clone(), &config), source)
    }

    #[tokio::test]
    async fn test_refresh_bypasses_cache() {
        let dir = TempDir::new().unwrap();
        let (fetcher, source) = fetcher(&dir, r#"[{"VALUE": 1}]"#);

        let request = RetrievalRequest::new("T1");
        fetcher.fetch(&request).await.unwrap();
        fetcher.fetch(&request).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        fetcher.fetch(&request.clone().refreshed()).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_not_cached() {
        let dir = TempDir::new().unwrap();
        let (fetcher, source) = fetcher(&dir, "<html>oops</html>");

        let request = RetrievalRequest::new("T1");
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Retrieval { ref identifier, .. } if identifier == "T1"));
        assert!(fetcher.cached_entries().unwrap().is_empty());

        // Not cached, so the next call goes to the source again
        let _ = fetcher.fetch(&request).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_in_flight_map_is_pruned() {
        let dir = TempDir::new().unwrap();
        let (fetcher, _) = fetcher(&dir, "[]");
        fetcher.fetch(&RetrievalRequest::new("T1")).await.unwrap();
        assert!(fetcher.in_flight.lock().unwrap().is_empty());

        let (failing, _) = fetcher_failing(&dir);
        assert!(failing.fetch(&RetrievalRequest::new("T2")).await.is_err());
        assert!(failing.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_in_flight_entry() {
        let dir = TempDir::new().unwrap();
        let (fetcher, _) = fetcher(&dir, "[]");
        let fp = compute_fingerprint("T1", &Selectors::default());

        // Leader still running: a waiter joins and is then dropped
        let leader = FlightHandle::join(&fetcher.in_flight, &fp);
        let waiter = FlightHandle::join(&fetcher.in_flight, &fp);
        drop(leader);
        assert_eq!(fetcher.in_flight.lock().unwrap().len(), 1);
        drop(waiter);
        assert!(fetcher.in_flight.lock().unwrap().is_empty());
    }

    struct RecordingSource {
        seen: Mutex<Vec<Selectors>>,
    }

    #[async_trait]
    impl DataSourcePort for RecordingSource {
        async fn get(&self, _identifier: &str, selectors: &Selectors) -> std::result::Result<Vec<u8>, String> {
            self.seen.lock().unwrap().push(selectors.clone());
            Ok(br#"[{"GEO": "Canada", "SCALAR_FACTOR": "thousands", "VALUE": 42}]"#.to_vec())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_field_projection_requests_scale_column_upstream() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(RecordingSource {
            seen: Mutex::new(Vec::new()),
        });
        let config = PipelineConfig {
            cache_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let fetcher = Fetcher::new(source.clone(), &config);

        let request = RetrievalRequest::new("T1").with_fields(["GEO", "VALUE"]);
        let records = fetcher.fetch(&request).await.unwrap();
        assert_eq!(source.seen.lock().unwrap()[0].fields, vec!["GEO", "VALUE", "SCALAR_FACTOR"]);
        assert!(records[0].get("SCALAR_FACTOR").is_some());

        // The caller's own selectors and cache key are unchanged
        assert_eq!(request.selectors.fields, vec!["GEO", "VALUE"]);
        let unprojected = fetcher.upstream_selectors(&Selectors::default());
        assert!(unprojected.fields.is_empty());
    }

    #[tokio::test]
    async fn test_records_carry_source_identifier() {
        let dir = TempDir::new().unwrap();
        let (fetcher, _) = fetcher(&dir, r#"{"records": [{"GEO": "Canada", "VALUE": 3}]}"#);
        let records = fetcher.fetch(&RetrievalRequest::new("T9")).await.unwrap();
        assert_eq!(records[0].source.as_deref(), Some("T9"));
    }
}
