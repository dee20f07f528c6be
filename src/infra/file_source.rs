use crate::app::ports::DataSourcePort;
use crate::types::Selectors;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Bulk-file mirror: each identifier is a `<identifier>.json` file holding
/// the full table. Selectors are applied by the fetcher after decoding.
pub struct FileSource {
    data_dir: PathBuf,
}

impl FileSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl DataSourcePort for FileSource {
    async fn get(&self, identifier: &str, _selectors: &Selectors) -> Result<Vec<u8>, String> {
        if identifier.is_empty() || identifier.contains(['/', '\\']) || identifier.contains("..") {
            return Err(format!("identifier '{}' is not a valid file name", identifier));
        }
        let path = self.data_dir.join(format!("{}.json", identifier));
        debug!(path = %path.display(), "Reading bulk file");
        tokio::fs::read(&path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_identifier_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("T1.json"), b"[]").unwrap();
        let source = FileSource::new(dir.path());
        assert_eq!(source.get("T1", &Selectors::default()).await.unwrap(), b"[]");
    }

    #[tokio::test]
    async fn test_missing_and_traversal_are_errors() {
        let dir = TempDir::new().unwrap();
        let source = FileSource::new(dir.path());
        assert!(source.get("T404", &Selectors::default()).await.is_err());
        let err = source.get("../secret", &Selectors::default()).await.unwrap_err();
        assert!(err.contains("not a valid file name"));
    }
}
