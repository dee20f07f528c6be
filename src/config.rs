use crate::constants::{
    DEFAULT_CACHE_DIR, DEFAULT_DATE_COLUMN, DEFAULT_REGION_COLUMN, DEFAULT_SCALE_COLUMN,
    DEFAULT_VALUE_COLUMN, ENV_API_KEY, ENV_BASE_URL, ENV_CACHE_DIR,
};
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Process configuration, owned by the caller and handed to constructors.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Optional catalog snapshot (JSON array of catalog entries)
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Optional code/label lookup used by factor normalization
    #[serde(default)]
    pub code_table_path: Option<PathBuf>,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub schema: RecordSchema,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Web API root; when unset, `data_dir` bulk files are used instead
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    pub data_dir: Option<PathBuf>,
}

/// Column names the fetcher and normalizer rely on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecordSchema {
    #[serde(default = "default_scale_column")]
    pub scale_column: String,
    #[serde(default = "default_value_columns")]
    pub value_columns: Vec<String>,
    #[serde(default = "default_region_column")]
    pub region_column: String,
    #[serde(default = "default_date_column")]
    pub date_column: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_scale_column() -> String {
    DEFAULT_SCALE_COLUMN.to_string()
}

fn default_value_columns() -> Vec<String> {
    vec![DEFAULT_VALUE_COLUMN.to_string()]
}

fn default_region_column() -> String {
    DEFAULT_REGION_COLUMN.to_string()
}

fn default_date_column() -> String {
    DEFAULT_DATE_COLUMN.to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_seconds: default_timeout_seconds(),
            data_dir: None,
        }
    }
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            scale_column: default_scale_column(),
            value_columns: default_value_columns(),
            region_column: default_region_column(),
            date_column: default_date_column(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            catalog_path: None,
            code_table_path: None,
            source: SourceConfig::default(),
            schema: RecordSchema::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: PipelineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment
    /// overrides are applied either way.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.source.api_key = Some(key);
        }
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            self.source.base_url = Some(url);
        }
        self
    }
}
