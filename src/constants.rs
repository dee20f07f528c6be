/// Column and path constants shared across the pipeline stages.
/// Defaults follow the layout of the agency's bulk table downloads.

// Record schema defaults
pub const DEFAULT_SCALE_COLUMN: &str = "SCALAR_FACTOR";
pub const DEFAULT_VALUE_COLUMN: &str = "VALUE";
pub const DEFAULT_REGION_COLUMN: &str = "GEO";
pub const DEFAULT_DATE_COLUMN: &str = "REF_DATE";

// Reshape defaults
pub const DEFAULT_VARIABLE_COLUMN: &str = "variable";
pub const DEFAULT_LONG_VALUE_COLUMN: &str = "value";

// Cache layout
pub const DEFAULT_CACHE_DIR: &str = "cache";
pub const CACHE_SHARD_DIR: &str = "sha256";
pub const CACHE_ENTRY_EXT: &str = "entry";

// Config file and environment overrides
pub const DEFAULT_CONFIG_PATH: &str = "statfetch.toml";
pub const ENV_CACHE_DIR: &str = "STATFETCH_CACHE_DIR";
pub const ENV_API_KEY: &str = "STATFETCH_API_KEY";
pub const ENV_BASE_URL: &str = "STATFETCH_BASE_URL";
pub const ENV_METRICS_ADDR: &str = "STATFETCH_METRICS_ADDR";

/// Similarity threshold for fuzzy catalog matches
pub const FUZZY_SIMILARITY_THRESHOLD: f64 = 0.8;
