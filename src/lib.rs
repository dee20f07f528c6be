//! Tabular-data retrieval pipeline for statistical agency data:
//! catalog search, cached fetch, unit normalization and reshaping.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod normalize;
pub mod observability;
pub mod pipeline;
pub mod shape;
pub mod types;

// Ports and the adapters that implement them
pub mod app;
pub mod infra;

pub use catalog::{Catalog, MatchType};
pub use config::{PipelineConfig, RecordSchema};
pub use error::{PipelineError, Result};
pub use fetch::Fetcher;
pub use normalize::{CodeTable, NormalizeMode, Normalizer};
pub use pipeline::{Pipeline, PipelineOutput, PipelineQuery};
pub use shape::{reshape, ReferenceTable, ShapeOptions, ShapeTarget, Table};
pub use types::{CatalogEntry, NormalizedRecord, RawRecord, RetrievalRequest, Selectors, Value};
