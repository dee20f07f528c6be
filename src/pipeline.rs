use crate::app::ports::DataSourcePort;
use crate::catalog::{Catalog, MatchType};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::fetch::Fetcher;
use crate::infra::{FileSource, HttpSource};
use crate::normalize::{CodeTable, NormalizeMode, Normalizer};
use crate::shape::{reshape, ShapeOptions, ShapeTarget, Table};
use crate::types::{CatalogEntry, RetrievalRequest, Selectors};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// One end-to-end request: search, fetch the top hit, normalize, reshape
#[derive(Debug, Clone, Default)]
pub struct PipelineQuery {
    pub query: String,
    pub scope: Option<String>,
    pub match_type: MatchType,
    pub selectors: Selectors,
    pub refresh: bool,
    pub mode: NormalizeMode,
    pub join_key: Option<String>,
    pub shape: ShapeOptions,
}

impl PipelineQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub entry: CatalogEntry,
    pub record_count: usize,
    pub table: Table,
}

pub struct Pipeline {
    catalog: Catalog,
    fetcher: Fetcher,
    normalizer: Normalizer,
}

impl Pipeline {
    pub fn new(catalog: Catalog, fetcher: Fetcher, normalizer: Normalizer) -> Self {
        Self {
            catalog,
            fetcher,
            normalizer,
        }
    }

    /// Wire the stages from configuration: the HTTP source when a base URL
    /// is configured, the bulk-file source otherwise.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let catalog = match &config.catalog_path {
            Some(path) => Catalog::load(path)?,
            None => Catalog::default(),
        };
        let source = Self::source_from_config(config)?;
        let fetcher = Fetcher::new(source, config);
        let mut normalizer = Normalizer::new(config.schema.clone());
        if let Some(path) = &config.code_table_path {
            normalizer = normalizer.with_code_table(CodeTable::load(path)?);
        }
        Ok(Self::new(catalog, fetcher, normalizer))
    }

    pub fn source_from_config(config: &PipelineConfig) -> Result<Arc<dyn DataSourcePort>> {
        if config.source.base_url.is_some() {
            return Ok(Arc::new(HttpSource::new(&config.source)?));
        }
        match &config.source.data_dir {
            Some(dir) => Ok(Arc::new(FileSource::new(dir.clone()))),
            None => Err(PipelineError::Config(
                "either source.base_url or source.data_dir must be set".to_string(),
            )),
        }
    }

    pub fn with_code_table(mut self, codes: CodeTable) -> Self {
        self.normalizer = self.normalizer.with_code_table(codes);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    #[instrument(skip(self, query, target), fields(query = %query.query))]
    pub async fn run(&self, query: &PipelineQuery, target: ShapeTarget<'_>) -> Result<PipelineOutput> {
        let started = Instant::now();

        let hits = self
            .catalog
            .search(&query.query, query.scope.as_deref(), query.match_type)?;
        let entry = hits
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::InvalidQuery(format!("no catalog entry matches '{}'", query.query)))?;
        info!(identifier = %entry.id, title = %entry.title, "Resolved catalog entry");

        let request = RetrievalRequest {
            identifier: entry.id.clone(),
            selectors: query.selectors.clone(),
            refresh: query.refresh,
        };
        let records = self.fetcher.fetch(&request).await?;
        let normalized = self.normalizer.normalize(&records, query.mode)?;
        let table = reshape(&normalized, target, query.join_key.as_deref(), &query.shape)?;

        info!(
            identifier = %entry.id,
            records = normalized.len(),
            rows = table.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline finished"
        );
        Ok(PipelineOutput {
            entry,
            record_count: normalized.len(),
            table,
        })
    }
}
