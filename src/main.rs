use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use statfetch::constants::{DEFAULT_CONFIG_PATH, ENV_METRICS_ADDR};
use statfetch::fetch::CacheStore;
use statfetch::{
    logging, observability, Catalog, Fetcher, MatchType, NormalizeMode, Pipeline, PipelineConfig, PipelineQuery,
    RetrievalRequest, ShapeOptions, ShapeTarget, Table,
};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "statfetch")]
#[command(about = "Search, fetch, cache, normalize and reshape statistical tables")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory for rolling log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the catalog snapshot
    Search {
        query: String,
        /// Restrict to one dataset family
        #[arg(long)]
        scope: Option<String>,
        #[arg(long, value_enum, default_value_t = MatchArg::Contains)]
        match_type: MatchArg,
    },
    /// Fetch one dataset by identifier and print it
    Fetch {
        identifier: String,
        #[command(flatten)]
        selectors: SelectorArgs,
        /// Normalize scale codes before printing
        #[arg(long)]
        normalize: bool,
    },
    /// Search, fetch the best hit, normalize and reshape
    Run {
        query: String,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long, value_enum, default_value_t = MatchArg::Contains)]
        match_type: MatchArg,
        #[command(flatten)]
        selectors: SelectorArgs,
        #[arg(long, value_enum, default_value_t = TargetArg::Wide)]
        target: TargetArg,
        /// Entity columns (comma-separated) for wide/long output
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        /// Map category codes to labels
        #[arg(long)]
        factor: bool,
    },
    /// Inspect or clear the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached entries
    List,
    /// Remove cached entries for one identifier, or everything
    Clear {
        #[arg(long)]
        identifier: Option<String>,
    },
}

#[derive(clap::Args)]
struct SelectorArgs {
    /// Regions to keep (comma-separated)
    #[arg(long, value_delimiter = ',')]
    regions: Vec<String>,
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,
    /// Fields to keep (comma-separated)
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,
    /// Ignore the cache and fetch again
    #[arg(long)]
    refresh: bool,
}

impl SelectorArgs {
    fn request(&self, identifier: &str) -> RetrievalRequest {
        let mut request = RetrievalRequest::new(identifier)
            .with_regions(self.regions.clone())
            .with_fields(self.fields.clone());
        if let (Some(from), Some(to)) = (self.from, self.to) {
            request = request.with_date_range(from, to);
        }
        request.refresh = self.refresh;
        request
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MatchArg {
    Exact,
    Contains,
    Fuzzy,
}

impl From<MatchArg> for MatchType {
    fn from(m: MatchArg) -> Self {
        match m {
            MatchArg::Exact => MatchType::Exact,
            MatchArg::Contains => MatchType::Contains,
            MatchArg::Fuzzy => MatchType::Fuzzy,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Wide,
    Long,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = logging::init_logging(&cli.log_dir);

    if let Ok(addr) = std::env::var(ENV_METRICS_ADDR) {
        observability::init_metrics(&addr);
    }

    let config = PipelineConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if let Err(e) = run(cli.command, &config).await {
        error!("Command failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(command: Commands, config: &PipelineConfig) -> anyhow::Result<()> {
    match command {
        Commands::Search { query, scope, match_type } => {
            let path = config
                .catalog_path
                .as_ref()
                .context("catalog_path is not configured")?;
            let hits = Catalog::load(path)?.search(&query, scope.as_deref(), match_type.into())?;
            if hits.is_empty() {
                println!("No catalog entries match '{}'", query);
            }
            for hit in hits {
                println!("{}\t{}\t{}", hit.id, hit.family, hit.title);
            }
        }
        Commands::Fetch {
            identifier,
            selectors,
            normalize,
        } => {
            // Fetching needs neither the catalog nor the code table
            let fetcher = Fetcher::new(Pipeline::source_from_config(config)?, config);
            let records = fetcher.fetch(&selectors.request(&identifier)).await?;
            let table = if normalize {
                let normalized = statfetch::Normalizer::new(config.schema.clone())
                    .normalize(&records, NormalizeMode::Numeric)?;
                Table::from_records(&normalized, &[])
            } else {
                Table::from_records(&records, &[])
            };
            print!("{}", table);
        }
        Commands::Run {
            query,
            scope,
            match_type,
            selectors,
            target,
            ids,
            factor,
        } => {
            let pipeline = Pipeline::from_config(config)?;
            let request = selectors.request("");
            let pipeline_query = PipelineQuery {
                query,
                scope,
                match_type: match_type.into(),
                selectors: request.selectors,
                refresh: request.refresh,
                mode: if factor { NormalizeMode::Factor } else { NormalizeMode::Numeric },
                join_key: None,
                shape: ShapeOptions::with_ids(ids),
            };
            let target = match target {
                TargetArg::Wide => ShapeTarget::Wide,
                TargetArg::Long => ShapeTarget::Long,
            };
            let output = pipeline.run(&pipeline_query, target).await?;
            println!("# {} ({}): {} records", output.entry.title, output.entry.id, output.record_count);
            print!("{}", output.table);
        }
        Commands::Cache { action } => {
            // Cache maintenance needs no data source
            let cache = CacheStore::new(config.cache_dir.clone());
            match action {
                CacheAction::List => {
                    for meta in cache.list()? {
                        println!(
                            "{}\t{}\t{}\t{} bytes",
                            meta.identifier,
                            meta.fetched_at.to_rfc3339(),
                            meta.fingerprint,
                            meta.payload_len
                        );
                    }
                }
                CacheAction::Clear { identifier } => {
                    let removed = cache.remove(identifier.as_deref())?;
                    println!("Removed {} cached entries", removed);
                }
            }
        }
    }
    Ok(())
}
