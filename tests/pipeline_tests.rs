use anyhow::Result;
use statfetch::infra::FileSource;
use statfetch::{
    Catalog, CatalogEntry, CodeTable, Fetcher, NormalizeMode, Normalizer, Pipeline, PipelineConfig,
    PipelineError, PipelineQuery, ReferenceTable, RetrievalRequest, ShapeOptions, ShapeTarget, Value,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn entry(id: &str, title: &str, family: &str) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        title: title.to_string(),
        keywords: Vec::new(),
        family: family.to_string(),
    }
}

fn catalog() -> Catalog {
    Catalog::from_entries(vec![
        entry("T0", "Population by age", "census-2021"),
        entry("T1", "Median household income", "census-2021"),
        entry("T2", "Household income by province", "census-2016"),
    ])
}

fn write_dataset(dir: &Path, id: &str, body: &str) -> Result<()> {
    fs::write(dir.join(format!("{}.json", id)), body)?;
    Ok(())
}

fn config_for(data_dir: &Path, cache_dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig {
        cache_dir: cache_dir.to_path_buf(),
        ..PipelineConfig::default()
    };
    config.source.data_dir = Some(data_dir.to_path_buf());
    config
}

fn pipeline_for(config: &PipelineConfig) -> Pipeline {
    let source = Arc::new(FileSource::new(data_dir_of(config)));
    Pipeline::new(
        catalog(),
        Fetcher::new(source, config),
        Normalizer::new(config.schema.clone()),
    )
}

fn data_dir_of(config: &PipelineConfig) -> std::path::PathBuf {
    config.source.data_dir.clone().unwrap_or_default()
}

#[tokio::test]
async fn test_search_fetch_normalize_reshape_long() -> Result<()> {
    let data = tempdir()?;
    let cache = tempdir()?;
    write_dataset(
        data.path(),
        "T1",
        r#"{"records": [
            {"GEO": "Canada", "REF_DATE": "2021", "SCALAR_FACTOR": "thousands", "VALUE": 42},
            {"GEO": "Ontario", "REF_DATE": "2021", "SCALAR_FACTOR": "thousands", "VALUE": 17},
            {"GEO": "Quebec", "REF_DATE": "2021", "SCALAR_FACTOR": "thousands", "VALUE": "9.5"}
        ]}"#,
    )?;
    let config = config_for(data.path(), cache.path());
    let pipeline = pipeline_for(&config);

    let hits = pipeline
        .catalog()
        .search("household income", Some("census-2021"), Default::default())?;
    assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["T1"]);

    let mut query = PipelineQuery::new("household income");
    query.scope = Some("census-2021".to_string());
    query.shape = ShapeOptions::with_ids(["GEO", "REF_DATE"]);
    let output = pipeline.run(&query, ShapeTarget::Long).await?;

    assert_eq!(output.entry.id, "T1");
    assert_eq!(output.record_count, 3);
    assert_eq!(output.table.columns, vec!["GEO", "REF_DATE", "variable", "value"]);
    assert_eq!(output.table.len(), 3);
    assert_eq!(output.table.rows[0][0], Value::from("Canada"));
    assert_eq!(output.table.rows[0][2], Value::from("VALUE"));
    assert_eq!(output.table.rows[0][3], Value::Number(42000.0));
    assert_eq!(output.table.rows[2][3], Value::Number(9500.0));
    assert_eq!(pipeline.fetcher().cached_entries()?.len(), 1);

    // Served from the cache once the bulk file is gone
    fs::remove_file(data.path().join("T1.json"))?;
    let again = pipeline.run(&query, ShapeTarget::Long).await?;
    assert_eq!(again.table, output.table);
    Ok(())
}

#[tokio::test]
async fn test_long_output_from_two_entities_two_variables() -> Result<()> {
    let data = tempdir()?;
    let cache = tempdir()?;
    write_dataset(
        data.path(),
        "T0",
        r#"[
            {"GEO": "Canada", "SCALAR_FACTOR": "units", "VALUE": 10, "MALES": 4},
            {"GEO": "Ontario", "SCALAR_FACTOR": "units", "VALUE": 6, "MALES": 3}
        ]"#,
    )?;
    let mut config = config_for(data.path(), cache.path());
    config.schema.value_columns = vec!["VALUE".to_string(), "MALES".to_string()];
    let pipeline = pipeline_for(&config);

    let mut query = PipelineQuery::new("population");
    query.shape = ShapeOptions::with_ids(["GEO"]);
    let output = pipeline.run(&query, ShapeTarget::Long).await?;
    assert_eq!(output.table.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_selector_matching_nothing_gives_empty_table() -> Result<()> {
    let data = tempdir()?;
    let cache = tempdir()?;
    write_dataset(
        data.path(),
        "T1",
        r#"[{"GEO": "Canada", "SCALAR_FACTOR": "thousands", "VALUE": 42}]"#,
    )?;
    let config = config_for(data.path(), cache.path());
    let pipeline = pipeline_for(&config);

    let mut query = PipelineQuery::new("median household income");
    query.selectors.regions = vec!["Atlantis".to_string()];
    query.shape = ShapeOptions::with_ids(["GEO"]);
    let output = pipeline.run(&query, ShapeTarget::Long).await?;
    assert_eq!(output.record_count, 0);
    assert!(output.table.is_empty());
    assert_eq!(output.table.columns, vec!["GEO", "variable", "value"]);
    Ok(())
}

#[tokio::test]
async fn test_unknown_unit_aborts_run() -> Result<()> {
    let data = tempdir()?;
    let cache = tempdir()?;
    write_dataset(
        data.path(),
        "T1",
        r#"[{"GEO": "Canada", "SCALAR_FACTOR": "dozens", "VALUE": 3}]"#,
    )?;
    let config = config_for(data.path(), cache.path());
    let pipeline = pipeline_for(&config);

    let err = pipeline
        .run(&PipelineQuery::new("median household"), ShapeTarget::Wide)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownUnit { ref unit_code } if unit_code == "dozens"));
    Ok(())
}

#[tokio::test]
async fn test_missing_dataset_is_retrieval_error() -> Result<()> {
    let data = tempdir()?;
    let cache = tempdir()?;
    let config = config_for(data.path(), cache.path());
    let pipeline = pipeline_for(&config);

    let err = pipeline
        .fetcher()
        .fetch(&RetrievalRequest::new("T9"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Retrieval { ref identifier, .. } if identifier == "T9"));
    assert!(pipeline.fetcher().cached_entries()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_factor_mode_and_join() -> Result<()> {
    let data = tempdir()?;
    let cache = tempdir()?;
    write_dataset(
        data.path(),
        "T1",
        r#"[
            {"GEO": "35", "SCALAR_FACTOR": "units", "VALUE": 1},
            {"GEO": "24", "SCALAR_FACTOR": "units", "VALUE": 2}
        ]"#,
    )?;
    let config = config_for(data.path(), cache.path());
    let codes = CodeTable::new()
        .with("GEO", "35", "Ontario")?
        .with("GEO", "24", "Quebec")?;
    let pipeline = pipeline_for(&config).with_code_table(codes);

    let mut reference = ReferenceTable::new(["capital"]);
    reference.insert("Ontario", vec![Value::from("Toronto")])?;
    reference.insert("Quebec", vec![Value::from("Quebec City")])?;

    let mut query = PipelineQuery::new("median household income");
    query.mode = NormalizeMode::Factor;
    query.join_key = Some("GEO".to_string());
    query.shape = ShapeOptions::with_ids(["GEO"]);
    let output = pipeline
        .run(&query, ShapeTarget::Joined { reference: &reference, strict: true })
        .await?;

    let capital = output.table.column_index("capital").expect("capital column");
    assert_eq!(output.table.rows[0][0], Value::from("Ontario"));
    assert_eq!(output.table.rows[0][capital], Value::from("Toronto"));
    assert_eq!(output.table.rows[1][capital], Value::from("Quebec City"));
    Ok(())
}

#[tokio::test]
async fn test_from_config_requires_a_source() {
    let config = PipelineConfig::default();
    assert!(matches!(
        Pipeline::from_config(&config),
        Err(PipelineError::Config(_))
    ));
}

#[tokio::test]
async fn test_fetch_without_catalog_ignores_stale_catalog_path() -> Result<()> {
    let data = tempdir()?;
    let cache = tempdir()?;
    write_dataset(
        data.path(),
        "T1",
        r#"[{"GEO": "Canada", "SCALAR_FACTOR": "units", "VALUE": 1}]"#,
    )?;
    let mut config = config_for(data.path(), cache.path());
    config.catalog_path = Some(data.path().join("missing-catalog.json"));

    assert!(Pipeline::from_config(&config).is_err());

    let fetcher = Fetcher::new(Pipeline::source_from_config(&config)?, &config);
    assert_eq!(fetcher.fetch(&RetrievalRequest::new("T1")).await?.len(), 1);
    Ok(())
}
