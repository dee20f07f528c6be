//! Value normalizer: resolves scale codes into absolute values and, in
//! factor mode, replaces category codes with their labels.

pub mod units;

use crate::config::RecordSchema;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::types::{NormalizedRecord, RawRecord, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    #[default]
    Numeric,
    Factor,
}

impl NormalizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizeMode::Numeric => "numeric",
            NormalizeMode::Factor => "factor",
        }
    }
}

/// Column -> code -> human-readable label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeTable {
    columns: HashMap<String, HashMap<String, String>>,
}

impl CodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{"column": {"code": "label"}}` JSON. Tables where a label is
    /// also another code in the same column are rejected, since mapping
    /// them twice would not be idempotent.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let codes: CodeTable = serde_json::from_str(&content)?;
        for (column, mapping) in &codes.columns {
            for (code, label) in mapping {
                check_unchained(column, mapping, code, label)?;
            }
        }
        Ok(codes)
    }

    pub fn insert(
        &mut self,
        column: impl Into<String>,
        code: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<()> {
        let (column, code, label) = (column.into(), code.into(), label.into());
        let mapping = self.columns.entry(column.clone()).or_default();
        check_unchained(&column, mapping, &code, &label)?;
        if mapping.values().any(|l| *l == code) && mapping.get(&code) != Some(&code) {
            return Err(PipelineError::Config(format!(
                "code table column '{}': code '{}' is already a label",
                column, code
            )));
        }
        mapping.insert(code, label);
        Ok(())
    }

    pub fn with(mut self, column: &str, code: &str, label: &str) -> Result<Self> {
        self.insert(column, code, label)?;
        Ok(self)
    }

    pub fn label(&self, column: &str, code: &str) -> Option<&str> {
        self.columns.get(column)?.get(code).map(String::as_str)
    }

    fn covers(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }
}

fn check_unchained(column: &str, mapping: &HashMap<String, String>, code: &str, label: &str) -> Result<()> {
    if label != code && mapping.contains_key(label) {
        return Err(PipelineError::Config(format!(
            "code table column '{}': label '{}' for code '{}' is also a code",
            column, label, code
        )));
    }
    Ok(())
}

pub struct Normalizer {
    schema: RecordSchema,
    codes: CodeTable,
}

impl Normalizer {
    pub fn new(schema: RecordSchema) -> Self {
        Self {
            schema,
            codes: CodeTable::default(),
        }
    }

    pub fn with_code_table(mut self, codes: CodeTable) -> Self {
        self.codes = codes;
        self
    }

    /// Normalize a batch. Fails on the first record whose scale code has no
    /// rule; no partial output is returned.
    ///
    /// Records without the scale column are treated as already normalized,
    /// which makes the operation idempotent.
    pub fn normalize<R: AsRef<RawRecord>>(&self, records: &[R], mode: NormalizeMode) -> Result<Vec<NormalizedRecord>> {
        let normalized = records
            .iter()
            .map(|r| self.normalize_record(r.as_ref(), mode))
            .collect::<Result<Vec<_>>>()?;
        metrics::normalize::records_normalized(normalized.len(), mode.as_str());
        debug!(records = normalized.len(), mode = mode.as_str(), "Normalized batch");
        Ok(normalized)
    }

    fn normalize_record(&self, record: &RawRecord, mode: NormalizeMode) -> Result<NormalizedRecord> {
        let mut out = record.clone();

        if let Some(scale) = out.fields.remove(&self.schema.scale_column) {
            let multiplier = scale_multiplier(&scale)?;
            for column in &self.schema.value_columns {
                if let Some(cell) = out.fields.get_mut(column) {
                    *cell = scale_value(column, cell, multiplier)?;
                }
            }
        }

        if mode == NormalizeMode::Factor {
            for (column, cell) in out.fields.iter_mut() {
                if !self.codes.covers(column) {
                    continue;
                }
                let code = match cell {
                    Value::Text(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Null => continue,
                };
                match self.codes.label(column, &code) {
                    Some(label) => *cell = Value::Text(label.to_string()),
                    // Already-labelled cells land here on a second pass
                    None if self.codes.columns[column].values().any(|l| *l == code) => {}
                    None => {
                        metrics::normalize::unmapped_code(column);
                        warn!(column = %column, code = %code, "No label for code, keeping raw code");
                    }
                }
            }
        }

        Ok(NormalizedRecord::from_raw(out))
    }
}

fn scale_multiplier(scale: &Value) -> Result<f64> {
    let code = match scale {
        Value::Text(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
    };
    units::resolve_multiplier(&code).ok_or(PipelineError::UnknownUnit { unit_code: code })
}

fn scale_value(column: &str, cell: &Value, multiplier: f64) -> Result<Value> {
    match cell {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => Ok(Value::Number(n * multiplier)),
        Value::Text(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::Text(s) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map(|n| Value::Number(n * multiplier))
            .map_err(|_| PipelineError::Schema(format!("column '{}' holds non-numeric value '{}'", column, s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scale: &str, value: impl Into<Value>) -> RawRecord {
        RawRecord::new(Some("T1".into()))
            .with_field("GEO", "Canada")
            .with_field("SCALAR_FACTOR", scale)
            .with_field("VALUE", value)
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(RecordSchema::default())
    }

    #[test]
    fn test_thousands_scales_value_and_drops_column() {
        let out = normalizer()
            .normalize(&[record("thousands", 42.0)], NormalizeMode::Numeric)
            .unwrap();
        assert_eq!(out[0].get("VALUE"), Some(&Value::Number(42000.0)));
        assert!(out[0].get("SCALAR_FACTOR").is_none());
        assert_eq!(out[0].source(), Some("T1"));
    }

    #[test]
    fn test_unknown_unit_is_surfaced() {
        let err = normalizer()
            .normalize(&[record("units", 1.0), record("dozens", 2.0)], NormalizeMode::Numeric)
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownUnit { unit_code } if unit_code == "dozens"));
    }

    #[test]
    fn test_idempotent() {
        let n = normalizer();
        let once = n
            .normalize(&[record("millions", 1.5), record("percentage", 50.0)], NormalizeMode::Numeric)
            .unwrap();
        let twice = n.normalize(&once, NormalizeMode::Numeric).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once[0].get("VALUE"), Some(&Value::Number(1_500_000.0)));
        assert_eq!(once[1].get("VALUE"), Some(&Value::Number(0.5)));
    }

    #[test]
    fn test_numeric_text_is_parsed_and_garbage_rejected() {
        let out = normalizer()
            .normalize(&[record("thousands", "1,250"), record("units", "")], NormalizeMode::Numeric)
            .unwrap();
        assert_eq!(out[0].get("VALUE"), Some(&Value::Number(1_250_000.0)));
        assert_eq!(out[1].get("VALUE"), Some(&Value::Null));

        let err = normalizer()
            .normalize(&[record("units", "n/a")], NormalizeMode::Numeric)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
    }

    #[test]
    fn test_scalar_id_number_code() {
        let raw = RawRecord::new(None)
            .with_field("SCALAR_FACTOR", 3.0)
            .with_field("VALUE", 2.0);
        let out = normalizer().normalize(&[raw], NormalizeMode::Numeric).unwrap();
        assert_eq!(out[0].get("VALUE"), Some(&Value::Number(2000.0)));
    }

    #[test]
    fn test_factor_mode_maps_codes() {
        let codes = CodeTable::new()
            .with("SEX", "1", "Male")
            .unwrap()
            .with("SEX", "2", "Female")
            .unwrap();
        let n = normalizer().with_code_table(codes);
        let raw = vec![
            record("units", 10.0).with_field("SEX", "1"),
            record("units", 11.0).with_field("SEX", 2.0),
            record("units", 12.0).with_field("SEX", "9"),
        ];

        let numeric = n.normalize(&raw, NormalizeMode::Numeric).unwrap();
        assert_eq!(numeric[0].get("SEX"), Some(&Value::Text("1".into())));

        let factor = n.normalize(&raw, NormalizeMode::Factor).unwrap();
        assert_eq!(factor[0].get("SEX"), Some(&Value::Text("Male".into())));
        assert_eq!(factor[1].get("SEX"), Some(&Value::Text("Female".into())));
        assert_eq!(factor[2].get("SEX"), Some(&Value::Text("9".into())));

        let again = n.normalize(&factor, NormalizeMode::Factor).unwrap();
        assert_eq!(again, factor);
    }

    #[test]
    fn test_code_table_json_shape() {
        let codes: CodeTable = serde_json::from_str(r#"{"SEX": {"1": "Male", "2": "Female"}}"#).unwrap();
        assert_eq!(codes.label("SEX", "2"), Some("Female"));
        assert_eq!(codes.label("AGE", "2"), None);
    }

    #[test]
    fn test_chained_code_table_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("codes.json");
        std::fs::write(&path, r#"{"GRADE": {"A": "B", "B": "C"}}"#).unwrap();
        assert!(matches!(CodeTable::load(&path), Err(PipelineError::Config(_))));

        std::fs::write(&path, r#"{"GRADE": {"A": "Excellent", "B": "Good", "C": "C"}}"#).unwrap();
        assert_eq!(CodeTable::load(&path).unwrap().label("GRADE", "A"), Some("Excellent"));

        let mut codes = CodeTable::new();
        codes.insert("GRADE", "A", "B").unwrap();
        assert!(codes.insert("GRADE", "B", "C").is_err());
        assert!(CodeTable::new().with("GRADE", "B", "C").unwrap().with("GRADE", "A", "B").is_err());
    }
}
