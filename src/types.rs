use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One searchable dataset, table or series in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Dataset family or version tag, e.g. "census-2021"
    pub family: String,
}

/// A single cell value as delivered by a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// One retrieved row, owned by the fetcher until handed to the normalizer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRecord {
    /// Identifier of the catalog entry this row came from (provenance only)
    pub source: Option<String>,
    pub fields: BTreeMap<String, Value>,
}

impl RawRecord {
    pub fn new(source: Option<String>) -> Self {
        Self {
            source,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }
}

impl AsRef<RawRecord> for RawRecord {
    fn as_ref(&self) -> &RawRecord {
        self
    }
}

/// A record whose numeric columns have been unit-adjusted. Only the
/// normalizer constructs these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord(RawRecord);

impl NormalizedRecord {
    pub(crate) fn from_raw(record: RawRecord) -> Self {
        Self(record)
    }

    pub fn source(&self) -> Option<&str> {
        self.0.source.as_deref()
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.0.fields
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn into_raw(self) -> RawRecord {
        self.0
    }
}

impl AsRef<RawRecord> for NormalizedRecord {
    fn as_ref(&self) -> &RawRecord {
        &self.0
    }
}

impl From<NormalizedRecord> for RawRecord {
    fn from(record: NormalizedRecord) -> Self {
        record.0
    }
}

/// Inclusive reference-date window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }
}

/// Optional narrowing of a retrieval. Empty vectors mean "everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectors {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Selectors {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.date_range.is_none() && self.fields.is_empty()
    }
}

/// Everything the fetcher needs for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub identifier: String,
    pub selectors: Selectors,
    pub refresh: bool,
}

impl RetrievalRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            selectors: Selectors::default(),
            refresh: false,
        }
    }

    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.selectors.date_range = Some(DateRange { start, end });
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn refreshed(mut self) -> Self {
        self.refresh = true;
        self
    }
}

/// Parse the loose reference dates found in agency tables: "2021-03-15",
/// "2021-03" (first of month) or "2021" (first of year).
pub fn parse_ref_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01-01", raw), "%Y-%m-%d"))
        .ok()
}
