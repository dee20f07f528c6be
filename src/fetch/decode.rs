//! Payload decoding and local selector application.
//!
//! Accepted payloads are a JSON array of flat objects, or an object with a
//! `records` array of flat objects. Nested arrays/objects are rejected here
//! rather than coerced, so the normalizer only ever sees scalar cells.

use crate::config::RecordSchema;
use crate::types::{parse_ref_date, RawRecord, Selectors, Value};
use serde_json::Value as Json;
use std::collections::BTreeMap;

pub fn decode_payload(source: &str, bytes: &[u8]) -> Result<Vec<RawRecord>, String> {
    let json: Json = serde_json::from_slice(bytes).map_err(|e| format!("malformed payload: {}", e))?;
    let rows = match json {
        Json::Array(rows) => rows,
        Json::Object(mut obj) => match obj.remove("records") {
            Some(Json::Array(rows)) => rows,
            _ => return Err("malformed payload: expected a 'records' array".to_string()),
        },
        _ => return Err("malformed payload: expected an array of records".to_string()),
    };

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| decode_row(source, i, row))
        .collect()
}

fn decode_row(source: &str, index: usize, row: Json) -> Result<RawRecord, String> {
    let Json::Object(obj) = row else {
        return Err(format!("malformed payload: record {} is not an object", index));
    };
    let mut fields = BTreeMap::new();
    for (column, cell) in obj {
        let value = match cell {
            Json::Null => Value::Null,
            Json::Number(n) => match n.as_f64() {
                Some(f) => Value::Number(f),
                None => return Err(format!("record {} column '{}': number out of range", index, column)),
            },
            Json::String(s) => Value::Text(s),
            Json::Bool(b) => Value::Text(b.to_string()),
            Json::Array(_) | Json::Object(_) => {
                return Err(format!("record {} column '{}': nested values are not supported", index, column))
            }
        };
        fields.insert(column, value);
    }
    Ok(RawRecord {
        source: Some(source.to_string()),
        fields,
    })
}

/// Narrow decoded records to the request's selectors.
///
/// Records without a region or date cell are kept: the selector only applies
/// to rows that carry that dimension. A field projection always retains the
/// scale column so the records can still be normalized.
pub fn apply_selectors(records: Vec<RawRecord>, selectors: &Selectors, schema: &RecordSchema) -> Vec<RawRecord> {
    if selectors.is_empty() {
        return records;
    }

    records
        .into_iter()
        .filter(|r| {
            if selectors.regions.is_empty() {
                return true;
            }
            match r.get(&schema.region_column) {
                Some(Value::Text(region)) => selectors.regions.iter().any(|s| s == region),
                _ => true,
            }
        })
        .filter(|r| {
            let Some(range) = selectors.date_range else {
                return true;
            };
            match r.get(&schema.date_column) {
                Some(Value::Text(raw)) => parse_ref_date(raw).map_or(false, |d| range.contains(d)),
                Some(Value::Number(year)) => parse_ref_date(&format!("{}", year)).map_or(false, |d| range.contains(d)),
                _ => true,
            }
        })
        .map(|mut r| {
            if !selectors.fields.is_empty() {
                r.fields
                    .retain(|column, _| column == &schema.scale_column || selectors.fields.contains(column));
            }
            r
        })
        .collect()
}
