use crate::types::Selectors;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic cache and coalescing key for identifier + selectors
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard used for the on-disk layout
    pub fn shard(&self) -> &str {
        &self.0[0..2]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn compute_fingerprint(identifier: &str, selectors: &Selectors) -> Fingerprint {
    // Order and duplicates in selector lists do not change the result set
    let mut regions: Vec<&str> = selectors.regions.iter().map(String::as_str).collect();
    regions.sort_unstable();
    regions.dedup();
    let mut fields: Vec<&str> = selectors.fields.iter().map(String::as_str).collect();
    fields.sort_unstable();
    fields.dedup();
    let dates = selectors
        .date_range
        .map(|r| vec![r.start.to_string(), r.end.to_string()]);

    let canonical = serde_json::json!({
        "identifier": identifier,
        "regions": regions,
        "dates": dates,
        "fields": fields,
    })
    .to_string();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}
