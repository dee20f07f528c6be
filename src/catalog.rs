//! Catalog search over a pre-downloaded snapshot of dataset metadata.

use crate::constants::FUZZY_SIMILARITY_THRESHOLD;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::types::CatalogEntry;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[[:alnum:]]+").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    #[default]
    Contains,
    Fuzzy,
}

impl std::str::FromStr for MatchType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchType::Exact),
            "contains" => Ok(MatchType::Contains),
            "fuzzy" => Ok(MatchType::Fuzzy),
            other => Err(PipelineError::InvalidQuery(format!("unknown match type '{}'", other))),
        }
    }
}

/// Immutable, in-memory catalog snapshot
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Load a snapshot written by the catalog refresh job (JSON array)
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&content)?;
        debug!("Loaded {} catalog entries from {}", entries.len(), path.display());
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Distinct dataset families, sorted
    pub fn families(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.family.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rank entries against a free-text query.
    ///
    /// Score is the number of query tokens the entry matches, plus one when
    /// the whole query is a substring of the title. Zero-score entries are
    /// dropped; ties are broken by identifier ascending.
    pub fn search(
        &self,
        query: &str,
        dataset_scope: Option<&str>,
        match_type: MatchType,
    ) -> Result<Vec<CatalogEntry>> {
        let query_norm = query.trim().to_lowercase();
        let query_tokens = tokenize(&query_norm);
        if query_tokens.is_empty() {
            return Err(PipelineError::InvalidQuery(format!("'{}' has no searchable terms", query)));
        }

        if let Some(scope) = dataset_scope {
            if !self.entries.iter().any(|e| e.family == scope) {
                return Err(PipelineError::UnknownScope(scope.to_string()));
            }
        }

        let mut scored: Vec<(usize, &CatalogEntry)> = self
            .entries
            .iter()
            .filter(|e| dataset_scope.map_or(true, |scope| e.family == scope))
            .filter_map(|e| {
                let score = score_entry(e, &query_norm, &query_tokens, match_type);
                (score > 0).then_some((score, e))
            })
            .collect();

        scored.sort_by(|(sa, ea), (sb, eb)| sb.cmp(sa).then_with(|| ea.id.cmp(&eb.id)));

        let results: Vec<CatalogEntry> = scored.into_iter().map(|(_, e)| e.clone()).collect();
        metrics::catalog::search_performed(results.len());
        debug!(query = %query, hits = results.len(), "Catalog search");
        Ok(results)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn score_entry(entry: &CatalogEntry, query_norm: &str, query_tokens: &[String], match_type: MatchType) -> usize {
    let title = entry.title.to_lowercase();
    let mut entry_tokens: BTreeSet<String> = tokenize(&title).into_iter().collect();
    entry_tokens.insert(entry.id.to_lowercase());
    for keyword in &entry.keywords {
        entry_tokens.extend(tokenize(keyword));
    }

    let matched = query_tokens
        .iter()
        .filter(|q| entry_tokens.iter().any(|t| token_matches(q, t, match_type)))
        .count();

    let phrase_bonus = usize::from(matched > 0 && title.contains(query_norm));
    matched + phrase_bonus
}

fn token_matches(query: &str, candidate: &str, match_type: MatchType) -> bool {
    match match_type {
        MatchType::Exact => candidate == query,
        MatchType::Contains => candidate.contains(query),
        MatchType::Fuzzy => {
            candidate.contains(query) || similarity(query, candidate) >= FUZZY_SIMILARITY_THRESHOLD
        }
    }
}

/// Normalised Levenshtein similarity in [0, 1]
fn similarity(s1: &str, s2: &str) -> f64 {
    if s1 == s2 {
        return 1.0;
    }
    let len1 = s1.chars().count();
    let len2 = s2.chars().count();
    if len1 == 0 || len2 == 0 {
        return 0.0;
    }
    let distance = levenshtein_distance(s1, s2);
    1.0 - (distance as f64 / len1.max(len2) as f64)
}

fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let chars1: Vec<char> = s1.chars().collect();
    let chars2: Vec<char> = s2.chars().collect();

    // Single rolling row
    let mut row: Vec<usize> = (0..=chars2.len()).collect();
    for (i, c1) in chars1.iter().enumerate() {
        let mut prev_diag = row[0];
        row[0] = i + 1;
        for (j, c2) in chars2.iter().enumerate() {
            let cost = usize::from(c1 != c2);
            let next = (row[j + 1] + 1).min(row[j] + 1).min(prev_diag + cost);
            prev_diag = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[chars2.len()]
}
