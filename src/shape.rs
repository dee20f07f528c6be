//! Shape adapter: turns normalized records into wide, long or joined
//! tables. Every operation builds a new table; inputs are never mutated.

use crate::constants::{DEFAULT_LONG_VALUE_COLUMN, DEFAULT_VARIABLE_COLUMN};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::types::{NormalizedRecord, RawRecord, Value};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Rectangular output. Missing cells are `Value::Null`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Externally supplied reference rows (e.g. region geometry) keyed by a
/// join value. Cell contents are opaque to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    columns: Vec<String>,
    rows: HashMap<String, Vec<Value>>,
}

impl ReferenceTable {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: HashMap::new(),
        }
    }

    /// Insert or replace the row for `key`; `values` line up with `columns`
    pub fn insert(&mut self, key: impl Into<String>, values: Vec<Value>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(PipelineError::Schema(format!(
                "reference row has {} values, expected {}",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.insert(key.into(), values);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeOptions {
    /// Columns identifying an entity (e.g. GEO, REF_DATE)
    pub id_columns: Vec<String>,
    pub variable_column: String,
    pub value_column: String,
}

impl ShapeOptions {
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id_columns: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Default for ShapeOptions {
    fn default() -> Self {
        Self {
            id_columns: Vec::new(),
            variable_column: DEFAULT_VARIABLE_COLUMN.to_string(),
            value_column: DEFAULT_LONG_VALUE_COLUMN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ShapeTarget<'a> {
    Wide,
    Long,
    Joined { reference: &'a ReferenceTable, strict: bool },
}

impl ShapeTarget<'_> {
    fn as_str(&self) -> &'static str {
        match self {
            ShapeTarget::Wide => "wide",
            ShapeTarget::Long => "long",
            ShapeTarget::Joined { .. } => "joined",
        }
    }
}

/// Reshape normalized records.
///
/// `Wide` pivots records that carry the variable column and otherwise
/// returns them as a plain table. `Joined` requires `join_key`.
pub fn reshape(
    records: &[NormalizedRecord],
    target: ShapeTarget<'_>,
    join_key: Option<&str>,
    options: &ShapeOptions,
) -> Result<Table> {
    let table = Table::from_records(records, &options.id_columns);
    let out = match target {
        ShapeTarget::Wide => {
            if table.is_empty() || table.column_index(&options.variable_column).is_some() {
                table.pivot(options)?
            } else {
                table
            }
        }
        ShapeTarget::Long => table.melt(options)?,
        ShapeTarget::Joined { reference, strict } => {
            let key = join_key
                .ok_or_else(|| PipelineError::Schema("joined output requires a join key".to_string()))?;
            table.left_join(reference, key, strict)?
        }
    };
    metrics::shape::rows_emitted(out.rows.len(), target.as_str());
    Ok(out)
}

impl Table {
    /// Plain table: leading columns first, then the remaining columns in
    /// order of first appearance.
    pub fn from_records<R: AsRef<RawRecord>>(records: &[R], leading: &[String]) -> Self {
        let mut columns: Vec<String> = leading
            .iter()
            .filter(|c| records.iter().any(|r| r.as_ref().fields.contains_key(*c)))
            .cloned()
            .collect();
        for record in records {
            for column in record.as_ref().fields.keys() {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|r| {
                let fields = &r.as_ref().fields;
                columns
                    .iter()
                    .map(|c| fields.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| PipelineError::Schema(format!("missing column '{}'", name)))
    }

    fn id_indices(&self, options: &ShapeOptions) -> Result<Vec<usize>> {
        options.id_columns.iter().map(|c| self.require_column(c)).collect()
    }

    /// Wide to long: one row per (entity, variable, value)
    pub fn melt(&self, options: &ShapeOptions) -> Result<Table> {
        if self.rows.is_empty() {
            let mut columns = options.id_columns.clone();
            columns.push(options.variable_column.clone());
            columns.push(options.value_column.clone());
            return Ok(Table { columns, rows: Vec::new() });
        }
        let ids = self.id_indices(options)?;
        let measure: Vec<usize> = (0..self.columns.len()).filter(|i| !ids.contains(i)).collect();

        let mut columns: Vec<String> = ids.iter().map(|&i| self.columns[i].clone()).collect();
        columns.push(options.variable_column.clone());
        columns.push(options.value_column.clone());

        let mut rows = Vec::with_capacity(self.rows.len() * measure.len());
        for row in &self.rows {
            for &m in &measure {
                let mut out: Vec<Value> = ids.iter().map(|&i| row[i].clone()).collect();
                out.push(Value::Text(self.columns[m].clone()));
                out.push(row[m].clone());
                rows.push(out);
            }
        }
        Ok(Table { columns, rows })
    }

    /// Long to wide: one row per entity, one column per variable. A second
    /// value for the same (entity, variable) is a schema error.
    pub fn pivot(&self, options: &ShapeOptions) -> Result<Table> {
        if self.rows.is_empty() {
            return Ok(Table {
                columns: options.id_columns.clone(),
                rows: Vec::new(),
            });
        }
        let ids = self.id_indices(options)?;
        let var_idx = self.require_column(&options.variable_column)?;
        let val_idx = self.require_column(&options.value_column)?;

        let mut variables: Vec<String> = Vec::new();
        let mut entity_order: Vec<Vec<Value>> = Vec::new();
        let mut cells: HashMap<String, HashMap<String, Value>> = HashMap::new();

        for row in &self.rows {
            let entity: Vec<Value> = ids.iter().map(|&i| row[i].clone()).collect();
            let entity_key = format!("{:?}", entity);
            let variable = row[var_idx].to_string();
            if !variables.contains(&variable) {
                variables.push(variable.clone());
            }
            let slot = cells.entry(entity_key.clone()).or_insert_with(|| {
                entity_order.push(entity);
                HashMap::new()
            });
            if slot.insert(variable.clone(), row[val_idx].clone()).is_some() {
                return Err(PipelineError::Schema(format!(
                    "duplicate value for entity {} and variable '{}'",
                    entity_key, variable
                )));
            }
        }

        let mut columns: Vec<String> = ids.iter().map(|&i| self.columns[i].clone()).collect();
        columns.extend(variables.iter().cloned());

        let rows = entity_order
            .into_iter()
            .map(|entity| {
                let slot = &cells[&format!("{:?}", entity)];
                let mut row = entity;
                row.extend(
                    variables
                        .iter()
                        .map(|v| slot.get(v).cloned().unwrap_or(Value::Null)),
                );
                row
            })
            .collect();

        Ok(Table { columns, rows })
    }

    /// Left join onto `reference` by the value of `join_key`. Unmatched rows
    /// get null reference cells, or fail the whole join when `strict`.
    pub fn left_join(&self, reference: &ReferenceTable, join_key: &str, strict: bool) -> Result<Table> {
        let mut columns = self.columns.clone();
        if self.rows.is_empty() && !columns.iter().any(|c| c == join_key) {
            columns.push(join_key.to_string());
        }
        for c in &reference.columns {
            let name = if columns.contains(c) { format!("{}_ref", c) } else { c.clone() };
            columns.push(name);
        }
        if self.rows.is_empty() {
            return Ok(Table { columns, rows: Vec::new() });
        }

        let key_idx = self.require_column(join_key)?;

        if strict {
            let unmatched: BTreeSet<String> = self
                .rows
                .iter()
                .map(|row| row[key_idx].to_string())
                .filter(|k| !reference.rows.contains_key(k))
                .collect();
            if !unmatched.is_empty() {
                return Err(PipelineError::JoinKeyMismatch {
                    keys: unmatched.into_iter().collect(),
                });
            }
        }

        let nulls = vec![Value::Null; reference.columns.len()];
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut out = row.clone();
                let matched = reference.rows.get(&row[key_idx].to_string()).unwrap_or(&nulls);
                out.extend(matched.iter().cloned());
                out
            })
            .collect();

        Ok(Table { columns, rows })
    }
}

impl fmt::Display for Table {
    /// Tab-separated, header first
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.columns.join("\t"))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}
