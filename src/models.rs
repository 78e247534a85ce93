use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single cell in the prediction table.
///
/// Columns are open-ended: new fields appear over the table's lifetime, so a
/// cell is either numeric (forecast values, generation feeds) or text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// One row of the reconciliation table.
///
/// `columns` maps field name to an optional value: `None` is an explicit
/// null, an absent key means "not provided". Upsert treats both the same
/// (only present-and-non-null fields write through), but the merge step
/// needs explicit nulls to know which cells to forward-fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Canonical UTC timestamp key. Normalized on every store operation, so
    /// callers may hand in any parseable representation.
    pub timestamp: String,
    pub columns: BTreeMap<String, Option<FieldValue>>,
}

impl Record {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with_number(mut self, field: impl Into<String>, value: f64) -> Self {
        self.columns
            .insert(field.into(), Some(FieldValue::Number(value)));
        self
    }

    pub fn with_text(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.columns
            .insert(field.into(), Some(FieldValue::Text(value.into())));
        self
    }

    pub fn with_null(mut self, field: impl Into<String>) -> Self {
        self.columns.insert(field.into(), None);
        self
    }

    /// Non-null value of a field, if present.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.columns.get(field).and_then(|v| v.as_ref())
    }

    /// True when every non-key field is null — "no useful data recorded yet".
    pub fn is_all_null(&self) -> bool {
        self.columns.values().all(|v| v.is_none())
    }
}

/// A raw sample from a secondary source (e.g. a physical-generation feed),
/// possibly at a finer granularity than the primary grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSample {
    pub timestamp: String,
    /// `None` models the source's own null readings.
    pub value: Option<f64>,
}

impl ExternalSample {
    pub fn new(timestamp: impl Into<String>, value: impl Into<Option<f64>>) -> Self {
        Self {
            timestamp: timestamp.into(),
            value: value.into(),
        }
    }
}

/// One `{timestamp, value}` pair handed to the snapshot log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedPoint {
    pub timestamp: String,
    pub value: Option<f64>,
}

impl PredictedPoint {
    pub fn new(timestamp: impl Into<String>, value: impl Into<Option<f64>>) -> Self {
        Self {
            timestamp: timestamp.into(),
            value: value.into(),
        }
    }
}

/// One detail row returned by snapshot queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub snapshot_id: i64,
    pub snapshot_date: String,
    pub timestamp: String,
    pub value: Option<f64>,
}

/// Outcome of an upsert batch: which keys were inserted vs updated, and how
/// many rows were dropped for malformed timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertReport {
    pub inserted: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub skipped: usize,
}

impl UpsertReport {
    pub fn applied(&self) -> usize {
        self.inserted.len() + self.updated.len()
    }
}
