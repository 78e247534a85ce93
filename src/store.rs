//! SQLite-backed reconciliation table.
//!
//! One row per canonical timestamp; columns grow over the table's lifetime
//! as new fields appear in incoming batches. Rows and columns are only ever
//! created or updated, never deleted.
//!
//! Storage handles are strictly scoped: every public operation opens its own
//! connection and drops it on every exit path. Concurrent writers rely on
//! SQLite's own locking; the engine adds no in-process coordination.

use rusqlite::{params, types::Value, types::ValueRef, Connection, OpenFlags, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::{
    config::StoreConfig,
    error::EngineError,
    models::{FieldValue, Record, UpsertReport},
    timestamp,
};

/// Shared schema for the reconciliation table and the snapshot log (both
/// live in the same database file).
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS prediction (
    timestamp TEXT PRIMARY KEY
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS prediction_snapshot (
    snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshot_details (
    snapshot_id INTEGER NOT NULL REFERENCES prediction_snapshot(snapshot_id),
    timestamp TEXT NOT NULL,
    value REAL
);

CREATE INDEX IF NOT EXISTS idx_snapshot_details_group
    ON snapshot_details(snapshot_id, timestamp);

CREATE INDEX IF NOT EXISTS idx_prediction_snapshot_date
    ON prediction_snapshot(snapshot_date DESC);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;
"#;

pub(crate) fn connect(db_path: &str) -> Result<Connection, EngineError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    Ok(Connection::open_with_flags(db_path, flags)?)
}

/// The persistent keyed table of predicted values.
pub struct ReconciliationStore {
    config: StoreConfig,
}

impl ReconciliationStore {
    /// Open (creating if needed) the store and apply the schema.
    pub fn open(config: StoreConfig) -> Result<Self, EngineError> {
        let conn = connect(&config.db_path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!(%journal_mode, "WAL mode not active");
        }

        conn.execute(
            "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', '1')",
            [],
        )?;

        info!(path = %config.db_path, "prediction store ready");
        Ok(Self { config })
    }

    fn connect(&self) -> Result<Connection, EngineError> {
        connect(&self.config.db_path)
    }

    /// Apply a batch of records, inserting new timestamps and updating
    /// existing ones.
    ///
    /// Per row: the timestamp is normalized (malformed rows are skipped and
    /// counted), then the row is inserted with all provided non-null fields,
    /// or — if the key already exists — only its present-and-non-null fields
    /// are written, leaving every other stored field untouched. A field that
    /// is null in the input never nulls out a stored value.
    ///
    /// The batch is best-effort row-by-row, not atomic: a storage failure
    /// partway leaves earlier rows committed. Duplicate timestamps within
    /// one batch are applied as successive upserts.
    pub fn upsert(&self, records: &[Record]) -> Result<UpsertReport, EngineError> {
        let mut report = UpsertReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let conn = self.connect()?;
        Self::ensure_columns(&conn, records)?;

        for record in records {
            let key = match timestamp::normalize(&record.timestamp) {
                Ok(key) => key,
                Err(_) => {
                    warn!(ts = %record.timestamp, "skipping record with malformed timestamp");
                    report.skipped += 1;
                    continue;
                }
            };

            let exists = conn
                .query_row(
                    "SELECT 1 FROM prediction WHERE timestamp = ?1",
                    params![key],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            if exists {
                for (field, value) in &record.columns {
                    let Some(value) = value else { continue };
                    let sql = format!(
                        "UPDATE prediction SET {} = ?1 WHERE timestamp = ?2",
                        quote_ident(field)
                    );
                    conn.execute(&sql, params![to_sql_value(value), key])?;
                }
                report.updated.insert(key);
            } else {
                let mut names = vec![quote_ident("timestamp")];
                let mut values = vec![Value::Text(key.clone())];
                for (field, value) in &record.columns {
                    if let Some(value) = value {
                        names.push(quote_ident(field));
                        values.push(to_sql_value(value));
                    }
                }
                let placeholders = (1..=values.len())
                    .map(|i| format!("?{i}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "INSERT INTO prediction ({}) VALUES ({})",
                    names.join(", "),
                    placeholders
                );
                conn.execute(&sql, rusqlite::params_from_iter(values))?;
                report.inserted.insert(key);
            }
        }

        debug!(
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            skipped = report.skipped,
            "applied prediction batch"
        );
        Ok(report)
    }

    /// Fetch the rows matching the given timestamps, sorted ascending by
    /// canonical timestamp.
    ///
    /// Keys with no matching row are simply absent from the result, as are
    /// rows whose non-key fields are all null. Malformed keys are skipped.
    pub fn query_by_timestamps(&self, keys: &[String]) -> Result<Vec<Record>, EngineError> {
        let conn = self.connect()?;
        let columns = Self::table_columns(&conn)?;
        let select_sql = Self::select_sql(&columns);

        let mut normalized = Vec::with_capacity(keys.len());
        for key in keys {
            match timestamp::normalize(key) {
                Ok(key) => normalized.push(key),
                Err(_) => warn!(ts = %key, "skipping malformed query timestamp"),
            }
        }
        normalized.sort();
        normalized.dedup();

        let mut result = Vec::new();
        let mut stmt = conn.prepare(&format!("{select_sql} WHERE timestamp = ?1"))?;
        for key in &normalized {
            let mut rows = stmt.query(params![key])?;
            while let Some(row) = rows.next()? {
                let record = Self::row_to_record(&columns, row)?;
                if !record.is_all_null() {
                    result.push(record);
                }
            }
        }
        Ok(result)
    }

    /// Every row in the table. No ordering guarantee.
    pub fn query_all(&self) -> Result<Vec<Record>, EngineError> {
        let conn = self.connect()?;
        let columns = Self::table_columns(&conn)?;

        let mut stmt = conn.prepare(&Self::select_sql(&columns))?;
        let mut rows = stmt.query([])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push(Self::row_to_record(&columns, row)?);
        }
        Ok(result)
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> Result<usize, EngineError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM prediction", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.len()? == 0)
    }

    /// Column names of the prediction table, in declaration order.
    fn table_columns(conn: &Connection) -> Result<Vec<String>, EngineError> {
        let mut stmt = conn.prepare("PRAGMA table_info(prediction)")?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn select_sql(columns: &[String]) -> String {
        let list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {list} FROM prediction")
    }

    /// Extend the table with any columns the batch introduces.
    ///
    /// This is the explicit migration step for schema-less column growth:
    /// each new field becomes an ALTER TABLE ADD COLUMN, and the stored
    /// schema_version is bumped once per migrating batch. Column affinity
    /// follows the first non-null value seen for the field (numbers → REAL,
    /// text → TEXT; all-null fields default to REAL).
    fn ensure_columns(conn: &Connection, records: &[Record]) -> Result<(), EngineError> {
        let existing: BTreeSet<String> = Self::table_columns(conn)?.into_iter().collect();

        let mut pending: BTreeMap<&str, Option<&FieldValue>> = BTreeMap::new();
        for record in records {
            for (field, value) in &record.columns {
                if field == "timestamp" || existing.contains(field) {
                    continue;
                }
                let slot = pending.entry(field.as_str()).or_insert(None);
                if slot.is_none() {
                    *slot = value.as_ref();
                }
            }
        }

        if pending.is_empty() {
            return Ok(());
        }

        for (field, sample) in &pending {
            let affinity = match sample {
                Some(FieldValue::Text(_)) => "TEXT",
                _ => "REAL",
            };
            conn.execute(
                &format!(
                    "ALTER TABLE prediction ADD COLUMN {} {affinity}",
                    quote_ident(field)
                ),
                [],
            )?;
            info!(field = %field, affinity, "added prediction column");
        }

        conn.execute(
            "UPDATE metadata SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT) \
             WHERE key = 'schema_version'",
            [],
        )?;

        Ok(())
    }

    fn row_to_record(columns: &[String], row: &rusqlite::Row) -> Result<Record, EngineError> {
        let mut record = Record::new(String::new());
        for (idx, name) in columns.iter().enumerate() {
            if name == "timestamp" {
                record.timestamp = row.get(idx)?;
                continue;
            }
            let value = match row.get_ref(idx)? {
                ValueRef::Null => None,
                ValueRef::Integer(i) => Some(FieldValue::Number(i as f64)),
                ValueRef::Real(f) => Some(FieldValue::Number(f)),
                ValueRef::Text(t) => Some(FieldValue::Text(String::from_utf8_lossy(t).into_owned())),
                ValueRef::Blob(_) => None,
            };
            record.columns.insert(name.clone(), value);
        }
        Ok(record)
    }
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Number(n) => Value::Real(*n),
        FieldValue::Text(s) => Value::Text(s.clone()),
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
