//! Append-only snapshot history.
//!
//! Each update cycle freezes the predicted values as one snapshot group plus
//! its detail rows. Groups are never mutated after creation and accumulate
//! without bound; retention is an operational concern outside the engine.
//!
//! Shares the database file (and the scoped-connection model) with
//! `ReconciliationStore`.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::{
    config::StoreConfig,
    error::EngineError,
    models::{PredictedPoint, SnapshotRow},
    store, timestamp,
};

pub struct SnapshotLog {
    config: StoreConfig,
}

impl SnapshotLog {
    /// Open the log over the shared database, applying the schema if the
    /// file is new.
    pub fn open(config: StoreConfig) -> Result<Self, EngineError> {
        let conn = store::connect(&config.db_path)?;
        conn.execute_batch(store::SCHEMA_SQL)?;
        Ok(Self { config })
    }

    /// Record one snapshot of predicted values, stamped with the current
    /// time. Returns the new snapshot id.
    ///
    /// The group row and its details are written in one transaction; an
    /// empty prediction list still creates the group. Points with malformed
    /// timestamps are skipped.
    pub fn append(&self, predictions: &[PredictedPoint]) -> Result<i64, EngineError> {
        let conn = store::connect(&self.config.db_path)?;
        let snapshot_date = timestamp::normalize_datetime(Utc::now());

        conn.execute("BEGIN IMMEDIATE", [])?;
        match Self::append_in_tx(&conn, &snapshot_date, predictions) {
            Ok(snapshot_id) => {
                conn.execute("COMMIT", [])?;
                debug!(
                    snapshot_id,
                    rows = predictions.len(),
                    %snapshot_date,
                    "appended prediction snapshot"
                );
                Ok(snapshot_id)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    fn append_in_tx(
        conn: &Connection,
        snapshot_date: &str,
        predictions: &[PredictedPoint],
    ) -> Result<i64, EngineError> {
        conn.execute(
            "INSERT INTO prediction_snapshot (snapshot_date) VALUES (?1)",
            params![snapshot_date],
        )?;
        let snapshot_id = conn.last_insert_rowid();

        let mut stmt = conn.prepare(
            "INSERT INTO snapshot_details (snapshot_id, timestamp, value) VALUES (?1, ?2, ?3)",
        )?;
        let mut skipped = 0usize;
        for point in predictions {
            let key = match timestamp::normalize(&point.timestamp) {
                Ok(key) => key,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            stmt.execute(params![snapshot_id, key, point.value])?;
        }
        if skipped > 0 {
            warn!(skipped, "dropped snapshot points with malformed timestamps");
        }

        Ok(snapshot_id)
    }

    /// Up to `limit` detail rows, most recent snapshot first, timestamps
    /// ascending within a snapshot.
    ///
    /// The limit bounds rows, not snapshot groups: a snapshot with more
    /// details than `limit` comes back truncated. Callers wanting one whole
    /// snapshot should use [`fetch_latest_snapshot`](Self::fetch_latest_snapshot).
    pub fn fetch_recent(&self, limit: usize) -> Result<Vec<SnapshotRow>, EngineError> {
        let conn = store::connect(&self.config.db_path)?;

        // snapshot_id breaks snapshot_date ties deterministically.
        let mut stmt = conn.prepare(
            "SELECT s.snapshot_id, s.snapshot_date, d.timestamp, d.value \
             FROM snapshot_details d \
             JOIN prediction_snapshot s ON s.snapshot_id = d.snapshot_id \
             ORDER BY s.snapshot_date DESC, s.snapshot_id DESC, d.timestamp ASC \
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All detail rows of the single most recent snapshot group, timestamps
    /// ascending. Empty when no snapshot has any details.
    pub fn fetch_latest_snapshot(&self) -> Result<Vec<SnapshotRow>, EngineError> {
        let conn = store::connect(&self.config.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT s.snapshot_id, s.snapshot_date, d.timestamp, d.value \
             FROM snapshot_details d \
             JOIN prediction_snapshot s ON s.snapshot_id = d.snapshot_id \
             WHERE s.snapshot_id = (SELECT snapshot_id FROM prediction_snapshot \
                                    ORDER BY snapshot_date DESC, snapshot_id DESC LIMIT 1) \
             ORDER BY d.timestamp ASC",
        )?;

        let rows = stmt
            .query_map([], Self::row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of snapshot groups recorded.
    pub fn snapshot_count(&self) -> Result<usize, EngineError> {
        let conn = store::connect(&self.config.db_path)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM prediction_snapshot", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<SnapshotRow> {
        Ok(SnapshotRow {
            snapshot_id: row.get(0)?,
            snapshot_date: row.get(1)?,
            timestamp: row.get(2)?,
            value: row.get(3)?,
        })
    }
}
