//! Time-series reconciliation and snapshot engine for forecast data.
//!
//! Keeps a local SQLite table of predicted values (one row per canonical UTC
//! timestamp) consistent as new forecast runs and external reference feeds
//! arrive: timestamps are normalized to a single key format, batches are
//! applied as never-deleting upserts, a secondary series can be merged onto
//! the primary grid with explicit collision handling and forward-fill, and
//! every update cycle can be frozen into an append-only snapshot history for
//! later drift analysis.
//!
//! Fetching remote data is the caller's job; the engine only consumes
//! `(timestamp, value)` sequences and [`Record`] batches.

pub mod config;
pub mod error;
pub mod merge;
pub mod models;
pub mod snapshot;
pub mod store;
pub mod timestamp;

pub use config::{MergeConfig, StoreConfig};
pub use error::EngineError;
pub use merge::{merge, ConflictSide, MergeOutcome, MergePolicy, MergeStatus};
pub use models::{
    ExternalSample, FieldValue, PredictedPoint, Record, SnapshotRow, UpsertReport,
};
pub use snapshot::SnapshotLog;
pub use store::ReconciliationStore;
