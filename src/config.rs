//! Engine configuration.

use chrono::Duration;

/// Location of the SQLite database backing the reconciliation table and the
/// snapshot log. Both components share one file.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "./predictions.db".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let db_path = std::env::var("PREDICTION_DB_PATH")
            .unwrap_or_else(|_| "./predictions.db".to_string());

        Self { db_path }
    }
}

/// Settings for merging an external series onto the primary table.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// The column populated from the secondary source.
    pub tracked_field: String,
    /// Period of the primary table's timestamp grid. Secondary samples are
    /// averaged into buckets of this size before alignment.
    pub grid: Duration,
}

impl MergeConfig {
    pub fn new(tracked_field: impl Into<String>, grid: Duration) -> Self {
        Self {
            tracked_field: tracked_field.into(),
            grid,
        }
    }

    /// The common case: an hourly primary grid fed by a sub-hourly source.
    pub fn hourly(tracked_field: impl Into<String>) -> Self {
        Self::new(tracked_field, Duration::hours(1))
    }
}
