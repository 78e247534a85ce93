//! External series merge.
//!
//! Aligns a secondary `(timestamp, value)` series onto the primary table's
//! grid: samples are averaged into grid-period buckets, buckets are joined
//! outer-left against the primary rows by canonical timestamp, field
//! collisions are resolved by an explicit policy, and remaining holes in the
//! tracked field are forward-filled from the most recent prior value.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::{
    config::MergeConfig,
    error::EngineError,
    models::{ExternalSample, FieldValue, Record},
    timestamp,
};

/// Which side of the merge supplies a field's value when both have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSide {
    Primary,
    Secondary,
}

/// Per-field conflict resolution.
///
/// The winning side only wins when its value is non-null; otherwise the
/// other side's value is kept. The default policy lets the secondary (more
/// recently fetched) side win everywhere.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    default: ConflictSide,
    overrides: BTreeMap<String, ConflictSide>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::secondary_wins()
    }
}

impl MergePolicy {
    pub fn secondary_wins() -> Self {
        Self {
            default: ConflictSide::Secondary,
            overrides: BTreeMap::new(),
        }
    }

    pub fn primary_wins() -> Self {
        Self {
            default: ConflictSide::Primary,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, field: impl Into<String>, side: ConflictSide) -> Self {
        self.overrides.insert(field.into(), side);
        self
    }

    pub fn winner(&self, field: &str) -> ConflictSide {
        self.overrides.get(field).copied().unwrap_or(self.default)
    }
}

/// How a merge went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    /// `matched` primary rows received an aligned secondary value.
    Merged { matched: usize },
    /// The secondary contributed nothing; the primary table came back
    /// unchanged. Degraded but continuable.
    NoExternalData,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub table: Vec<Record>,
    pub status: MergeStatus,
}

/// Merge a secondary series into the primary table.
///
/// Every primary row is kept, in order; unmatched secondary buckets are
/// discarded. Callers keep the primary sorted ascending by timestamp, which
/// is also the order forward-fill walks.
pub fn merge(
    primary: &[Record],
    secondary: &[ExternalSample],
    config: &MergeConfig,
    policy: &MergePolicy,
) -> Result<MergeOutcome, EngineError> {
    let resampled = resample(secondary, config.grid);

    if resampled.is_empty() {
        warn!(
            field = %config.tracked_field,
            "no external data to merge; returning primary table unchanged"
        );
        return Ok(MergeOutcome {
            table: primary.to_vec(),
            status: MergeStatus::NoExternalData,
        });
    }

    let mut table = Vec::with_capacity(primary.len());
    let mut matched = 0usize;

    for row in primary {
        let key = match timestamp::normalize(&row.timestamp) {
            Ok(key) => key,
            Err(_) => {
                // Primary rows are never dropped; an unparseable key just
                // cannot be aligned.
                debug!(ts = %row.timestamp, "unparseable primary timestamp; row kept unaligned");
                table.push(row.clone());
                continue;
            }
        };

        let mut merged = Record {
            timestamp: key.clone(),
            columns: row.columns.clone(),
        };

        if let Some(mean) = resampled.get(&key) {
            matched += 1;
            apply_field(
                &mut merged,
                &config.tracked_field,
                Some(FieldValue::Number(*mean)),
                policy,
            );
        } else {
            // Make the hole explicit so forward-fill can see it.
            merged
                .columns
                .entry(config.tracked_field.clone())
                .or_insert(None);
        }

        table.push(merged);
    }

    if matched == 0 {
        warn!(
            field = %config.tracked_field,
            "external data aligned with no primary rows; returning primary table unchanged"
        );
        return Ok(MergeOutcome {
            table: primary.to_vec(),
            status: MergeStatus::NoExternalData,
        });
    }

    forward_fill(&mut table, &config.tracked_field);

    debug!(
        rows = table.len(),
        matched,
        field = %config.tracked_field,
        "merged external series into primary table"
    );

    Ok(MergeOutcome {
        table,
        status: MergeStatus::Merged { matched },
    })
}

/// Resolve one field against an incoming secondary value.
fn apply_field(row: &mut Record, field: &str, incoming: Option<FieldValue>, policy: &MergePolicy) {
    let existing = row.columns.get(field).cloned().flatten();
    let resolved = match policy.winner(field) {
        ConflictSide::Secondary => incoming.or(existing),
        ConflictSide::Primary => existing.or(incoming),
    };
    row.columns.insert(field.to_string(), resolved);
}

/// Bucket samples onto the grid and average within each bucket. Buckets with
/// no non-null samples are absent, not zero.
fn resample(samples: &[ExternalSample], grid: Duration) -> BTreeMap<String, f64> {
    let mut buckets: BTreeMap<DateTime<Utc>, (f64, u32)> = BTreeMap::new();
    let mut skipped = 0usize;

    for sample in samples {
        let Some(value) = sample.value else { continue };
        let instant = match timestamp::parse_instant(&sample.timestamp) {
            Ok(instant) => instant,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        let entry = buckets.entry(floor_to_grid(instant, grid)).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    if skipped > 0 {
        debug!(skipped, "dropped external samples with malformed timestamps");
    }

    buckets
        .into_iter()
        .map(|(bucket, (sum, count))| {
            (
                timestamp::normalize_datetime(bucket),
                sum / f64::from(count),
            )
        })
        .collect()
}

fn floor_to_grid(instant: DateTime<Utc>, grid: Duration) -> DateTime<Utc> {
    let step = grid.num_seconds().max(1);
    let floored = instant.timestamp().div_euclid(step) * step;
    DateTime::from_timestamp(floored, 0).unwrap_or(instant)
}

/// Replace nulls in `field` with the most recent prior non-null value.
/// A leading run of nulls stays null.
fn forward_fill(table: &mut [Record], field: &str) {
    let mut last: Option<FieldValue> = None;
    for row in table.iter_mut() {
        match row.columns.get(field) {
            Some(Some(value)) => last = Some(value.clone()),
            _ => {
                if let Some(value) = &last {
                    row.columns.insert(field.to_string(), Some(value.clone()));
                }
            }
        }
    }
}
