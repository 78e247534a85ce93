//! Full update-cycle integration: merge an external feed into a primary
//! table, persist the result, snapshot it, and read the history back.

use prediction_store::{
    merge, ExternalSample, FieldValue, MergeConfig, MergePolicy, MergeStatus, PredictedPoint,
    Record, ReconciliationStore, SnapshotLog, StoreConfig,
};

const TRACKED: &str = "NuclearPowerMW";

fn shared_config(dir: &tempfile::TempDir) -> StoreConfig {
    StoreConfig::new(dir.path().join("predictions.db").to_string_lossy())
}

#[test]
fn full_update_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = shared_config(&dir);

    let store = ReconciliationStore::open(config.clone()).expect("open store");
    let log = SnapshotLog::open(config).expect("open log");

    // Forecast run: three hourly predictions.
    let primary = vec![
        Record::new("2024-03-01T00:00:00Z").with_number("PredictedPrice", 41.5),
        Record::new("2024-03-01T01:00:00Z").with_number("PredictedPrice", 43.0),
        Record::new("2024-03-01T02:00:00Z").with_number("PredictedPrice", 39.8),
    ];

    // External generation feed at sub-hourly granularity; the middle hour
    // reports nothing.
    let secondary = vec![
        ExternalSample::new("2024-03-01T00:00:00Z", 2700.0),
        ExternalSample::new("2024-03-01T00:30:00Z", 2800.0),
        ExternalSample::new("2024-03-01T02:00:00Z", 2600.0),
    ];

    let outcome = merge(
        &primary,
        &secondary,
        &MergeConfig::hourly(TRACKED),
        &MergePolicy::default(),
    )
    .expect("merge");
    assert_eq!(outcome.status, MergeStatus::Merged { matched: 2 });

    // Hour 0 averaged, hour 1 back-filled from hour 0, hour 2 direct.
    let tracked: Vec<Option<f64>> = outcome
        .table
        .iter()
        .map(|r| r.get(TRACKED).and_then(FieldValue::as_number))
        .collect();
    assert_eq!(tracked, vec![Some(2750.0), Some(2750.0), Some(2600.0)]);

    // Persist the enriched table.
    let report = store.upsert(&outcome.table).expect("upsert");
    assert_eq!(report.inserted.len(), 3);
    assert_eq!(report.skipped, 0);

    // A later forecast run revises one hour; nothing else may change.
    let revision = vec![Record::new("2024-03-01T01:00:00Z").with_number("PredictedPrice", 44.2)];
    let report = store.upsert(&revision).expect("upsert revision");
    assert_eq!(report.updated.len(), 1);
    assert!(report.inserted.is_empty());

    let rows = store
        .query_by_timestamps(&[
            "2024-03-01T01:00:00Z".to_string(),
            "2024-03-01T00:00:00Z".to_string(),
        ])
        .expect("query");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].timestamp, "2024-03-01T00:00:00+00:00");
    assert_eq!(
        rows[1].get("PredictedPrice"),
        Some(&FieldValue::Number(44.2))
    );
    // The revision left the merged feed value alone.
    assert_eq!(rows[1].get(TRACKED), Some(&FieldValue::Number(2750.0)));

    // Snapshot what was predicted this cycle.
    let predictions: Vec<PredictedPoint> = store
        .query_all()
        .expect("query_all")
        .into_iter()
        .map(|r| {
            let value = r.get("PredictedPrice").and_then(FieldValue::as_number);
            PredictedPoint::new(r.timestamp, value)
        })
        .collect();
    let snapshot_id = log.append(&predictions).expect("append snapshot");

    let history = log.fetch_recent(10).expect("fetch_recent");
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|row| row.snapshot_id == snapshot_id));
    let timestamps: Vec<&str> = history.iter().map(|r| r.timestamp.as_str()).collect();
    assert_eq!(
        timestamps,
        vec![
            "2024-03-01T00:00:00+00:00",
            "2024-03-01T01:00:00+00:00",
            "2024-03-01T02:00:00+00:00",
        ]
    );
}

#[test]
fn degraded_feed_still_persists_predictions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = shared_config(&dir);
    let store = ReconciliationStore::open(config).expect("open store");

    let primary = vec![Record::new("2024-03-01T00:00:00Z").with_number("PredictedPrice", 41.5)];

    // Feed returned nothing: degraded, not fatal.
    let outcome = merge(
        &primary,
        &[],
        &MergeConfig::hourly(TRACKED),
        &MergePolicy::default(),
    )
    .expect("merge");
    assert_eq!(outcome.status, MergeStatus::NoExternalData);

    let report = store.upsert(&outcome.table).expect("upsert");
    assert_eq!(report.inserted.len(), 1);
}
