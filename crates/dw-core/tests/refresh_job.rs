//! Refresh job over a multi-device source: scoring, failure marking and
//! per-device error isolation.

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use dw_common::DeviceId;
use dw_config::{ColumnMapping, ColumnMetric, FeatureWeight, ModelParams, RefreshWindow};
use dw_core::{
    AssetRegistry, FailureRule, LogisticModel, MemoryAssetRegistry, MemoryScoreStore,
    MemorySource, Pipeline, RefreshJob, RunStage, ScoreStore,
};
use dw_telemetry::{drive_schema, parse_records, samples_from_records, TelemetrySample};

const RECORDS: &str = r#"
{"date": "2016-01-01", "serial_number": "A100", "failure": 0, "smart_5_raw": 0}
{"date": "2016-01-02", "serial_number": "A100", "failure": 0, "smart_5_raw": 4}
{"date": "2016-01-03", "serial_number": "A100", "failure": 1, "smart_5_raw": 40}
{"date": "2016-01-01", "serial_number": "B200", "failure": 0, "smart_5_raw": 0}
{"date": "2016-01-02", "serial_number": "B200", "failure": 0, "smart_5_raw": 0}
{"date": "2016-03-01", "serial_number": "C300", "failure": 0, "smart_5_raw": 1}
"#;

fn mapping() -> ColumnMapping {
    ColumnMapping::from_entries(vec![
        ColumnMetric::new("failure", "Failure"),
        ColumnMetric::new("smart_5_raw", "Smart5Raw"),
    ])
    .unwrap()
}

fn samples() -> Vec<TelemetrySample> {
    samples_from_records(&parse_records(RECORDS).unwrap(), &mapping()).unwrap()
}

fn pipeline(store: Arc<MemoryScoreStore>) -> Pipeline {
    let model = LogisticModel::from_params(&ModelParams {
        name: "smart5".into(),
        output_column: "1.0".into(),
        intercept: -2.0,
        weights: vec![FeatureWeight {
            metric: "Smart5Raw".into(),
            weight: 0.1,
        }],
    });
    Pipeline::builder(drive_schema(&mapping()).unwrap(), Arc::new(model), store).build()
}

fn january(force_reeval: bool) -> RefreshWindow {
    RefreshWindow {
        start: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2016, 2, 1).unwrap(),
        force_reeval,
    }
}

#[test]
fn scores_window_and_marks_failed_devices() {
    let store = Arc::new(MemoryScoreStore::new());
    let pipeline = pipeline(store.clone());
    let registry = MemoryAssetRegistry::new();
    let source = MemorySource::from_samples(samples());

    let summary = RefreshJob::new(&pipeline, &registry, FailureRule::new(0.0), january(true))
        .run(&source)
        .unwrap();

    assert_eq!(summary.devices, 3);
    assert_eq!(summary.scored, 2);
    assert_eq!(summary.rows, 5);
    // C300 only has data in March.
    assert_eq!(summary.no_data, 1);
    assert!(summary.is_clean());
    assert_eq!(summary.marked_failed, vec![DeviceId::new("A100")]);

    let status = registry.status(&DeviceId::new("A100")).unwrap().unwrap();
    assert_eq!(
        status.failure_date,
        Utc.with_ymd_and_hms(2016, 1, 3, 0, 0, 0).unwrap()
    );
    assert!(registry.status(&DeviceId::new("B200")).unwrap().is_none());
    assert!(store.history(&DeviceId::new("C300")).unwrap().is_empty());
    assert_eq!(store.len(), 5);
}

#[test]
fn broken_device_does_not_stop_the_others() {
    let mut batch = samples();
    // A100's second day loses its smart_5 reading.
    batch[1] = batch[1].clone().with_null("smart_5_raw");

    let store = Arc::new(MemoryScoreStore::new());
    let pipeline = pipeline(store.clone());
    let registry = MemoryAssetRegistry::new();
    let summary = RefreshJob::new(&pipeline, &registry, FailureRule::new(0.0), january(true))
        .run(&MemorySource::from_samples(batch))
        .unwrap();

    assert_eq!(summary.scored, 1);
    assert_eq!(summary.errors.len(), 1);
    let failure = &summary.errors[0];
    assert_eq!(failure.device.as_str(), "A100");
    assert_eq!(failure.stage, Some(RunStage::Assemble));
    assert_eq!(failure.code, 22);
    assert!(!summary.is_clean());

    assert!(store.history(&DeviceId::new("A100")).unwrap().is_empty());
    assert_eq!(store.history(&DeviceId::new("B200")).unwrap().len(), 2);
    // The failure rule reads the raw flag, not the scores.
    assert_eq!(summary.marked_failed, vec![DeviceId::new("A100")]);
}

#[test]
fn without_force_current_devices_are_skipped() {
    let store = Arc::new(MemoryScoreStore::new());
    let pipeline = pipeline(store.clone());
    let registry = MemoryAssetRegistry::new();
    let source = MemorySource::from_samples(samples());

    RefreshJob::new(&pipeline, &registry, FailureRule::new(0.0), january(true))
        .run(&source)
        .unwrap();
    let before = store.history(&DeviceId::new("A100")).unwrap();

    let summary = RefreshJob::new(&pipeline, &registry, FailureRule::new(0.0), january(false))
        .run(&source)
        .unwrap();
    assert_eq!(summary.skipped_current, 2);
    assert_eq!(summary.scored, 0);
    assert_eq!(store.history(&DeviceId::new("A100")).unwrap(), before);
    // Failure marking still runs for skipped devices.
    assert_eq!(summary.marked_failed, vec![DeviceId::new("A100")]);
}

#[test]
fn repeated_refresh_keeps_earliest_failure_date() {
    let store = Arc::new(MemoryScoreStore::new());
    let pipeline = pipeline(store);
    let registry = MemoryAssetRegistry::new();
    let mut batch = samples();
    batch.push(
        samples_from_records(
            &parse_records(
                r#"{"date": "2016-01-09", "serial_number": "A100", "failure": 1, "smart_5_raw": 41}"#,
            )
            .unwrap(),
            &mapping(),
        )
        .unwrap()
        .remove(0),
    );

    RefreshJob::new(&pipeline, &registry, FailureRule::new(0.0), january(true))
        .run(&MemorySource::from_samples(samples()))
        .unwrap();
    RefreshJob::new(&pipeline, &registry, FailureRule::new(0.0), january(true))
        .run(&MemorySource::from_samples(batch))
        .unwrap();

    let status = registry.status(&DeviceId::new("A100")).unwrap().unwrap();
    assert_eq!(
        status.failure_date,
        Utc.with_ymd_and_hms(2016, 1, 3, 0, 0, 0).unwrap()
    );
}

#[test]
fn custom_failure_field_and_threshold() {
    let store = Arc::new(MemoryScoreStore::new());
    let pipeline = pipeline(store);
    let registry = MemoryAssetRegistry::new();
    let summary = RefreshJob::new(&pipeline, &registry, FailureRule::new(10.0), january(true))
        .failure_field("smart_5_raw")
        .run(&MemorySource::from_samples(samples()))
        .unwrap();
    // A100's latest smart_5 is 40, B200's is 0.
    assert_eq!(summary.marked_failed, vec![DeviceId::new("A100")]);
}
