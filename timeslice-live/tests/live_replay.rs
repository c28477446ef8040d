use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use timeslice_core::{ReplayConfig, SliceError};
use timeslice_fhir::{slice_bundle, Bundle, SnapshotWriter};
use timeslice_live::{
    discover_slices, replay, PredictionClient, ReplayError, Scheduler, SchedulerError,
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_slices(root: &Path) {
    let writer = SnapshotWriter::new(root);
    for (patient, times) in [
        ("p1", ["2019-03-01T10:00:00+01:00", "2019-03-02T10:00:00+01:00"]),
        ("p2", ["2019-03-01T10:00:00+01:00", "2019-03-05T08:15:00Z"]),
    ] {
        let bundle = Bundle::from_value(json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [
                { "resource": { "resourceType": "Patient", "id": patient } },
                { "resource": { "resourceType": "Observation", "effectiveDateTime": times[0] } },
                { "resource": { "resourceType": "Observation", "effectiveDateTime": times[1] } }
            ]
        }))
        .unwrap();
        slice_bundle(&bundle, &writer).unwrap();
    }
}

fn client_for(server: &MockServer) -> Arc<PredictionClient> {
    let config = ReplayConfig {
        endpoint: format!("{}/predict", server.uri()),
        ..ReplayConfig::default()
    };
    Arc::new(PredictionClient::new(&config).unwrap())
}

#[test]
fn discovers_only_timestamp_directories() {
    let root = tempfile::tempdir().unwrap();
    write_slices(root.path());
    fs::create_dir(root.path().join("notes")).unwrap();
    fs::write(root.path().join("2019-03-09T00_00_00Z"), "a file, not a slice").unwrap();

    let slices = discover_slices(root.path()).unwrap();
    let names: Vec<_> = slices
        .iter()
        .map(|slice| slice.path.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(
        names,
        [
            "2019-03-01T10_00_00+01_00",
            "2019-03-02T10_00_00+01_00",
            "2019-03-05T08_15_00Z"
        ]
    );
}

#[tokio::test]
async fn replays_every_slice_and_stores_predictions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"risk":0.1}"#))
        .expect(4)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    write_slices(root.path());

    let scheduler = Scheduler::default();
    let summary = replay(root.path(), client_for(&server), &scheduler)
        .await
        .unwrap();
    scheduler.shutdown().await;

    assert_eq!(summary.slices, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.stored, 4);
    assert_eq!(summary.skipped, 0);

    let shared = root.path().join("2019-03-01T10_00_00+01_00");
    for patient in ["p1", "p2"] {
        let prediction = shared.join(format!("{patient}.prediction.json"));
        assert_eq!(fs::read_to_string(prediction).unwrap(), r#"{"risk":0.1}"#);
    }
    assert!(root
        .path()
        .join("2019-03-05T08_15_00Z")
        .join("p2.prediction.json")
        .is_file());
}

#[tokio::test]
async fn failed_requests_are_skipped_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    write_slices(root.path());
    fs::write(
        root.path()
            .join("2019-03-02T10_00_00+01_00")
            .join("corrupt.bundle.json"),
        "{ truncated",
    )
    .unwrap();

    let scheduler = Scheduler::default();
    let summary = replay(root.path(), client_for(&server), &scheduler)
        .await
        .unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(summary.stored, 0);
    assert_eq!(summary.skipped, 5);
    assert!(!root
        .path()
        .join("2019-03-01T10_00_00+01_00")
        .join("p1.prediction.json")
        .exists());
}

#[tokio::test]
async fn missing_root_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let config = ReplayConfig::default();
    let client = Arc::new(PredictionClient::new(&config).unwrap());

    let err = replay(&root.path().join("gone"), client, &Scheduler::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::Slice(SliceError::InputNotFound(_))));
}

#[tokio::test]
async fn rejected_slices_fail_the_run_without_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(0)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    write_slices(root.path());

    let scheduler = Scheduler::default();
    scheduler.shutdown().await;

    let err = replay(root.path(), client_for(&server), &scheduler)
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::Scheduler(SchedulerError::ShutDown)));
    assert!(!root
        .path()
        .join("2019-03-01T10_00_00+01_00")
        .join("p1.prediction.json")
        .exists());
}
