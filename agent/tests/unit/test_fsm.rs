//! Deployment record state machine tests

use tokio_test::{assert_err, assert_ok};

use edgemgr::deploy::fsm::RecordEvent;
use edgemgr::errors::ErrorKind;
use edgemgr::models::command::{Action, TargetKey, TargetKind};
use edgemgr::models::record::{DeploymentRecord, RecordState};

fn record() -> DeploymentRecord {
    DeploymentRecord::new(
        "c1",
        TargetKey::new(TargetKind::ClusterResource, "api"),
        Action::Scale,
    )
}

#[test]
fn test_record_initial_state() {
    let record = record();
    assert_eq!(record.state, RecordState::Queued);
    assert_eq!(record.attempts, 0);
    assert!(record.started_at.is_none());
    assert!(!record.is_terminal());
}

#[test]
fn test_record_success_flow() {
    let mut record = record();

    assert_ok!(record.process(RecordEvent::Start));
    assert_eq!(record.state, RecordState::InProgress);
    assert!(record.started_at.is_some());

    assert_ok!(record.process(RecordEvent::Succeed(serde_json::json!({"replicas": 3}))));
    assert_eq!(record.state, RecordState::Completed);
    assert_eq!(record.result, Some(serde_json::json!({"replicas": 3})));
    assert!(record.is_terminal());
}

#[test]
fn test_record_failure_flow() {
    let mut record = record();

    assert_ok!(record.process(RecordEvent::Start));
    assert_ok!(record.process(RecordEvent::Retry));
    record
        .process(RecordEvent::Fail {
            kind: ErrorKind::Transient,
            message: "connection reset".to_string(),
        })
        .unwrap();

    assert_eq!(record.state, RecordState::Failed);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.error_kind(), Some(ErrorKind::Transient));
    assert!(record.finished_at.is_some());
}

#[test]
fn test_expire_only_from_queued() {
    let mut queued = record();
    queued
        .process(RecordEvent::Expire("waited too long".to_string()))
        .unwrap();
    assert_eq!(queued.state, RecordState::Failed);
    assert_eq!(queued.error_kind(), Some(ErrorKind::Backpressure));
    assert_eq!(queued.attempts, 0);

    let mut running = record();
    assert_ok!(running.process(RecordEvent::Start));
    assert_err!(running.process(RecordEvent::Expire("waited too long".to_string())));
    assert_eq!(running.state, RecordState::InProgress);
}

#[test]
fn test_lost_execution_is_unknown() {
    let mut record = record();
    assert_ok!(record.process(RecordEvent::Start));
    record
        .process(RecordEvent::Lose("execution aborted".to_string()))
        .unwrap();

    assert_eq!(record.state, RecordState::Unknown);
    assert!(record.error.is_none());
    assert!(record.is_terminal());
}

#[test]
fn test_cannot_succeed_before_start() {
    let mut record = record();
    assert_err!(record.process(RecordEvent::Succeed(serde_json::Value::Null)));
    assert_err!(record.process(RecordEvent::Retry));
    assert_eq!(record.state, RecordState::Queued);
}
