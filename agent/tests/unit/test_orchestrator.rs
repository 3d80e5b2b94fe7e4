//! Orchestrator behavior against scripted adapters

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use edgemgr::deploy::adapter::AdapterSet;
use edgemgr::errors::ErrorKind;
use edgemgr::health::table::HealthTable;
use edgemgr::models::command::{Action, Command, TargetKey, TargetKind};
use edgemgr::models::health::{Component, ProbeResult};
use edgemgr::models::record::RecordState;
use edgemgr::models::status::ReportedState;
use edgemgr::orchestrator::{Options, Orchestrator, Rejection, SubmitOutcome};

use crate::stubs::{Behavior, RecordingSink, StubAdapter};

struct Harness {
    orchestrator: Arc<Orchestrator>,
    sink: Arc<RecordingSink>,
    health: Arc<HealthTable>,
}

fn harness(adapter: &Arc<StubAdapter>, options: Options) -> Harness {
    let health = Arc::new(HealthTable::default());
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = Arc::new(Orchestrator::new(
        options,
        AdapterSet::new().with(adapter.clone()),
        health.clone(),
        sink.clone(),
    ));
    Harness {
        orchestrator,
        sink,
        health,
    }
}

fn deploy(id: &str, target: &str, seq: u32) -> Command {
    Command::new(
        Some(id.to_string()),
        Action::Deploy,
        TargetKind::Container,
        target,
        json!({ "image": "nginx:1.25", "seq": seq }),
    )
}

fn key(target: &str) -> TargetKey {
    TargetKey::new(TargetKind::Container, target)
}

/// Let spawned drain tasks run until they block
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_completed_command_is_replayed_not_rerun() {
    let adapter = StubAdapter::always(Behavior::Succeed);
    let h = harness(&adapter, Options::default());

    let outcome = h.orchestrator.submit(deploy("c1", "web", 0));
    match outcome {
        SubmitOutcome::Accepted { position, .. } => assert_eq!(position, 0),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let events = h.sink.wait_for(1).await;
    assert_eq!(events[0].command_id, "c1");
    assert_eq!(events[0].state, ReportedState::Completed);
    assert_eq!(events[0].target_key, Some(key("web")));

    match h.orchestrator.submit(deploy("c1", "web", 0)) {
        SubmitOutcome::Rejected(Rejection::AlreadyProcessed(record)) => {
            assert_eq!(record.state, RecordState::Completed);
            assert_eq!(record.attempts, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let events = h.sink.wait_for(2).await;
    assert_eq!(events[1], events[0]);
    assert_eq!(adapter.calls(), 1);
    assert_eq!(
        h.orchestrator.record("c1").map(|r| r.state),
        Some(RecordState::Completed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_while_running_is_ignored() {
    let adapter = StubAdapter::always(Behavior::Delay(Duration::from_secs(10)));
    let h = harness(&adapter, Options::default());

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());
    settle().await;

    match h.orchestrator.submit(deploy("c1", "web", 0)) {
        SubmitOutcome::Rejected(Rejection::InFlight(id)) => assert_eq!(id, "c1"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        h.orchestrator.record("c1").map(|r| r.state),
        Some(RecordState::InProgress)
    );

    let events = h.sink.wait_for(1).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, ReportedState::Completed);
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_same_target_runs_one_at_a_time_in_order() {
    let adapter = StubAdapter::always(Behavior::Delay(Duration::from_secs(1)));
    let h = harness(&adapter, Options::default());

    for seq in 0..8 {
        let outcome = h.orchestrator.submit(deploy(&format!("c{seq}"), "web", seq));
        assert!(outcome.is_accepted());
    }
    assert_eq!(h.orchestrator.inflight(), 8);

    let events = h.sink.wait_for(8).await;
    assert_eq!(adapter.max_active(), 1);

    let seqs: Vec<u64> = adapter
        .log()
        .iter()
        .map(|(_, payload)| payload["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, (0..8).collect::<Vec<u64>>());

    let ids: Vec<&str> = events.iter().map(|e| e.command_id.as_str()).collect();
    assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4", "c5", "c6", "c7"]);
    assert_eq!(h.orchestrator.inflight(), 0);
    assert_eq!(h.orchestrator.history().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_slow_target_does_not_block_others() {
    let adapter = StubAdapter::new(|target, _| match target {
        "slow" => Behavior::Delay(Duration::from_secs(60)),
        _ => Behavior::Succeed,
    });
    let h = harness(&adapter, Options::default());

    assert!(h.orchestrator.submit(deploy("s1", "slow", 0)).is_accepted());
    assert!(h.orchestrator.submit(deploy("f1", "fast", 0)).is_accepted());

    let events = h.sink.wait_for(1).await;
    assert_eq!(events[0].command_id, "f1");
    assert_eq!(
        h.orchestrator.status(&key("slow")).map(|r| r.state),
        Some(RecordState::InProgress)
    );

    let events = h.sink.wait_for(2).await;
    assert_eq!(events[1].command_id, "s1");
    assert_eq!(events[1].state, ReportedState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_up_to_cap() {
    let adapter = StubAdapter::always(Behavior::Fail(ErrorKind::Transient));
    let options = Options {
        max_attempts: 3,
        ..Default::default()
    };
    let h = harness(&adapter, options);

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());

    let events = h.sink.wait_for(1).await;
    assert_eq!(events[0].state, ReportedState::Failed);
    assert_eq!(events[0].error_kind, Some(ErrorKind::Transient));
    assert_eq!(adapter.calls(), 3);

    let record = h.orchestrator.record("c1").unwrap();
    assert_eq!(record.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_then_success() {
    let adapter = StubAdapter::new(|_, call| match call {
        1 => Behavior::Fail(ErrorKind::Transient),
        _ => Behavior::Succeed,
    });
    let h = harness(&adapter, Options::default());

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());

    let events = h.sink.wait_for(1).await;
    assert_eq!(events[0].state, ReportedState::Completed);
    assert_eq!(h.orchestrator.record("c1").unwrap().attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_is_not_retried() {
    let adapter = StubAdapter::always(Behavior::Fail(ErrorKind::Permanent));
    let options = Options {
        max_attempts: 5,
        ..Default::default()
    };
    let h = harness(&adapter, options);

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());

    let events = h.sink.wait_for(1).await;
    assert_eq!(events[0].state, ReportedState::Failed);
    assert_eq!(events[0].error_kind, Some(ErrorKind::Permanent));
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_target() {
    let adapter = StubAdapter::new(|_, call| match call {
        1 => Behavior::Hang,
        _ => Behavior::Succeed,
    });
    let options = Options {
        adapter_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let h = harness(&adapter, options);

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());
    assert!(h.orchestrator.submit(deploy("c2", "web", 1)).is_accepted());

    let events = h.sink.wait_for(2).await;
    assert_eq!(events[0].command_id, "c1");
    assert_eq!(events[0].state, ReportedState::Failed);
    assert_eq!(events[0].error_kind, Some(ErrorKind::Timeout));
    assert_eq!(events[1].command_id, "c2");
    assert_eq!(events[1].state, ReportedState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_down_backend_rejects_without_calling_adapter() {
    let adapter = StubAdapter::always(Behavior::Succeed);
    let h = harness(&adapter, Options::default());
    h.health.record(
        Component::ContainerBackend,
        &ProbeResult::Unreachable("daemon socket missing".to_string()),
    );

    match h.orchestrator.submit(deploy("c1", "web", 0)) {
        SubmitOutcome::Rejected(Rejection::BackendDown(component)) => {
            assert_eq!(component, Component::ContainerBackend)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let events = h.sink.wait_for(1).await;
    assert_eq!(events[0].state, ReportedState::Rejected);
    assert_eq!(events[0].error_kind, Some(ErrorKind::Unavailable));
    assert_eq!(adapter.calls(), 0);

    // Rejected ids are not remembered
    h.health.record(Component::ContainerBackend, &ProbeResult::Alive);
    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_rejects_with_backpressure() {
    let adapter = StubAdapter::always(Behavior::Delay(Duration::from_secs(10)));
    let options = Options {
        max_queue_depth: 2,
        ..Default::default()
    };
    let h = harness(&adapter, options);

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());
    settle().await;
    assert!(h.orchestrator.submit(deploy("c2", "web", 1)).is_accepted());
    assert!(h.orchestrator.submit(deploy("c3", "web", 2)).is_accepted());
    assert_eq!(h.orchestrator.queued(&key("web")), 2);

    match h.orchestrator.submit(deploy("c4", "web", 3)) {
        SubmitOutcome::Rejected(Rejection::Backpressure(_)) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }

    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].command_id, "c4");
    assert_eq!(events[0].error_kind, Some(ErrorKind::Backpressure));

    let events = h.sink.wait_for(4).await;
    assert!(events[1..]
        .iter()
        .all(|e| e.state == ReportedState::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_queued_command_fails_at_its_ttl() {
    let adapter = StubAdapter::always(Behavior::Delay(Duration::from_secs(100)));
    let options = Options {
        command_ttl: Duration::from_secs(10),
        ..Default::default()
    };
    let h = harness(&adapter, options);

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());
    settle().await;
    assert!(h.orchestrator.submit(deploy("c2", "web", 1)).is_accepted());

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(h.sink.events().is_empty());
    assert_eq!(
        h.orchestrator.record("c2").map(|r| r.state),
        Some(RecordState::Queued)
    );

    // Expires while c1 is still running, not when it reaches the head
    tokio::time::sleep(Duration::from_secs(2)).await;
    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].command_id, "c2");
    assert_eq!(events[0].state, ReportedState::Failed);
    assert_eq!(events[0].error_kind, Some(ErrorKind::Backpressure));

    assert_eq!(h.orchestrator.queued(&key("web")), 0);
    assert_eq!(
        h.orchestrator.status(&key("web")).map(|r| (r.command_id, r.state)),
        Some(("c1".to_string(), RecordState::InProgress))
    );

    let events = h.sink.wait_for(2).await;
    assert_eq!(events[1].command_id, "c1");
    assert_eq!(events[1].state, ReportedState::Completed);
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_started_command_is_not_expired() {
    let adapter = StubAdapter::always(Behavior::Delay(Duration::from_secs(20)));
    let options = Options {
        command_ttl: Duration::from_secs(10),
        ..Default::default()
    };
    let h = harness(&adapter, options);

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());

    let events = h.sink.wait_for(1).await;
    assert_eq!(events[0].state, ReportedState::Completed);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.sink.events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_marks_aborted_work_unknown() {
    let adapter = StubAdapter::always(Behavior::Hang);
    let h = harness(&adapter, Options::default());

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());
    settle().await;
    assert!(h.orchestrator.submit(deploy("c2", "web", 1)).is_accepted());

    h.orchestrator.shutdown(Duration::from_secs(5)).await;

    let events = h.sink.wait_for(2).await;
    assert_eq!(events[0].command_id, "c1");
    assert_eq!(events[0].state, ReportedState::Unknown);
    assert_eq!(events[1].command_id, "c2");
    assert_eq!(events[1].state, ReportedState::Failed);

    match h.orchestrator.submit(deploy("c3", "web", 2)) {
        SubmitOutcome::Rejected(Rejection::ShuttingDown) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_running_command() {
    let adapter = StubAdapter::always(Behavior::Delay(Duration::from_secs(2)));
    let h = harness(&adapter, Options::default());

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());
    settle().await;

    h.orchestrator.shutdown(Duration::from_secs(10)).await;

    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, ReportedState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_adapter_does_not_wedge_target() {
    let adapter = StubAdapter::new(|_, call| match call {
        1 => Behavior::Panic,
        _ => Behavior::Succeed,
    });
    let h = harness(&adapter, Options::default());

    assert!(h.orchestrator.submit(deploy("c1", "web", 0)).is_accepted());
    assert!(h.orchestrator.submit(deploy("c2", "web", 1)).is_accepted());

    let events = h.sink.wait_for(2).await;
    assert_eq!(events[0].command_id, "c1");
    assert_eq!(events[0].state, ReportedState::Unknown);
    assert_eq!(events[1].command_id, "c2");
    assert_eq!(events[1].state, ReportedState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_target_name_is_rejected() {
    let adapter = StubAdapter::always(Behavior::Succeed);
    let h = harness(&adapter, Options::default());

    match h.orchestrator.submit(deploy("c1", "bad name", 0)) {
        SubmitOutcome::Rejected(Rejection::Invalid(_)) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }

    let events = h.sink.wait_for(1).await;
    assert_eq!(events[0].state, ReportedState::Rejected);
    assert_eq!(events[0].error_kind, Some(ErrorKind::Validation));
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unconfigured_backend_is_unavailable() {
    let adapter = StubAdapter::always(Behavior::Succeed);
    let h = harness(&adapter, Options::default());

    let command = Command::new(
        Some("k1".to_string()),
        Action::Scale,
        TargetKind::ClusterResource,
        "api",
        json!({ "replicas": 3 }),
    );
    match h.orchestrator.submit(command) {
        SubmitOutcome::Rejected(Rejection::NoBackend(kind)) => {
            assert_eq!(kind, TargetKind::ClusterResource)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.sink.events()[0].error_kind, Some(ErrorKind::Unavailable));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_keep_target_exclusive() {
    const N: usize = 32;
    let adapter = StubAdapter::always(Behavior::Delay(Duration::from_millis(5)));
    let options = Options {
        max_queue_depth: N,
        ..Default::default()
    };
    let h = harness(&adapter, options);

    let submitters: Vec<_> = (0..N)
        .map(|seq| {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .submit(deploy(&format!("c{seq}"), "web", seq as u32))
                    .is_accepted()
            })
        })
        .collect();
    for submitter in submitters {
        assert!(submitter.await.unwrap());
    }

    let events = h.sink.wait_for(N).await;
    assert_eq!(events.len(), N);
    assert!(events.iter().all(|e| e.state == ReportedState::Completed));
    assert_eq!(adapter.max_active(), 1);
    assert_eq!(adapter.calls() as usize, N);
    assert_eq!(h.orchestrator.inflight(), 0);
}
