//! Tracked asynchronous operations over a file-backed host.

use std::sync::Arc;
use std::time::Duration;

use ext_core::LifecycleService;
use ext_jobs::{
    ExtensionOps, ManualClock, Operation, OperationStatus, OperationTracker, OperationType,
    TokioRunner,
};
use ext_test_utils::{ExtensionFixture, RecordingRegistrar, TestHost};
use pretty_assertions::assert_eq;

async fn wait_terminal(ops: &ExtensionOps, operation_id: &str) -> Operation {
    for _ in 0..300 {
        if let Some(op) = ops.operation_status(operation_id) {
            if !op.is_pending() {
                return op;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {operation_id} did not finish");
}

fn host() -> TestHost {
    let host = TestHost::new();
    host.add_extension("modules", ExtensionFixture::new("base"));
    host.add_extension("modules", ExtensionFixture::new("addon").requires(["base"]));
    host
}

fn ops(host: &TestHost, tracker: OperationTracker) -> ExtensionOps {
    let registrar = Arc::new(RecordingRegistrar::new());
    let service = LifecycleService::builder(host.config(), registrar).build();
    ExtensionOps::new(
        Arc::new(service),
        Arc::new(tracker),
        Arc::new(TokioRunner::current().unwrap()),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dependency_gating_through_async_calls() {
    let host = host();
    let ops = ops(&host, OperationTracker::default());

    let blocked = ops.enable_async("addon", false).unwrap();
    let blocked = wait_terminal(&ops, &blocked).await;
    assert_eq!(blocked.status, OperationStatus::Failed);
    assert_eq!(blocked.error.as_deref(), Some("Missing required extensions: base"));

    let base = ops.enable_async("base", false).unwrap();
    assert_eq!(wait_terminal(&ops, &base).await.status, OperationStatus::Completed);

    let addon = ops.enable_async("addon", false).unwrap();
    assert_eq!(wait_terminal(&ops, &addon).await.status, OperationStatus::Completed);

    let disable = ops.disable_async("base").unwrap();
    let disable = wait_terminal(&ops, &disable).await;
    assert_eq!(disable.status, OperationStatus::Failed);
    assert_eq!(disable.message, "Failed to disable extension");
    assert_eq!(disable.error.as_deref(), Some("Extension is required by: addon"));

    let summary = ops.operations_summary().unwrap();
    assert_eq!(summary.enabled_extensions, 2);
    assert_eq!(summary.operations.completed, 2);
    assert_eq!(summary.operations.failed, 2);
    assert_eq!(summary.recent_operations.len(), 4);

    let overview = ops.extension_with_operations("addon").unwrap().unwrap();
    assert_eq!(overview.operations.len(), 2);
    assert!(overview.can_disable);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_operations_expire_after_configured_ttl() {
    let host = host();
    let clock = Arc::new(ManualClock::default());
    let ttl = host.config().tracker.ttl();
    let ops = ops(&host, OperationTracker::with_clock(ttl, clock.clone()));

    let op_id = ops.enable_async("base", false).unwrap();
    wait_terminal(&ops, &op_id).await;
    assert!(!ops.is_operation_pending("base", OperationType::Enable));

    clock.advance(chrono::Duration::hours(2));
    assert!(ops.operation_status(&op_id).is_none());
    assert!(ops.extension_operations("base").is_empty());
    assert_eq!(ops.operations_summary().unwrap().recent_operations.len(), 0);
}
