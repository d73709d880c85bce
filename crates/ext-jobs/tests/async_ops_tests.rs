//! Asynchronous dispatch on real runners.

use std::sync::Arc;
use std::time::Duration;

use ext_jobs::{
    ExtensionOps, JobRunner, Operation, OperationStatus, OperationTracker, OperationType,
    ThreadRunner, TokioRunner,
};
use ext_test_utils::{ExtensionFixture, Harness, TestHost};
use pretty_assertions::assert_eq;

/// Poll until the operation leaves the pending states.
async fn wait_terminal(ops: &ExtensionOps, operation_id: &str) -> Operation {
    for _ in 0..200 {
        if let Some(op) = ops.operation_status(operation_id) {
            if !op.is_pending() {
                return op;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {operation_id} did not finish");
}

fn harness() -> Harness {
    let h = Harness::new(TestHost::new());
    h.add_extension("modules", ExtensionFixture::new("base"));
    h.add_extension("modules", ExtensionFixture::new("addon").requires(["base"]));
    h.add_extension(
        "modules",
        ExtensionFixture::new("shop").package("acme/payments", "^2.0"),
    );
    h
}

fn ops(h: &Harness, runner: Arc<dyn JobRunner>) -> ExtensionOps {
    ExtensionOps::new(
        Arc::clone(&h.service),
        Arc::new(OperationTracker::default()),
        runner,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_enable_async_on_tokio() {
    let h = harness();
    let ops = ops(&h, Arc::new(TokioRunner::current().unwrap()));

    let op_id = ops.enable_async("base", false).unwrap();
    let op = wait_terminal(&ops, &op_id).await;

    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.progress, 100);
    assert!(op.started_at.is_some());
    assert!(op.completed_at.is_some());
    assert!(h.is_enabled("base"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_enable_is_recorded() {
    let h = harness();
    let ops = ops(&h, Arc::new(TokioRunner::current().unwrap()));

    let op_id = ops.enable_async("addon", false).unwrap();
    let op = wait_terminal(&ops, &op_id).await;

    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.message, "Failed to enable extension");
    assert_eq!(op.error.as_deref(), Some("Missing required extensions: base"));
    assert!(!ops.is_operation_pending("addon", OperationType::Enable));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_install_and_enable_async_installs_packages() {
    let h = harness();
    h.installer.provides("acme/payments", "2.3.1");
    let ops = ops(&h, Arc::new(ThreadRunner));

    let op_id = ops.install_and_enable_async("shop").unwrap();
    let op = wait_terminal(&ops, &op_id).await;

    assert_eq!(op.status, OperationStatus::Completed);
    let result = op.result.unwrap();
    assert_eq!(
        result["dependencies_result"]["data"]["packages"],
        serde_json::json!(["acme/payments"])
    );
    assert_eq!(result["enable_result"]["success"], serde_json::json!(true));
    assert!(h.is_enabled("shop"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_same_extension_jobs_are_serialized() {
    let h = harness();
    let ops = ops(&h, Arc::new(TokioRunner::current().unwrap()));

    let ids: Vec<String> = (0..4)
        .map(|_| ops.enable_async("base", false).unwrap())
        .collect();
    for id in &ids {
        let op = wait_terminal(&ops, id).await;
        assert_eq!(op.status, OperationStatus::Completed);
    }

    assert_eq!(h.events.kinds().len(), 1);
    assert_eq!(ops.extension_operations("base").len(), 4);
}
