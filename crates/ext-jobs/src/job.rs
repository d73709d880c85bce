//! Background jobs, one per asynchronous lifecycle verb.
//!
//! A job marks its operation as started, calls the synchronous
//! [`LifecycleService`] method and records the outcome on the tracker.
//! A panic inside a job is caught and recorded as a failure, so an
//! operation never stays `running` after its job has ended.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use ext_core::{LifecycleService, OpResult};
use serde_json::{Map, Value, json};

use crate::tracker::OperationTracker;

/// What a job needs to run.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub service: Arc<LifecycleService>,
    pub tracker: Arc<OperationTracker>,
}

/// The extension and operation a job works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTarget {
    pub extension_id: String,
    pub operation_id: String,
}

impl JobTarget {
    pub fn new(extension_id: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            operation_id: operation_id.into(),
        }
    }
}

pub trait Job: Send + Sync + 'static {
    fn target(&self) -> &JobTarget;

    /// Short name used in log records.
    fn label(&self) -> &'static str;

    fn starting_message(&self) -> &'static str;

    /// Operation message when the job panics.
    fn exception_message(&self) -> &'static str;

    /// Do the work and record completion or failure.
    fn execute(&self, ctx: &JobContext);

    /// Run the job to a terminal operation state.
    fn handle(&self, ctx: &JobContext) {
        let target = self.target();
        ctx.tracker.mark_as_started(&target.operation_id);
        ctx.tracker
            .update_progress(&target.operation_id, 10, self.starting_message());

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.execute(ctx))) {
            let error = panic_message(panic.as_ref());
            ctx.tracker
                .mark_as_failed(&target.operation_id, error.clone(), self.exception_message());
            tracing::error!(
                job = self.label(),
                id = %target.extension_id,
                operation_id = %target.operation_id,
                error = %error,
                "Job panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}

/// Record a single lifecycle result as the operation outcome.
fn finish(
    ctx: &JobContext,
    label: &str,
    target: &JobTarget,
    result: &OpResult,
    result_key: &str,
    success_message: &str,
    failure_message: &str,
) {
    if result.is_success() {
        let payload = Map::from_iter([(result_key.to_string(), result.to_json())]);
        ctx.tracker
            .mark_as_completed(&target.operation_id, payload, success_message);
        tracing::info!(
            job = label,
            id = %target.extension_id,
            operation_id = %target.operation_id,
            "Job completed"
        );
    } else {
        ctx.tracker
            .mark_as_failed(&target.operation_id, result.message.clone(), failure_message);
        tracing::warn!(
            job = label,
            id = %target.extension_id,
            operation_id = %target.operation_id,
            code = ?result.error_code,
            message = %result.message,
            "Job failed"
        );
    }
}

fn context_flag(ctx: &JobContext, target: &JobTarget, key: &str) -> bool {
    ctx.tracker
        .get_operation(&target.operation_id)
        .is_some_and(|op| op.context_flag(key))
}

/// Enable an extension; with `auto_install_deps` in the operation context,
/// install missing packages first.
#[derive(Debug, Clone)]
pub struct EnableJob {
    target: JobTarget,
}

impl EnableJob {
    pub fn new(target: JobTarget) -> Self {
        Self { target }
    }

    fn run(&self, ctx: &JobContext) -> OpResult {
        let id = &self.target.extension_id;
        let op = &self.target.operation_id;

        if context_flag(ctx, &self.target, "auto_install_deps")
            && !ctx.service.missing_packages(id).is_empty()
        {
            ctx.tracker
                .update_progress(op, 20, "Installing missing dependencies...");
            let deps = ctx.service.install_dependencies(id);
            if deps.is_failure() {
                return deps;
            }
        }

        ctx.tracker.update_progress(op, 70, "Enabling extension...");
        ctx.service.enable(id)
    }
}

impl Job for EnableJob {
    fn target(&self) -> &JobTarget {
        &self.target
    }

    fn label(&self) -> &'static str {
        "enable"
    }

    fn starting_message(&self) -> &'static str {
        "Checking extension status..."
    }

    fn exception_message(&self) -> &'static str {
        "Exception occurred during extension enable"
    }

    fn execute(&self, ctx: &JobContext) {
        let result = self.run(ctx);
        finish(
            ctx,
            self.label(),
            &self.target,
            &result,
            "enable_result",
            "Extension enabled successfully",
            "Failed to enable extension",
        );
    }
}

#[derive(Debug, Clone)]
pub struct DisableJob {
    target: JobTarget,
}

impl DisableJob {
    pub fn new(target: JobTarget) -> Self {
        Self { target }
    }
}

impl Job for DisableJob {
    fn target(&self) -> &JobTarget {
        &self.target
    }

    fn label(&self) -> &'static str {
        "disable"
    }

    fn starting_message(&self) -> &'static str {
        "Checking extension status..."
    }

    fn exception_message(&self) -> &'static str {
        "Exception occurred during extension disable"
    }

    fn execute(&self, ctx: &JobContext) {
        ctx.tracker
            .update_progress(&self.target.operation_id, 50, "Disabling extension...");
        let result = ctx.service.disable(&self.target.extension_id);
        finish(
            ctx,
            self.label(),
            &self.target,
            &result,
            "disable_result",
            "Extension disabled successfully",
            "Failed to disable extension",
        );
    }
}

/// Install missing packages; with `auto_enable` in the operation context,
/// enable the extension afterwards.
///
/// A failed follow-up enable still completes the operation, with a
/// `warning` in the result payload.
#[derive(Debug, Clone)]
pub struct InstallDepsJob {
    target: JobTarget,
}

impl InstallDepsJob {
    pub fn new(target: JobTarget) -> Self {
        Self { target }
    }
}

impl Job for InstallDepsJob {
    fn target(&self) -> &JobTarget {
        &self.target
    }

    fn label(&self) -> &'static str {
        "install_deps"
    }

    fn starting_message(&self) -> &'static str {
        "Checking dependencies..."
    }

    fn exception_message(&self) -> &'static str {
        "Exception occurred during dependency installation"
    }

    fn execute(&self, ctx: &JobContext) {
        let id = &self.target.extension_id;
        let op = &self.target.operation_id;
        let auto_enable = context_flag(ctx, &self.target, "auto_enable");

        let deps = ctx.service.install_dependencies(id);
        if deps.is_failure() {
            finish(
                ctx,
                self.label(),
                &self.target,
                &deps,
                "dependencies_result",
                "Dependencies installed successfully",
                "Failed to install dependencies",
            );
            return;
        }

        ctx.tracker
            .update_progress(op, 80, "Dependencies installed successfully");

        let mut payload = Map::from_iter([("dependencies_result".to_string(), deps.to_json())]);
        let message = if auto_enable {
            ctx.tracker.update_progress(op, 90, "Enabling extension...");
            let enabled = ctx.service.enable(id);
            let succeeded = enabled.is_success();
            payload.insert("enable_result".to_string(), enabled.to_json());
            if succeeded {
                "Dependencies installed and extension enabled successfully"
            } else {
                payload.insert(
                    "warning".to_string(),
                    Value::String("Dependencies installed but extension enable failed".to_string()),
                );
                tracing::warn!(id = %id, operation_id = %op, "Dependencies installed but enable failed");
                "Dependencies installed but failed to enable extension"
            }
        } else {
            "Dependencies installed successfully"
        };

        ctx.tracker.mark_as_completed(op, payload, message);
        tracing::info!(
            job = self.label(),
            id = %id,
            operation_id = %op,
            auto_enable,
            packages = %deps.get("packages").cloned().unwrap_or_else(|| json!([])),
            "Job completed"
        );
    }
}
