//! Asynchronous lifecycle calls and operation-aware queries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ext_core::{Extension, LifecycleService};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::Result;
use crate::job::{DisableJob, EnableJob, InstallDepsJob, Job, JobContext, JobTarget};
use crate::operation::{Operation, OperationStatus, OperationType};
use crate::runner::JobRunner;
use crate::tracker::OperationTracker;

const RECENT_OPERATIONS: usize = 10;

/// One mutex per extension id, so jobs for the same extension never overlap.
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn get(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

/// An extension with its tracked operations and what can be done with it.
#[derive(Debug, Clone)]
pub struct ExtensionOverview {
    pub extension: Extension,
    pub can_enable: bool,
    pub can_disable: bool,
    pub missing_packages: Vec<String>,
    pub has_pending_operations: bool,
    pub operations: Vec<Operation>,
}

impl ExtensionOverview {
    pub fn to_json(&self) -> Value {
        json!({
            "extension": self.extension.to_json(),
            "status": {
                "can_enable": self.can_enable,
                "can_disable": self.can_disable,
                "missing_packages": self.missing_packages,
                "has_pending_operations": self.has_pending_operations,
            },
            "operations": self.operations,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl OperationCounts {
    fn count(&mut self, status: OperationStatus) {
        match status {
            OperationStatus::Queued => self.queued += 1,
            OperationStatus::Running => self.running += 1,
            OperationStatus::Completed => self.completed += 1,
            OperationStatus::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationsSummary {
    pub total_extensions: usize,
    pub enabled_extensions: usize,
    pub broken_extensions: usize,
    pub operations: OperationCounts,
    /// Newest first, at most ten.
    pub recent_operations: Vec<Operation>,
}

/// Dispatches lifecycle calls as tracked background jobs.
///
/// Every `*_async` method records a queued operation, submits the job to
/// the runner and returns the operation id without waiting.
#[derive(Clone)]
pub struct ExtensionOps {
    ctx: JobContext,
    runner: Arc<dyn JobRunner>,
    locks: Arc<KeyedLocks>,
}

impl std::fmt::Debug for ExtensionOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionOps")
            .field("tracker", &self.ctx.tracker)
            .finish_non_exhaustive()
    }
}

impl ExtensionOps {
    pub fn new(
        service: Arc<LifecycleService>,
        tracker: Arc<OperationTracker>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        Self {
            ctx: JobContext { service, tracker },
            runner,
            locks: Arc::new(KeyedLocks::default()),
        }
    }

    pub fn service(&self) -> &Arc<LifecycleService> {
        &self.ctx.service
    }

    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.ctx.tracker
    }

    fn queue(&self, op_type: OperationType, id: &str, context: Map<String, Value>) -> JobTarget {
        let operation_id = self.ctx.tracker.create_operation(op_type, id, context);
        JobTarget::new(id, operation_id)
    }

    fn dispatch<J: Job>(&self, job: J) -> Result<String> {
        let target = job.target().clone();
        let ctx = self.ctx.clone();
        let lock = self.locks.get(&target.extension_id);

        let submitted = self.runner.submit(Box::new(move || {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            job.handle(&ctx);
        }));

        if let Err(e) = submitted {
            tracing::error!(id = %target.extension_id, operation_id = %target.operation_id, error = %e, "Failed to dispatch job");
            self.ctx
                .tracker
                .mark_as_failed(&target.operation_id, e.to_string(), "Failed to dispatch operation");
            return Err(e);
        }

        tracing::debug!(id = %target.extension_id, operation_id = %target.operation_id, "Job dispatched");
        Ok(target.operation_id)
    }

    // ---- dispatch -----------------------------------------------------

    pub fn enable_async(&self, id: &str, auto_install_deps: bool) -> Result<String> {
        let context = Map::from_iter([("auto_install_deps".to_string(), json!(auto_install_deps))]);
        let target = self.queue(OperationType::Enable, id, context);
        self.dispatch(EnableJob::new(target))
    }

    pub fn disable_async(&self, id: &str) -> Result<String> {
        let target = self.queue(OperationType::Disable, id, Map::new());
        self.dispatch(DisableJob::new(target))
    }

    pub fn install_deps_async(&self, id: &str, auto_enable: bool) -> Result<String> {
        let context = Map::from_iter([("auto_enable".to_string(), json!(auto_enable))]);
        let target = self.queue(OperationType::InstallDeps, id, context);
        self.dispatch(InstallDepsJob::new(target))
    }

    /// Dependency installation followed by enable, as one operation.
    pub fn install_and_enable_async(&self, id: &str) -> Result<String> {
        self.install_deps_async(id, true)
    }

    // ---- queries ------------------------------------------------------

    pub fn operation_status(&self, operation_id: &str) -> Option<Operation> {
        self.ctx.tracker.get_operation(operation_id)
    }

    pub fn extension_operations(&self, id: &str) -> Vec<Operation> {
        self.ctx.tracker.get_operations_by_extension(id)
    }

    pub fn is_operation_pending(&self, id: &str, op_type: OperationType) -> bool {
        self.ctx.tracker.is_operation_pending(id, op_type)
    }

    pub fn extension_with_operations(&self, id: &str) -> Result<Option<ExtensionOverview>> {
        let Some(extension) = self.ctx.service.get(id)? else {
            return Ok(None);
        };

        let operations = self.extension_operations(id);
        let missing_packages = self.ctx.service.missing_packages(id);

        Ok(Some(ExtensionOverview {
            can_enable: missing_packages.is_empty() && !extension.is_enabled(),
            can_disable: extension.is_enabled() && !self.ctx.service.is_protected(id),
            has_pending_operations: operations.iter().any(Operation::is_pending),
            missing_packages,
            operations,
            extension,
        }))
    }

    pub fn all_with_operations(&self) -> Result<Vec<ExtensionOverview>> {
        let mut result = Vec::new();
        for extension in self.ctx.service.all()? {
            if let Some(overview) = self.extension_with_operations(extension.id())? {
                result.push(overview);
            }
        }
        Ok(result)
    }

    /// Extension counts, operation counts per status and the latest operations.
    pub fn operations_summary(&self) -> Result<OperationsSummary> {
        let extensions = self.ctx.service.all()?;
        let mut counts = OperationCounts::default();
        let mut recent = Vec::new();

        for extension in &extensions {
            for op in self.extension_operations(extension.id()) {
                counts.count(op.status);
                recent.push(op);
            }
        }
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(RECENT_OPERATIONS);

        Ok(OperationsSummary {
            total_extensions: extensions.len(),
            enabled_extensions: extensions.iter().filter(|e| e.is_enabled()).count(),
            broken_extensions: extensions.iter().filter(|e| e.is_broken()).count(),
            operations: counts,
            recent_operations: recent,
        })
    }
}
