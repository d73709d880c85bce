//! The operation tracker.
//!
//! Every asynchronous lifecycle call gets an [`Operation`] record that the
//! background job updates as it runs. Records live in an [`ExpiringMap`]
//! and disappear after the retention window; callers cannot tell an expired
//! operation from one that never existed.

use std::sync::Arc;
use std::time::Duration;

use ext_core::config::TrackerConfig;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::operation::{Operation, OperationStatus, OperationType, OperationUpdate};
use crate::store::{Clock, ExpiringMap, SystemClock};

/// Retention window used when none is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Stores operation records and the per-extension operation index.
pub struct OperationTracker {
    operations: ExpiringMap<Operation>,
    by_extension: ExpiringMap<Vec<String>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTracker")
            .field("operations", &self.operations.len())
            .finish_non_exhaustive()
    }
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl OperationTracker {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(2));
        Self {
            operations: ExpiringMap::new(ttl, Arc::clone(&clock)),
            by_extension: ExpiringMap::new(ttl, Arc::clone(&clock)),
            clock,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.ttl())
    }

    // ---- writes -------------------------------------------------------

    /// Record a new queued operation and return its id.
    pub fn create_operation(
        &self,
        op_type: OperationType,
        extension_id: &str,
        context: Map<String, Value>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let operation = Operation {
            id: id.clone(),
            op_type,
            extension_id: extension_id.to_string(),
            status: OperationStatus::Queued,
            progress: 0,
            message: "Operation queued".to_string(),
            context,
            created_at: self.clock.now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        };
        self.operations.put(&id, operation);

        // One locked step, so concurrent creates for the same extension
        // cannot drop each other's ids. Expired ids are pruned on the way.
        self.by_extension.upsert(extension_id, |ids| {
            let mut ids: Vec<String> = ids
                .unwrap_or_default()
                .into_iter()
                .filter(|existing| self.operations.contains(existing))
                .collect();
            ids.push(id.clone());
            ids
        });

        tracing::debug!(operation_id = %id, id = %extension_id, op_type = %op_type, "Operation queued");
        id
    }

    /// Merge `update` into the record. Unknown or expired ids are ignored.
    pub fn update_operation(&self, operation_id: &str, update: OperationUpdate) -> bool {
        let applied = self.operations.update(operation_id, |op| op.apply(update));
        if !applied {
            tracing::debug!(operation_id = %operation_id, "Update for unknown or expired operation ignored");
        }
        applied
    }

    pub fn mark_as_started(&self, operation_id: &str) -> bool {
        let mut update = OperationUpdate::default()
            .status(OperationStatus::Running)
            .message("Operation started");
        update.started_at = Some(self.clock.now());
        self.update_operation(operation_id, update)
    }

    pub fn mark_as_completed(
        &self,
        operation_id: &str,
        result: Map<String, Value>,
        message: impl Into<String>,
    ) -> bool {
        let mut update = OperationUpdate::default()
            .status(OperationStatus::Completed)
            .progress(100)
            .message(message)
            .result(result);
        update.completed_at = Some(self.clock.now());
        self.update_operation(operation_id, update)
    }

    pub fn mark_as_failed(
        &self,
        operation_id: &str,
        error: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        let mut update = OperationUpdate::default()
            .status(OperationStatus::Failed)
            .message(message)
            .error(error);
        update.completed_at = Some(self.clock.now());
        self.update_operation(operation_id, update)
    }

    /// Set progress (clamped to `0..=100`) and the status message.
    pub fn update_progress(&self, operation_id: &str, progress: i64, message: impl Into<String>) -> bool {
        self.update_operation(
            operation_id,
            OperationUpdate::default().progress(progress).message(message),
        )
    }

    // ---- reads --------------------------------------------------------

    pub fn get_operation(&self, operation_id: &str) -> Option<Operation> {
        self.operations.get(operation_id)
    }

    /// Live operations of an extension, oldest first.
    pub fn get_operations_by_extension(&self, extension_id: &str) -> Vec<Operation> {
        self.by_extension
            .get(extension_id)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.operations.get(id))
            .collect()
    }

    /// Whether `extension_id` has a queued or running operation of `op_type`.
    pub fn is_operation_pending(&self, extension_id: &str, op_type: OperationType) -> bool {
        self.get_operations_by_extension(extension_id)
            .iter()
            .any(|op| op.op_type == op_type && op.is_pending())
    }

    /// Drop expired records. Returns how many operations were removed.
    pub fn purge_expired(&self) -> usize {
        self.by_extension.purge_expired();
        self.operations.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tracker() -> (OperationTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (OperationTracker::with_clock(DEFAULT_TTL, clock.clone()), clock)
    }

    #[test]
    fn test_create_operation_is_queued() {
        let (tracker, _) = tracker();
        let id = tracker.create_operation(
            OperationType::Enable,
            "blog",
            Map::from_iter([("auto_install_deps".to_string(), json!(true))]),
        );

        let op = tracker.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Queued);
        assert_eq!(op.progress, 0);
        assert_eq!(op.message, "Operation queued");
        assert_eq!(op.extension_id, "blog");
        assert!(op.context_flag("auto_install_deps"));
        assert!(op.started_at.is_none());
    }

    #[test]
    fn test_operation_ids_are_unique() {
        let (tracker, _) = tracker();
        let a = tracker.create_operation(OperationType::Enable, "blog", Map::new());
        let b = tracker.create_operation(OperationType::Enable, "blog", Map::new());
        assert_ne!(a, b);
        assert_eq!(tracker.get_operations_by_extension("blog").len(), 2);
    }

    #[test]
    fn test_lifecycle_of_an_operation() {
        let (tracker, clock) = tracker();
        let id = tracker.create_operation(OperationType::Disable, "blog", Map::new());

        assert!(tracker.mark_as_started(&id));
        let started = tracker.get_operation(&id).unwrap();
        assert_eq!(started.status, OperationStatus::Running);
        assert_eq!(started.message, "Operation started");
        assert_eq!(started.started_at, Some(clock.now()));

        tracker.update_progress(&id, 150, "Almost");
        assert_eq!(tracker.get_operation(&id).unwrap().progress, 100);

        let result = Map::from_iter([("disable_result".to_string(), json!({"success": true}))]);
        assert!(tracker.mark_as_completed(&id, result.clone(), "Done"));
        let done = tracker.get_operation(&id).unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.message, "Done");
        assert_eq!(done.result, Some(result));
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_mark_as_failed_keeps_progress() {
        let (tracker, _) = tracker();
        let id = tracker.create_operation(OperationType::Enable, "blog", Map::new());
        tracker.update_progress(&id, 70, "Enabling extension...");

        tracker.mark_as_failed(&id, "Extension not found", "Failed to enable extension");
        let op = tracker.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.progress, 70);
        assert_eq!(op.error.as_deref(), Some("Extension not found"));
        assert_eq!(op.message, "Failed to enable extension");
    }

    #[test]
    fn test_pending_by_type() {
        let (tracker, _) = tracker();
        let id = tracker.create_operation(OperationType::InstallDeps, "blog", Map::new());

        assert!(tracker.is_operation_pending("blog", OperationType::InstallDeps));
        assert!(!tracker.is_operation_pending("blog", OperationType::Enable));
        assert!(!tracker.is_operation_pending("other", OperationType::InstallDeps));

        tracker.mark_as_started(&id);
        assert!(tracker.is_operation_pending("blog", OperationType::InstallDeps));

        tracker.mark_as_completed(&id, Map::new(), "Completed successfully");
        assert!(!tracker.is_operation_pending("blog", OperationType::InstallDeps));
    }

    #[test]
    fn test_operations_expire_silently() {
        let (tracker, clock) = tracker();
        let id = tracker.create_operation(OperationType::Enable, "blog", Map::new());

        clock.advance(chrono::Duration::hours(2));
        assert!(tracker.get_operation(&id).is_none());
        assert!(tracker.get_operations_by_extension("blog").is_empty());
        assert!(!tracker.update_progress(&id, 50, "late"));
        assert!(tracker.get_operation(&id).is_none());
    }

    #[test]
    fn test_writes_extend_retention() {
        let (tracker, clock) = tracker();
        let id = tracker.create_operation(OperationType::Enable, "blog", Map::new());

        clock.advance(chrono::Duration::minutes(90));
        tracker.update_progress(&id, 10, "still going");
        clock.advance(chrono::Duration::minutes(90));

        assert!(tracker.get_operation(&id).is_some());
    }

    #[test]
    fn test_concurrent_creates_keep_every_index_entry() {
        let tracker = Arc::new(OperationTracker::default());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    (0..25)
                        .map(|_| tracker.create_operation(OperationType::Enable, "blog", Map::new()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let created: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        let indexed = tracker.get_operations_by_extension("blog");
        assert_eq!(indexed.len(), created.len());
        assert!(created.iter().all(|id| indexed.iter().any(|op| &op.id == id)));
        assert!(tracker.is_operation_pending("blog", OperationType::Enable));
    }

    #[test]
    fn test_index_drops_expired_ids_on_create() {
        let (tracker, clock) = tracker();
        for _ in 0..3 {
            tracker.create_operation(OperationType::Enable, "blog", Map::new());
            clock.advance(chrono::Duration::minutes(50));
        }
        // The first two operations are past retention while the index entry,
        // refreshed by every create, is still live.
        clock.advance(chrono::Duration::minutes(30));
        let fresh = tracker.create_operation(OperationType::Disable, "blog", Map::new());

        let ids = tracker.by_extension.get("blog").unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids.last(), Some(&fresh));
        assert_eq!(tracker.get_operations_by_extension("blog").len(), 2);
    }

    #[test]
    fn test_from_config_uses_ttl() {
        let config = TrackerConfig { ttl_secs: 60 };
        let tracker = OperationTracker::from_config(&config);
        let id = tracker.create_operation(OperationType::Enable, "blog", Map::new());
        assert!(tracker.get_operation(&id).is_some());
        assert_eq!(tracker.purge_expired(), 0);
    }
}
