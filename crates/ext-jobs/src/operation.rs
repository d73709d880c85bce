//! Tracked operation records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The lifecycle verb an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Enable,
    Disable,
    InstallDeps,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::InstallDeps => "install_deps",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    /// Queued or running.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one asynchronous lifecycle call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub extension_id: String,
    pub status: OperationStatus,
    /// Percentage, always within `0..=100`.
    pub progress: u8,
    pub message: String,
    /// Caller-supplied options such as `auto_enable`.
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Map<String, Value>>,
}

impl Operation {
    /// Boolean context option; absent or non-boolean values read as `false`.
    pub fn context_flag(&self, key: &str) -> bool {
        self.context.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub(crate) fn apply(&mut self, update: OperationUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(started_at) = update.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            self.completed_at = Some(completed_at);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        self.context.extend(update.context);
    }
}

/// Partial update merged into an existing [`Operation`].
///
/// Unset fields keep their current value; context entries are merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationUpdate {
    pub status: Option<OperationStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Map<String, Value>>,
    pub context: Map<String, Value>,
}

impl OperationUpdate {
    pub fn status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set progress, clamped to `0..=100`.
    pub fn progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress.clamp(0, 100) as u8);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn result(mut self, result: Map<String, Value>) -> Self {
        self.result = Some(result);
        self
    }

    pub fn context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}
