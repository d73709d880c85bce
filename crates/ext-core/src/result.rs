//! Outcome of lifecycle operations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Machine-readable failure reason. Callers branch on this, never on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AlreadyEnabled,
    AlreadyDisabled,
    Protected,
    RequiredBy,
    MissingExtensions,
    MissingPackages,
    InstallFailed,
    FsError,
    Exception,
    /// The extension's entry point cannot be resolved.
    Broken,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyEnabled => "already_enabled",
            Self::AlreadyDisabled => "already_disabled",
            Self::Protected => "protected",
            Self::RequiredBy => "required_by",
            Self::MissingExtensions => "missing_extensions",
            Self::MissingPackages => "missing_packages",
            Self::InstallFailed => "install_failed",
            Self::FsError => "fs_error",
            Self::Exception => "exception",
            Self::Broken => "broken",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a lifecycle call: success flag, user-facing message, structured
/// payload and, on failure, an [`ErrorCode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
}

impl OpResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Map::new(),
            error_code: None,
        }
    }

    pub fn failure(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Map::new(),
            error_code: Some(code),
        }
    }

    /// Attach one payload entry.
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Replace the message, keeping everything else.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_failure(&self) -> bool {
        !self.success
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.error_code == Some(code)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Payload entry read as a list of strings; empty when absent.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.data.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "success": self.success,
            "message": self.message,
            "data": self.data,
            "error_code": self.error_code.map(|c| c.as_str()),
        })
    }
}
