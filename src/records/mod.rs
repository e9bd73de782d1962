//! Persistent records of gateway activity.
//!
//! Two logs are kept side by side:
//!
//! - [`AuditTrail`]: written synchronously and durably before a request
//!   returns. If it cannot be written the request fails.
//! - [`HistoryStore`]: a queryable log with masked arguments, risk level
//!   and duration. Best effort.
//!
//! Both are JSON lines, one object per request.

mod audit;
mod history;
mod mask;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use audit::{AuditEvent, AuditTrail};
pub use history::{HistoryRecord, HistoryStore};
pub use mask::{DEFAULT_SENSITIVE_FLAGS, MASK, Masker};

/// File name of the audit log inside the log directory.
pub const AUDIT_LOG_FILE: &str = "command_audit.log";
/// File name of the history log inside the log directory.
pub const HISTORY_LOG_FILE: &str = "command_history.log";

/// Final status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Returns the default directory for the audit and history logs.
///
/// Priority:
/// 1. `$XDG_DATA_HOME/command-gateway/`
/// 2. `~/.command-gateway/`
/// 3. `/tmp/command-gateway/`
#[must_use]
pub fn default_log_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data).join("command-gateway");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".command-gateway");
    }

    PathBuf::from("/tmp/command-gateway")
}
