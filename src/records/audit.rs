//! Synchronous, fail-closed audit trail.
//!
//! Each event is one JSON object on its own line. Writes go through a single
//! append-mode handle behind a mutex, are issued as one `write_all` per line,
//! and are synced to disk before the call returns.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::ExecutionStatus;
use crate::error::AuditError;

/// One execution attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub arguments: Vec<String>,
    pub path: String,
    pub status: ExecutionStatus,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only audit log.
#[derive(Debug)]
pub struct AuditTrail {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditTrail {
    /// Opens (creating if needed) the audit log at `path`.
    ///
    /// Missing parent directories are created. The file is opened for
    /// appending immediately so that an unwritable location is reported
    /// here rather than on the first event.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Init` if the location cannot be created or opened
    /// for writing.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        let init_err = |source| AuditError::Init {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(init_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(init_err)?;

        debug!("Audit trail ready");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records one execution attempt. `error_message` is only kept for
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns `AuditError` if the event could not be durably appended.
    pub fn log_command_execution(
        &self,
        command: &str,
        arguments: &[String],
        path: &str,
        status: ExecutionStatus,
        user: &str,
        error_message: Option<&str>,
    ) -> Result<(), AuditError> {
        let error = match status {
            ExecutionStatus::Failed => error_message.map(str::to_string),
            ExecutionStatus::Success => None,
        };
        self.record(&AuditEvent {
            timestamp: Utc::now(),
            command: command.to_string(),
            arguments: arguments.to_vec(),
            path: path.to_string(),
            status,
            user: user.to_string(),
            error,
        })
    }

    /// Appends a prepared event.
    ///
    /// # Errors
    ///
    /// Returns `AuditError` if serialization, the write or the sync fails.
    #[instrument(skip_all, fields(command = %event.command, status = %event.status))]
    pub fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let write_err = |source| AuditError::Write {
            path: self.path.clone(),
            source,
        };

        let mut file = self
            .file
            .lock()
            .map_err(|_| write_err(std::io::Error::other("audit log lock poisoned")))?;
        file.write_all(&line).map_err(write_err)?;
        file.sync_data().map_err(write_err)?;

        debug!("Audit event written");
        Ok(())
    }
}
