//! Queryable, append-only history of gateway requests.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{ExecutionStatus, Masker};
use crate::confirm::RiskLevel;
use crate::error::HistoryError;

/// One request as kept in history. `args` are always stored masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub args: Vec<String>,
    pub path: String,
    pub user: String,
    pub status: ExecutionStatus,
    pub risk_level: RiskLevel,
    /// Wall-clock duration in seconds, present when the command ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryRecord {
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        path: impl Into<String>,
        user: impl Into<String>,
        status: ExecutionStatus,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            args,
            path: path.into(),
            user: user.into(),
            status,
            risk_level,
            duration: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// JSON-lines history file.
///
/// Appends are serialized through an async mutex so concurrent requests
/// never interleave partial lines.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    masker: Masker,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    /// Creates a store at `path`, creating its parent directory.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Io` if the parent directory cannot be created.
    pub fn new(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| HistoryError::Io {
                context: format!("failed to create history directory {}", parent.display()),
                source,
            })?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            masker: Masker::default(),
            write_lock: Mutex::new(()),
        })
    }

    /// Replaces the flags whose values are masked on write.
    #[must_use]
    pub fn with_masker(mut self, masker: Masker) -> Self {
        self.masker = masker;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record`, masking its arguments first.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError` if the record cannot be serialized or appended.
    #[instrument(skip_all, fields(command = %record.command, status = %record.status))]
    pub async fn log_command(&self, mut record: HistoryRecord) -> Result<(), HistoryError> {
        record.args = self.masker.mask(&record.args);

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| self.io_err("failed to open", source))?;
        file.write_all(&line)
            .await
            .map_err(|source| self.io_err("failed to append to", source))?;
        file.flush()
            .await
            .map_err(|source| self.io_err("failed to flush", source))?;

        debug!("History record written");
        Ok(())
    }

    /// Returns up to `limit` records in file order, oldest first.
    ///
    /// A missing file is an empty history.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Deserialize` naming the first malformed line.
    pub async fn get_command_history(
        &self,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let mut records = self.read_all().await?;
        records.truncate(limit);
        Ok(records)
    }

    /// Returns up to `limit` of the latest records, newest first.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Deserialize` naming the first malformed line.
    pub async fn get_recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        let records = self.read_all().await?;
        Ok(records.into_iter().rev().take(limit).collect())
    }

    async fn read_all(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_err("failed to read", source)),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| HistoryError::Deserialize {
                    line: idx + 1,
                    source,
                })
            })
            .collect()
    }

    fn io_err(&self, action: &str, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            context: format!("{action} history file {}", self.path.display()),
            source,
        }
    }
}
