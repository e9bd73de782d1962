//! Approval strategies.
//!
//! The gate never decides on its own; it hands an immutable
//! [`ConfirmationRequest`] to whichever [`ApprovalStrategy`] was injected at
//! construction. Headless deployments must pick [`DenyAll`] or a scripted
//! responder explicitly.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::RiskLevel;

/// Snapshot of what is about to run, handed to the approver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRequest {
    pub command: String,
    pub args: Vec<String>,
    pub path: PathBuf,
    pub user: String,
    pub risk_level: RiskLevel,
}

/// Decides whether a request may proceed.
#[async_trait]
pub trait ApprovalStrategy: Send + Sync {
    /// Returns `true` only if execution is approved.
    async fn decide(&self, request: &ConfirmationRequest) -> bool;
}

/// Fail-closed strategy for unattended operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl ApprovalStrategy for DenyAll {
    async fn decide(&self, request: &ConfirmationRequest) -> bool {
        debug!(command = %request.command, "Denying request (headless)");
        false
    }
}

/// Approves everything. Only for callers that already trust the policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl ApprovalStrategy for AllowAll {
    async fn decide(&self, _request: &ConfirmationRequest) -> bool {
        true
    }
}

/// Adapts a plain closure into a strategy.
pub struct FnApproval<F>(pub F);

#[async_trait]
impl<F> ApprovalStrategy for FnApproval<F>
where
    F: Fn(&ConfirmationRequest) -> bool + Send + Sync,
{
    async fn decide(&self, request: &ConfirmationRequest) -> bool {
        (self.0)(request)
    }
}

/// Replays a fixed sequence of answers and remembers every request it saw.
///
/// Once the script runs out every further request is denied.
#[derive(Debug, Default)]
pub struct ScriptedApproval {
    answers: Mutex<VecDeque<bool>>,
    seen: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedApproval {
    #[must_use]
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, in arrival order.
    #[must_use]
    pub fn seen(&self) -> Vec<ConfirmationRequest> {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ApprovalStrategy for ScriptedApproval {
    async fn decide(&self, request: &ConfirmationRequest) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        self.answers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(false)
    }
}

/// Asks a human on the controlling terminal.
///
/// Uses `/dev/tty` rather than stdin/stdout, which carry JSON-RPC when the
/// gateway is served over stdio. No terminal means no approval.
#[derive(Debug, Clone)]
pub struct InteractivePrompt {
    tty: PathBuf,
}

impl Default for InteractivePrompt {
    fn default() -> Self {
        Self {
            tty: PathBuf::from("/dev/tty"),
        }
    }
}

impl InteractivePrompt {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a different terminal device.
    #[must_use]
    pub fn with_tty(mut self, tty: impl Into<PathBuf>) -> Self {
        self.tty = tty.into();
        self
    }
}

#[async_trait]
impl ApprovalStrategy for InteractivePrompt {
    async fn decide(&self, request: &ConfirmationRequest) -> bool {
        let tty = self.tty.clone();
        let request = request.clone();
        let answer = tokio::task::spawn_blocking(move || {
            let device = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&tty)?;
            let reader = std::io::BufReader::new(device.try_clone()?);
            prompt(reader, device, &request)
        })
        .await;

        match answer {
            Ok(Ok(approved)) => approved,
            Ok(Err(e)) => {
                warn!(error = %e, "Confirmation prompt unavailable, denying");
                false
            }
            Err(e) => {
                warn!(error = %e, "Confirmation prompt task failed, denying");
                false
            }
        }
    }
}

/// Renders `request` to `out` and reads a yes/no answer from `input`.
///
/// Only `yes` (any case, surrounding whitespace ignored) approves.
///
/// # Errors
///
/// Returns any I/O error from writing the prompt or reading the answer.
pub fn prompt<R: BufRead, W: Write>(
    mut input: R,
    mut out: W,
    request: &ConfirmationRequest,
) -> std::io::Result<bool> {
    writeln!(out)?;
    writeln!(out, "Command Execution Confirmation")?;
    writeln!(out, "------------------------------")?;
    writeln!(out, "Command: {}", request.command)?;
    writeln!(out, "Arguments: {}", request.args.join(" "))?;
    writeln!(out, "Path: {}", request.path.display())?;
    writeln!(out, "User: {}", request.user)?;
    writeln!(out, "Risk Level: {}", request.risk_level)?;
    writeln!(out, "Warning: {}", request.risk_level.warning())?;
    write!(out, "\nDo you want to proceed? (yes/no): ")?;
    out.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().eq_ignore_ascii_case("yes"))
}
