//! The request pipeline.
//!
//! ```text
//! request -> sanitize -> authorize -> assess risk -> confirm -> execute
//!                                                                  |
//!          every terminal outcome -> audit trail + history  <------+
//! ```
//!
//! [`Gateway::execute`] writes exactly one audit event and one history
//! record per call, whether the request ran, was rejected at any stage,
//! or was abandoned by its caller mid-flight.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::confirm::{ApprovalStrategy, ConfirmationGate, RiskLevel, RiskTable};
use crate::error::{AuditError, Error, ExecutionError, HistoryError, Rejection};
use crate::exec::{ExecConfig, ExecutionResult, ProcessExecutor};
use crate::policy::{
    Authorizer, ParsedCommand, Policy, sanitize_arguments, sanitize_command, sanitize_path,
};
use crate::records::{
    AUDIT_LOG_FILE, AuditTrail, DEFAULT_SENSITIVE_FLAGS, ExecutionStatus, HISTORY_LOG_FILE,
    HistoryRecord, HistoryStore, Masker, default_log_dir,
};

/// Configuration for a [`Gateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Allow-list. `None` uses [`Policy::default_policy`].
    pub policy: Option<Policy>,
    pub risk_table: RiskTable,
    pub audit_log: PathBuf,
    pub history_log: PathBuf,
    /// Identity recorded with every request.
    pub user: String,
    /// Timeout and grace period for executed commands.
    pub exec: ExecConfig,
    pub sensitive_flags: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let log_dir = default_log_dir();
        Self {
            policy: None,
            risk_table: RiskTable::default(),
            audit_log: log_dir.join(AUDIT_LOG_FILE),
            history_log: log_dir.join(HISTORY_LOG_FILE),
            user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            exec: ExecConfig::default(),
            sensitive_flags: DEFAULT_SENSITIVE_FLAGS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_risk_table(mut self, risk_table: RiskTable) -> Self {
        self.risk_table = risk_table;
        self
    }

    /// Places both logs in `dir` under their default file names.
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.audit_log = dir.join(AUDIT_LOG_FILE);
        self.history_log = dir.join(HISTORY_LOG_FILE);
        self
    }

    #[must_use]
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = path.into();
        self
    }

    #[must_use]
    pub fn with_history_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_log = path.into();
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.exec = self.exec.with_timeout(timeout);
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.exec = self.exec.with_grace_period(grace_period);
        self
    }

    #[must_use]
    pub fn with_sensitive_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_flags = flags.into_iter().map(Into::into).collect();
        self
    }
}

/// A structured request: run `command args...` with `path` as working
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub path: String,
}

impl CommandRequest {
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I, path: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            path: path.into(),
        }
    }
}

impl From<ParsedCommand> for CommandRequest {
    fn from(parsed: ParsedCommand) -> Self {
        Self {
            command: parsed.command,
            args: parsed.args,
            path: parsed.path,
        }
    }
}

/// How a request ended.
#[derive(Debug)]
pub enum Outcome {
    Executed(ExecutionResult),
    Rejected(Rejection),
}

impl Outcome {
    #[must_use]
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }

    /// Converts into a `Result`, for callers that treat rejection as an error.
    ///
    /// # Errors
    ///
    /// Returns the rejection if the request was not carried out.
    pub fn into_result(self) -> Result<ExecutionResult, Rejection> {
        match self {
            Self::Executed(result) => Ok(result),
            Self::Rejected(rejection) => Err(rejection),
        }
    }
}

/// Sanitizes, authorizes, confirms, executes and records command requests.
///
/// Share it behind an `Arc` to serve concurrent requests; nothing in the
/// pipeline holds a lock across a request.
#[derive(Debug)]
pub struct Gateway {
    authorizer: Authorizer,
    gate: ConfirmationGate,
    executor: ProcessExecutor,
    exec: ExecConfig,
    audit: AuditTrail,
    history: Arc<HistoryStore>,
    user: String,
    /// Set by the first audit write that fails; never cleared.
    halted: OnceLock<String>,
}

impl Gateway {
    /// Builds every stage of the pipeline.
    ///
    /// # Errors
    ///
    /// - `Error::Policy` if the policy is empty or cannot be built
    /// - `Error::Audit` if the audit log cannot be opened for writing
    /// - `Error::History` if the history directory cannot be created
    #[instrument(skip_all, fields(user = %config.user, audit_log = %config.audit_log.display()))]
    pub fn new(config: GatewayConfig, strategy: Arc<dyn ApprovalStrategy>) -> Result<Self, Error> {
        let policy = match config.policy {
            Some(policy) => policy,
            None => Policy::default_policy()?,
        };
        debug!(commands = policy.len(), "Policy loaded");

        let audit = AuditTrail::new(&config.audit_log)?;
        let history = HistoryStore::new(&config.history_log)?
            .with_masker(Masker::new(config.sensitive_flags));

        info!("Gateway ready");
        Ok(Self {
            authorizer: Authorizer::new(Arc::new(policy)),
            gate: ConfirmationGate::new(config.risk_table, strategy),
            executor: ProcessExecutor::new(),
            exec: config.exec,
            audit,
            history: Arc::new(history),
            user: config.user,
            halted: OnceLock::new(),
        })
    }

    #[must_use]
    pub fn policy(&self) -> &Policy {
        self.authorizer.policy()
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Why the gateway stopped accepting requests, if it has.
    #[must_use]
    pub fn halted(&self) -> Option<&str> {
        self.halted.get().map(String::as_str)
    }

    fn ensure_running(&self) -> Result<(), AuditError> {
        match self.halted.get() {
            Some(reason) => Err(AuditError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Runs one request through the whole pipeline.
    ///
    /// A rejected request is an `Ok(Outcome::Rejected(_))`. The `Err`
    /// channel is reserved for the audit trail: if the outcome cannot be
    /// recorded, the gateway must not continue serving.
    ///
    /// If the returned future is dropped before completion, any running
    /// child is killed and a failed "cancelled" event is still recorded.
    /// Once any audit write has failed, including one made on behalf of a
    /// cancelled request, every later call is refused.
    ///
    /// # Errors
    ///
    /// Returns `AuditError` if the audit event could not be written, or
    /// `AuditError::Halted` if an earlier one could not.
    #[instrument(skip_all, fields(request_id = %Uuid::new_v4(), command = %request.command))]
    pub async fn execute(&self, request: CommandRequest) -> Result<Outcome, AuditError> {
        self.ensure_running()?;
        let risk_level = self.gate.assess_risk(&request.command, &request.args);
        let start = Instant::now();

        let mut guard = CancelGuard {
            armed: true,
            audit: &self.audit,
            history: self.history.clone(),
            halted: &self.halted,
            request: &request,
            user: &self.user,
            risk_level,
            start,
        };
        let (outcome, ran) = match self.run(&request).await {
            Ok(result) => (Outcome::Executed(result), true),
            Err(rejection) => {
                let ran = matches!(rejection, Rejection::Execution(_));
                (Outcome::Rejected(rejection), ran)
            }
        };
        guard.armed = false;

        let duration = ran.then(|| start.elapsed().as_secs_f64());
        self.record(&request, risk_level, &outcome, duration).await?;
        Ok(outcome)
    }

    /// Parses a raw `command args... path` line and executes it.
    ///
    /// A line that cannot be parsed is rejected and audited like any other
    /// rejection.
    ///
    /// # Errors
    ///
    /// Returns `AuditError` if the audit event could not be written, or
    /// `AuditError::Halted` if an earlier one could not.
    pub async fn execute_line(&self, raw: &str) -> Result<Outcome, AuditError> {
        self.ensure_running()?;
        match ParsedCommand::parse(raw) {
            Ok(parsed) => self.execute(parsed.into()).await,
            Err(e) => {
                warn!(error = %e, "Unparseable command line");
                let request = CommandRequest::new(raw.trim(), Vec::<String>::new(), "");
                let risk_level = self.gate.assess_risk(&request.command, &request.args);
                let outcome = Outcome::Rejected(e.into());
                self.record(&request, risk_level, &outcome, None).await?;
                Ok(outcome)
            }
        }
    }

    /// Whether `request` would pass sanitization and authorization.
    ///
    /// Nothing is executed or recorded.
    #[must_use]
    pub fn check_allowed(&self, request: &CommandRequest) -> bool {
        match self.admit(request) {
            Ok(_) => true,
            Err(rejection) => {
                debug!(reason = %rejection, "Request would be rejected");
                false
            }
        }
    }

    /// Up to `limit` history records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError` if the history log cannot be read or parsed.
    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.history.get_command_history(limit).await
    }

    /// Up to `limit` of the latest history records, newest first.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError` if the history log cannot be read or parsed.
    pub async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.history.get_recent(limit).await
    }

    /// Sanitization then authorization.
    fn admit(&self, request: &CommandRequest) -> Result<(String, Vec<String>, PathBuf), Rejection> {
        let command = sanitize_command(&request.command)?;
        let args = sanitize_arguments(&request.args)?;
        let path = sanitize_path(&request.path)?;
        self.authorizer.authorize(&command, &args, &path)?;
        Ok((command, args, path))
    }

    async fn run(&self, request: &CommandRequest) -> Result<ExecutionResult, Rejection> {
        let (command, args, path) = self.admit(request)?;

        let confirmation = self.gate.request(&command, &args, &path, &self.user);
        if !self.gate.confirm(&confirmation).await {
            return Err(Rejection::ConfirmationDenied {
                risk_level: confirmation.risk_level,
            });
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(command);
        argv.extend(args);
        let config = self.exec.clone().with_working_dir(path);
        Ok(self.executor.execute_argv(&argv, &config, None).await?)
    }

    async fn record(
        &self,
        request: &CommandRequest,
        risk_level: RiskLevel,
        outcome: &Outcome,
        duration: Option<f64>,
    ) -> Result<(), AuditError> {
        let (status, error) = match outcome {
            Outcome::Executed(_) => (ExecutionStatus::Success, None),
            Outcome::Rejected(rejection) => (ExecutionStatus::Failed, Some(rejection.to_string())),
        };
        debug!(%status, ?duration, "Request finished");

        if let Err(e) = self.audit.log_command_execution(
            &request.command,
            &request.args,
            &request.path,
            status,
            &self.user,
            error.as_deref(),
        ) {
            let _ = self.halted.set(e.to_string());
            return Err(e);
        }

        let mut record = HistoryRecord::new(
            request.command.clone(),
            request.args.clone(),
            request.path.clone(),
            self.user.clone(),
            status,
            risk_level,
        );
        record.duration = duration;
        record.error = error;
        if let Err(e) = self.history.log_command(record).await {
            warn!(error = %e, "Failed to write history record");
        }
        Ok(())
    }
}

/// Records a cancelled request if the execution future is dropped.
///
/// Disarmed once the pipeline returns normally.
struct CancelGuard<'a> {
    armed: bool,
    audit: &'a AuditTrail,
    history: Arc<HistoryStore>,
    halted: &'a OnceLock<String>,
    request: &'a CommandRequest,
    user: &'a str,
    risk_level: RiskLevel,
    start: Instant,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(command = %self.request.command, "Request cancelled before completion");
        let message = ExecutionError::Cancelled {
            command_line: shell_words::join(
                std::iter::once(&self.request.command).chain(&self.request.args),
            ),
        }
        .to_string();

        if let Err(e) = self.audit.log_command_execution(
            &self.request.command,
            &self.request.args,
            &self.request.path,
            ExecutionStatus::Failed,
            self.user,
            Some(&message),
        ) {
            // No caller is left to receive this; the next request sees it.
            error!(error = %e, "Failed to audit cancelled request, halting");
            let _ = self.halted.set(e.to_string());
        }

        let history = self.history.clone();
        let record = HistoryRecord::new(
            self.request.command.clone(),
            self.request.args.clone(),
            self.request.path.clone(),
            self.user,
            ExecutionStatus::Failed,
            self.risk_level,
        )
        .with_duration(self.start.elapsed().as_secs_f64())
        .with_error(message);

        // History is async; hand it to the runtime if one is still around.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = history.log_command(record).await {
                    warn!(error = %e, "Failed to write history record");
                }
            });
        }
    }
}
