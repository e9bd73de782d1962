//! Configuration for child process execution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default deadline for a single command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default pause between SIGTERM and SIGKILL for a timed-out child.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Configuration for a single execution.
///
/// Use the builder methods to customize the execution behavior.
///
/// # Example
///
/// ```
/// use command_gateway::exec::ExecConfig;
/// use std::time::Duration;
///
/// let config = ExecConfig::default()
///     .with_working_dir("/tmp")
///     .with_env("MY_VAR", "value")
///     .with_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Maximum time allowed for command execution.
    pub timeout: Duration,

    /// Time a timed-out child gets to exit after SIGTERM before SIGKILL.
    pub grace_period: Duration,

    /// Working directory for the child. Inherited when `None`.
    pub working_dir: Option<PathBuf>,

    /// Environment variables set on top of the base environment.
    pub env_vars: HashMap<String, String>,

    /// Start from an empty environment instead of inheriting ours.
    pub clear_env: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            working_dir: None,
            env_vars: HashMap::new(),
            clear_env: false,
        }
    }
}

impl ExecConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the command execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the SIGTERM to SIGKILL grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Sets the working directory for command execution.
    #[must_use]
    pub fn with_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Adds multiple environment variables from an iterator.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env_vars.insert(k.into(), v.into());
        }
        self
    }

    /// Runs the child with only the variables given via `with_env`.
    #[must_use]
    pub fn with_clean_env(mut self) -> Self {
        self.clear_env = true;
        self
    }
}
