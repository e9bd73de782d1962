//! Child process execution with deadline enforcement.
//!
//! # Lifecycle
//!
//! ```text
//! STARTED -> RUNNING -> COMPLETED
//!                    -> CANCELLED  (caller dropped the future; child SIGKILLed on drop)
//!                    -> TIMED_OUT -> TERMINATING (SIGTERM) -> KILLING (SIGKILL) -> REAPED
//! ```
//!
//! # Notes on pipes
//!
//! Do not read stdout/stderr only after process exit: if the child writes
//! enough data to fill a pipe, it blocks forever and never exits. Input is
//! written, stdout and stderr are drained, all concurrently, and stdin is
//! closed as soon as the input is written so a child reading to EOF can
//! finish.
//!
//! Every child is started in its own process group so that termination
//! signals reach anything it forked. Dropping an execution before the child
//! is reaped (including cancellation) SIGKILLs the whole group.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, instrument, trace, warn};

use super::ExecConfig;
use super::stream::OutputStream;
use crate::error::ExecutionError;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Output from a command that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code from the command.
    pub exit_code: i32,
    /// The command line that was run, re-quoted.
    pub command_line: String,
}

impl ExecutionResult {
    /// Returns `true` if the command exited successfully (exit code 0).
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands as direct children; no shell is ever involved.
///
/// # Example
///
/// ```no_run
/// use command_gateway::exec::{ExecConfig, ProcessExecutor};
/// use std::time::Duration;
///
/// # async fn demo() -> Result<(), command_gateway::error::ExecutionError> {
/// let executor = ProcessExecutor::new();
/// let config = ExecConfig::default().with_timeout(Duration::from_secs(5));
/// let result = executor.execute("echo hello", &config, None).await?;
/// assert_eq!(result.stdout.trim(), "hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Splits `command_line` with shell quoting rules and runs it.
    ///
    /// # Errors
    ///
    /// See [`ProcessExecutor::execute_argv`].
    pub async fn execute(
        &self,
        command_line: &str,
        config: &ExecConfig,
        input: Option<&[u8]>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let argv = split_command_line(command_line)?;
        self.execute_argv(&argv, config, input).await
    }

    /// Runs `argv[0]` with the remaining arguments and collects its output.
    ///
    /// # Errors
    ///
    /// - `InvalidCommand` if `argv` is empty
    /// - `Spawn` if the child cannot be started
    /// - `CommandTimeout` if the deadline expires; the child has been
    ///   terminated and reaped by the time this is returned
    /// - `NonZeroExit` with the captured stderr for any other exit status
    /// - `Io` if the pipes or the wait fail
    #[instrument(skip_all, fields(program = argv.first().map(String::as_str).unwrap_or(""), timeout_ms = %config.timeout.as_millis()))]
    pub async fn execute_argv(
        &self,
        argv: &[String],
        config: &ExecConfig,
        input: Option<&[u8]>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let command_line = shell_words::join(argv);
        let start = Instant::now();
        let mut child = spawn(argv, config, input.is_some())?;
        // Declared after `child` so it fires while the leader is unreaped.
        let mut group = GroupKill::new(&child);
        trace!(pid = ?child.id(), "Child running");

        let collected = tokio::time::timeout(config.timeout, collect(&mut child, input)).await;

        let (status, stdout, stderr) = match collected {
            Ok(Ok(collected)) => {
                group.disarm();
                collected
            }
            Ok(Err(e)) => {
                force_kill(&mut child).await;
                group.disarm();
                return Err(ExecutionError::Io {
                    context: format!("failed to collect output of '{command_line}'"),
                    source: e,
                });
            }
            Err(_) => {
                debug!(elapsed_ms = %start.elapsed().as_millis(), "Command timed out, terminating");
                terminate(&mut child, config).await;
                group.disarm();
                return Err(ExecutionError::CommandTimeout {
                    timeout_ms: config.timeout.as_millis(),
                    command_line,
                });
            }
        };

        let exit_code = exit_code(status);
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        debug!(exit_code, elapsed_ms = %start.elapsed().as_millis(), "Command completed");

        if exit_code != 0 {
            warn!(exit_code, %command_line, "Command failed");
            return Err(ExecutionError::NonZeroExit { exit_code, stderr });
        }

        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code,
            command_line,
        })
    }

    /// Starts `command_line` and returns its stdout as a lazy line sequence.
    ///
    /// The deadline in `config` covers the whole stream, measured from spawn.
    ///
    /// # Errors
    ///
    /// `InvalidCommand` or `Spawn` if the child cannot be started; later
    /// failures are yielded by [`OutputStream::next_line`].
    pub fn execute_streaming(
        &self,
        command_line: &str,
        config: &ExecConfig,
    ) -> Result<OutputStream, ExecutionError> {
        let argv = split_command_line(command_line)?;
        self.execute_streaming_argv(&argv, config)
    }

    /// Argument-vector form of [`ProcessExecutor::execute_streaming`].
    ///
    /// # Errors
    ///
    /// `InvalidCommand` or `Spawn` if the child cannot be started.
    pub fn execute_streaming_argv(
        &self,
        argv: &[String],
        config: &ExecConfig,
    ) -> Result<OutputStream, ExecutionError> {
        let child = spawn(argv, config, false)?;
        OutputStream::new(child, shell_words::join(argv), config)
    }
}

/// Tokenizes a command line without any expansion.
pub(crate) fn split_command_line(command_line: &str) -> Result<Vec<String>, ExecutionError> {
    let argv = shell_words::split(command_line)
        .map_err(|e| ExecutionError::InvalidCommand(e.to_string()))?;
    if argv.is_empty() {
        return Err(ExecutionError::InvalidCommand(
            "command cannot be empty".to_string(),
        ));
    }
    Ok(argv)
}

fn spawn(argv: &[String], config: &ExecConfig, with_stdin: bool) -> Result<Child, ExecutionError> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        ExecutionError::InvalidCommand("command cannot be empty".to_string())
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if with_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    if config.clear_env {
        cmd.env_clear();
    }
    cmd.envs(&config.env_vars);

    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    trace!("Spawning child process");
    cmd.spawn().map_err(|e| ExecutionError::Spawn {
        command: program.clone(),
        source: e,
    })
}

/// Feeds stdin, drains both output pipes and waits for exit.
async fn collect(
    child: &mut Child,
    input: Option<&[u8]>,
) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let stdin = child.stdin.take();
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr not captured"))?;

    let feed = async move {
        if let (Some(mut pipe), Some(data)) = (stdin, input) {
            match pipe.write_all(data).await {
                // The child may exit without reading everything.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other?,
            }
            // Dropping the pipe closes it and delivers EOF.
            drop(pipe);
        }
        Ok::<(), std::io::Error>(())
    };

    let mut out = Vec::new();
    let mut err = Vec::new();
    let (fed, read_out, read_err) = tokio::join!(
        feed,
        stdout.read_to_end(&mut out),
        stderr.read_to_end(&mut err)
    );
    fed?;
    read_out?;
    read_err?;

    let status = child.wait().await?;
    Ok((status, out, err))
}

/// SIGTERM, wait out the grace period, then SIGKILL the group. Always reaps.
///
/// The leader is only reaped after the group SIGKILL, so its pid cannot have
/// been reused when the group is signalled.
pub(crate) async fn terminate(child: &mut Child, config: &ExecConfig) {
    let Some(pid) = child.id() else {
        return;
    };

    signal_group(pid, Signal::SIGTERM);
    let deadline = Instant::now() + config.grace_period;
    while !leader_exited(pid) {
        if Instant::now() >= deadline {
            debug!(pid, grace_ms = %config.grace_period.as_millis(), "Grace period elapsed, sending SIGKILL");
            break;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
    // Stragglers in the group do not get a second chance.
    force_kill(child).await;
}

/// Whether the leader has exited, without reaping it.
fn leader_exited(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return true;
    };
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(Pid::from_raw(raw)), flags) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(status) => {
            trace!(pid, ?status, "Leader exited");
            true
        }
        Err(errno) => {
            trace!(pid, %errno, "waitid failed");
            true
        }
    }
}

/// SIGKILLs a child's process group when dropped while armed.
///
/// Covers the paths where the child handle is dropped unreaped, such as a
/// cancelled execution. Disarm once the child has been reaped.
#[derive(Debug)]
pub(crate) struct GroupKill {
    pid: Option<u32>,
}

impl GroupKill {
    pub(crate) fn new(child: &Child) -> Self {
        Self { pid: child.id() }
    }

    pub(crate) fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            trace!(pid, "Execution dropped, killing process group");
            signal_group(pid, Signal::SIGKILL);
        }
    }
}

/// SIGKILL the whole group and reap the child.
pub(crate) async fn force_kill(child: &mut Child) {
    if let Some(pid) = child.id() {
        signal_group(pid, Signal::SIGKILL);
    }
    if let Err(e) = child.kill().await {
        trace!(error = %e, "Child already reaped");
    }
}

pub(crate) fn signal_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(errno) = killpg(Pid::from_raw(raw), signal) {
        // ESRCH: the group is already gone.
        trace!(pid, ?signal, %errno, "killpg failed");
    }
}

/// Signal deaths have no exit code and report `-1`.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
