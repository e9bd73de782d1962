//! Line-by-line streaming of a child's stdout.

use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::ExecConfig;
use super::process::{exit_code, force_kill, signal_group, terminate};
use crate::error::ExecutionError;

/// Finite, lazily produced stdout lines of a running child.
///
/// The sequence ends when the child closes stdout and exits zero. Any
/// failure is yielded once and ends the sequence. Dropping the stream
/// before it ends kills the child.
///
/// Stderr is drained in the background and only surfaces as part of a
/// `NonZeroExit` error.
#[derive(Debug)]
pub struct OutputStream {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    deadline: Instant,
    config: ExecConfig,
    command_line: String,
    finished: bool,
}

impl OutputStream {
    pub(crate) fn new(
        mut child: Child,
        command_line: String,
        config: &ExecConfig,
    ) -> Result<Self, ExecutionError> {
        let deadline = Instant::now() + config.timeout;
        let stdout = child.stdout.take().ok_or_else(|| ExecutionError::Io {
            context: "stdout not captured".to_string(),
            source: std::io::Error::other("missing pipe"),
        })?;
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Err(e) = pipe.read_to_end(&mut buf).await {
                    trace!(error = %e, "stderr drain stopped");
                }
                buf
            })
        });

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            stderr,
            deadline,
            config: config.clone(),
            command_line,
            finished: false,
        })
    }

    /// The re-quoted command line being streamed.
    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Waits for the next line of output, without its line terminator.
    ///
    /// Returns `None` once the child has exited successfully after its last
    /// line, and forever after the sequence has ended.
    pub async fn next_line(&mut self) -> Option<Result<String, ExecutionError>> {
        if self.finished {
            return None;
        }

        let mut buf = Vec::new();
        match tokio::time::timeout_at(self.deadline, self.stdout.read_until(b'\n', &mut buf)).await
        {
            Ok(Ok(0)) => self.finish().await.err().map(Err),
            Ok(Ok(_)) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&buf).into_owned()))
            }
            Ok(Err(e)) => {
                self.finished = true;
                force_kill(&mut self.child).await;
                Some(Err(ExecutionError::Io {
                    context: format!("failed to read output of '{}'", self.command_line),
                    source: e,
                }))
            }
            Err(_) => {
                self.finished = true;
                Some(Err(self.timed_out().await))
            }
        }
    }

    /// Drains the remaining lines.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields.
    pub async fn collect_lines(mut self) -> Result<Vec<String>, ExecutionError> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await {
            lines.push(line?);
        }
        Ok(lines)
    }

    /// Stdout is closed; wait for exit within what is left of the deadline.
    async fn finish(&mut self) -> Result<(), ExecutionError> {
        self.finished = true;
        match tokio::time::timeout_at(self.deadline, self.child.wait()).await {
            Ok(Ok(status)) => {
                let code = exit_code(status);
                debug!(exit_code = code, command_line = %self.command_line, "Stream finished");
                if code == 0 {
                    Ok(())
                } else {
                    Err(ExecutionError::NonZeroExit {
                        exit_code: code,
                        stderr: self.take_stderr().await,
                    })
                }
            }
            Ok(Err(e)) => {
                force_kill(&mut self.child).await;
                Err(ExecutionError::Io {
                    context: format!("failed to wait for '{}'", self.command_line),
                    source: e,
                })
            }
            Err(_) => Err(self.timed_out().await),
        }
    }

    async fn timed_out(&mut self) -> ExecutionError {
        debug!(command_line = %self.command_line, "Stream deadline expired, terminating");
        terminate(&mut self.child, &self.config).await;
        ExecutionError::CommandTimeout {
            timeout_ms: self.config.timeout.as_millis(),
            command_line: self.command_line.clone(),
        }
    }

    async fn take_stderr(&mut self) -> String {
        match self.stderr.take() {
            Some(handle) => match handle.await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    trace!(error = %e, "stderr task failed");
                    String::new()
                }
            },
            None => String::new(),
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }
        // `id()` is `None` once the child has been reaped. Until then its pid
        // still names the group, even if the stream already ended.
        if let Some(pid) = self.child.id() {
            trace!(command_line = %self.command_line, "Stream dropped before reap, killing process group");
            signal_group(pid, Signal::SIGKILL);
            if let Err(e) = self.child.start_kill() {
                trace!(error = %e, "start_kill failed");
            }
        }
    }
}
