//! Child process execution with timeouts, streaming and guaranteed cleanup.
//!
//! Commands are spawned directly from an argument vector. No shell sits in
//! between, so quoting only groups words and nothing is ever expanded.
//!
//! # Example
//!
//! ```no_run
//! use command_gateway::exec::{ExecConfig, ProcessExecutor};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), command_gateway::error::ExecutionError> {
//! let config = ExecConfig::default()
//!     .with_working_dir("/tmp")
//!     .with_timeout(Duration::from_secs(10));
//!
//! let mut lines = ProcessExecutor::new().execute_streaming("ls -l", &config)?;
//! while let Some(line) = lines.next_line().await {
//!     println!("{}", line?);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod process;
mod stream;

pub use config::{DEFAULT_GRACE_PERIOD, DEFAULT_TIMEOUT, ExecConfig};
pub use process::{ExecutionResult, ProcessExecutor};
pub use stream::OutputStream;
