//! Command Gateway - Guarded command execution for AI agents.
//!
//! Every request passes through the same pipeline before anything runs:
//!
//! 1. [`policy`] sanitizes the command, arguments and target path, then
//!    checks them against a default-deny allow-list
//! 2. [`confirm`] classifies the risk and asks an approval strategy
//! 3. [`exec`] runs the command directly (never through a shell) with a
//!    timeout, escalating SIGTERM to SIGKILL
//! 4. [`records`] appends a durable audit event and a masked history record
//!
//! [`gateway::Gateway`] wires the stages together; [`server`] exposes it
//! over MCP.
//!
//! # Platform Requirements
//!
//! - Unix (process groups and POSIX signals)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use command_gateway::confirm::DenyAll;
//! use command_gateway::gateway::{CommandRequest, Gateway, GatewayConfig, Outcome};
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let gateway = Gateway::new(GatewayConfig::default(), Arc::new(DenyAll))?;
//!
//!     let request = CommandRequest::new("ls", ["-l"], "/tmp");
//!     match gateway.execute(request).await? {
//!         Outcome::Executed(result) => print!("{}", result.stdout),
//!         Outcome::Rejected(reason) => eprintln!("rejected: {reason}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod confirm;
pub mod error;
pub mod exec;
pub mod gateway;
pub mod policy;
pub mod records;
pub mod server;

// Re-export commonly used types
pub use error::{Error, Rejection, Result};
pub use gateway::{CommandRequest, Gateway, GatewayConfig, Outcome};
