//! MCP server implementation.
//!
//! A thin tool layer over [`Gateway`](crate::gateway::Gateway): it carries
//! no policy of its own. Tools:
//!
//! - `execute_command {command, args, path}`: stdout, or a tool error
//!   with the rejection reason
//! - `check_command_allowed {command, args, path}`: `"true"` or `"false"`
//! - `command_history {limit}`: history records as JSON lines
//!
//! A failed audit write halts the server.

mod handler;

pub use handler::{CommandParams, GatewayServer, HistoryParams, run};
