//! MCP server handler implementation.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::ServerError;
use crate::gateway::{CommandRequest, Gateway, Outcome};

const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Arguments of `execute_command` and `check_command_allowed`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CommandParams {
    /// Command name, e.g. "ls". Must be in the allow-list.
    pub command: String,
    /// Arguments, each of which must be allowed for the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Existing directory the command runs in.
    pub path: String,
}

impl From<CommandParams> for CommandRequest {
    fn from(params: CommandParams) -> Self {
        Self {
            command: params.command,
            args: params.args,
            path: params.path,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HistoryParams {
    /// Maximum number of records, newest first (default: 10).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// The MCP face of a [`Gateway`].
#[derive(Clone)]
pub struct GatewayServer {
    gateway: Arc<Gateway>,
    halt: watch::Sender<Option<String>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GatewayServer {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let (halt, _) = watch::channel(None);
        Self {
            gateway,
            halt,
            tool_router: Self::tool_router(),
        }
    }

    /// Resolves once a request could not be audited.
    pub async fn halted(&self) -> String {
        let mut rx = self.halt.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).clone().unwrap_or_default(),
            Err(_) => String::from("halt channel closed"),
        }
    }

    #[tool(
        description = "Execute an allow-listed command with arguments in a directory. \
                       No shell is involved; the request is audited."
    )]
    async fn execute_command(
        &self,
        Parameters(params): Parameters<CommandParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(command = %params.command, "execute_command");
        match self.gateway.execute(params.into()).await {
            Ok(Outcome::Executed(result)) => {
                Ok(CallToolResult::success(vec![Content::text(result.stdout)]))
            }
            Ok(Outcome::Rejected(rejection)) => Ok(CallToolResult::error(vec![Content::text(
                rejection.to_string(),
            )])),
            Err(e) => {
                error!(error = %e, "Audit trail failure, halting");
                self.halt.send_replace(Some(e.to_string()));
                Err(McpError::internal_error(e.to_string(), None))
            }
        }
    }

    #[tool(description = "Check whether a command would be allowed, without running it")]
    async fn check_command_allowed(
        &self,
        Parameters(params): Parameters<CommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let allowed = self.gateway.check_allowed(&params.into());
        Ok(CallToolResult::success(vec![Content::text(
            allowed.to_string(),
        )]))
    }

    #[tool(description = "Recent command history as JSON lines, newest first")]
    async fn command_history(
        &self,
        Parameters(params): Parameters<HistoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let records = match self.gateway.recent_history(limit).await {
            Ok(records) => records,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(e.to_string())]));
            }
        };

        let mut lines = Vec::with_capacity(records.len());
        for record in &records {
            let line = serde_json::to_string(record)
                .map_err(|e| McpError::internal_error(e.to_string(), None))?;
            lines.push(line);
        }
        Ok(CallToolResult::success(vec![Content::text(
            lines.join("\n"),
        )]))
    }
}

#[tool_handler]
impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Command gateway - runs allow-listed commands after sanitization, \
                 authorization and confirmation. Every attempt is audited."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Run the MCP server over stdio until the client disconnects.
///
/// # Errors
///
/// Returns error if server initialization or transport fails, or
/// `ServerError::Halted` once a request could not be audited.
pub async fn run(gateway: Arc<Gateway>) -> crate::error::Result<()> {
    info!(
        user = %gateway.user(),
        commands = gateway.policy().len(),
        "Starting command gateway server"
    );
    debug!("Using stdio transport");

    let server = GatewayServer::new(gateway);
    let watcher = server.clone();

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| ServerError::InitializationFailed(e.to_string()))?;

    info!("Server initialized, waiting for requests");

    tokio::select! {
        quit = service.waiting() => {
            quit.map_err(|e| ServerError::Transport(e.to_string()))?;
        }
        reason = watcher.halted() => {
            return Err(ServerError::Halted(reason).into());
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
