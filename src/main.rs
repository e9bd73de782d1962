//! Command Gateway - Entry Point
//!
//! This is the main entry point for the MCP server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use command_gateway::confirm::{ApprovalStrategy, DenyAll, InteractivePrompt, RiskTable};
use command_gateway::gateway::{Gateway, GatewayConfig};
use command_gateway::policy::Policy;
use command_gateway::server;

/// Command Gateway - Guarded, audited command execution for AI agents.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON policy file: {"<command>": {"args": [...], "paths": [...]}}
    #[arg(long, env = "COMMAND_GATEWAY_POLICY")]
    policy: Option<PathBuf>,

    /// JSON risk table overriding the built-in classification
    #[arg(long)]
    risk_table: Option<PathBuf>,

    /// Directory holding the audit and history logs
    #[arg(long, env = "COMMAND_GATEWAY_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Audit log file (overrides --log-dir)
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// History log file (overrides --log-dir)
    #[arg(long)]
    history_log: Option<PathBuf>,

    /// User recorded with every request
    #[arg(long, env = "USER", default_value = "unknown")]
    user: String,

    /// Command timeout in seconds
    #[arg(long, default_value = "60")]
    timeout: u64,

    /// Time between SIGTERM and SIGKILL for timed-out commands, in milliseconds
    #[arg(long, default_value = "100")]
    grace_ms: u64,

    /// Deny every confirmation instead of prompting on the terminal
    #[arg(long, default_value = "false")]
    headless: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // MCP requires that logs go to stderr (stdout is for JSON-RPC)
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("Command Gateway v{}", env!("CARGO_PKG_VERSION"));

    let mut config = GatewayConfig::new()
        .with_user(args.user)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_grace_period(Duration::from_millis(args.grace_ms));

    if let Some(path) = &args.policy {
        info!(path = %path.display(), "Loading policy");
        config = config.with_policy(Policy::load(path)?);
    } else {
        info!("No policy file given, using the built-in policy");
    }

    if let Some(path) = &args.risk_table {
        let raw = std::fs::read_to_string(path).into_diagnostic()?;
        let table: RiskTable = serde_json::from_str(&raw).into_diagnostic()?;
        config = config.with_risk_table(table);
    }

    if let Some(dir) = args.log_dir {
        config = config.with_log_dir(dir);
    }
    if let Some(path) = args.audit_log {
        config = config.with_audit_log(path);
    }
    if let Some(path) = args.history_log {
        config = config.with_history_log(path);
    }

    let strategy: Arc<dyn ApprovalStrategy> = if args.headless {
        warn!("Headless mode: every confirmation will be denied");
        Arc::new(DenyAll)
    } else {
        Arc::new(InteractivePrompt::new())
    };

    let gateway = Gateway::new(config, strategy)?;
    server::run(Arc::new(gateway)).await?;
    Ok(())
}
