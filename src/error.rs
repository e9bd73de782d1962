//! Error types for the command gateway.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.
//!
//! Errors fall into two channels. Everything that ends a single request
//! (bad input, policy denial, withheld approval, a failing process) is a
//! [`Rejection`]. Audit durability failures are [`AuditError`] and are never
//! folded into a rejection: a gateway that cannot record what it did must stop.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::confirm::RiskLevel;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Policy could not be built or loaded
    #[error("Policy configuration error")]
    #[diagnostic(code(gateway::policy))]
    Policy(#[from] PolicyError),

    /// Audit trail could not be initialized or written
    #[error("Audit trail failure")]
    #[diagnostic(code(gateway::audit))]
    Audit(#[from] AuditError),

    /// History log failure
    #[error("History log failure")]
    #[diagnostic(code(gateway::history))]
    History(#[from] HistoryError),

    /// MCP server error
    #[error("MCP server error")]
    #[diagnostic(code(gateway::server))]
    Server(#[from] ServerError),
}

/// Why a single request was not carried out.
///
/// Every variant is terminal for the request but not for the gateway.
#[derive(Error, Debug, Diagnostic)]
pub enum Rejection {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sanitization(#[from] SanitizationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authorization(#[from] AuthorizationError),

    /// Approval was withheld by the confirmation strategy.
    #[error("Command execution not confirmed (risk level {risk_level})")]
    #[diagnostic(
        code(gateway::confirm::denied),
        help("The approval strategy declined this request; nothing was executed")
    )]
    ConfirmationDenied { risk_level: RiskLevel },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Execution(#[from] ExecutionError),
}

/// Errors produced while splitting a raw command line.
#[derive(Error, Debug, Diagnostic)]
pub enum ParseError {
    #[error("Invalid command format: empty command")]
    #[diagnostic(code(gateway::parse::empty))]
    Empty,

    #[error("Failed to parse command: {0}")]
    #[diagnostic(code(gateway::parse::tokenize), help("Check for unbalanced quotes"))]
    Tokenize(String),

    #[error("Invalid command format: must include command and path (got {found} token(s))")]
    #[diagnostic(
        code(gateway::parse::missing_path),
        help("The last token of a command line is always the target path")
    )]
    MissingPath { found: usize },
}

/// Errors produced by syntactic input checks.
#[derive(Error, Debug, Diagnostic)]
pub enum SanitizationError {
    /// Shell metacharacter or control sequence found.
    #[error("{field} contains disallowed sequence '{pattern}'")]
    #[diagnostic(
        code(gateway::sanitize::pattern),
        help("Pipes, redirections, chaining and substitutions are never supported")
    )]
    DisallowedPattern { field: &'static str, pattern: String },

    /// Value is outside the permitted character class.
    #[error("{field} contains disallowed characters: {value:?}")]
    #[diagnostic(code(gateway::sanitize::characters))]
    InvalidCharacters { field: &'static str, value: String },

    /// Path could not be resolved to a canonical form.
    #[error("Invalid path {path}: {source}")]
    #[diagnostic(code(gateway::sanitize::path))]
    InvalidPath {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced by the policy allow-list.
#[derive(Error, Debug, Diagnostic)]
pub enum AuthorizationError {
    #[error("Command contains invalid characters: {command:?}")]
    #[diagnostic(code(gateway::authorize::invalid_command))]
    InvalidCommand { command: String },

    #[error("Command '{command}' is not allowed")]
    #[diagnostic(code(gateway::authorize::command))]
    CommandNotAllowed { command: String },

    #[error("Argument '{argument}' is not allowed for command '{command}'")]
    #[diagnostic(code(gateway::authorize::argument))]
    ArgumentNotAllowed { command: String, argument: String },

    #[error("Path '{}' is not allowed for command '{command}'", path.display())]
    #[diagnostic(code(gateway::authorize::path))]
    PathNotAllowed { command: String, path: PathBuf },
}

/// Errors produced while running a child process.
#[derive(Error, Debug, Diagnostic)]
pub enum ExecutionError {
    /// Command line was empty or could not be tokenized.
    #[error("Invalid command line: {0}")]
    #[diagnostic(code(gateway::exec::invalid))]
    InvalidCommand(String),

    /// Child could not be started.
    #[error("Failed to spawn '{command}': {source}")]
    #[diagnostic(code(gateway::exec::spawn))]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Child exited with a non-zero status.
    #[error("Command execution failed with return code {exit_code}: {stderr}")]
    #[diagnostic(code(gateway::exec::exit))]
    NonZeroExit { exit_code: i32, stderr: String },

    /// Deadline expired; the child was terminated.
    #[error("Command timed out after {timeout_ms}ms: {command_line}")]
    #[diagnostic(code(gateway::exec::timeout))]
    CommandTimeout {
        timeout_ms: u128,
        command_line: String,
    },

    /// The request was abandoned while the child was running.
    #[error("Command execution cancelled: {command_line}")]
    #[diagnostic(code(gateway::exec::cancelled))]
    Cancelled { command_line: String },

    /// Pipe or wait failure.
    #[error("{context}: {source}")]
    #[diagnostic(code(gateway::exec::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Audit durability failures. Always fatal.
#[derive(Error, Debug, Diagnostic)]
pub enum AuditError {
    #[error("Cannot write to audit log {}: {source}", path.display())]
    #[diagnostic(
        code(gateway::audit::init),
        help("The audit log location must exist or be creatable, and be writable")
    )]
    Init {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to audit log {}: {source}", path.display())]
    #[diagnostic(code(gateway::audit::write))]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize audit event: {0}")]
    #[diagnostic(code(gateway::audit::serialize))]
    Serialize(#[from] serde_json::Error),

    /// An earlier event was lost; the gateway refuses further requests.
    #[error("Gateway halted after an audit failure: {0}")]
    #[diagnostic(
        code(gateway::audit::halted),
        help("Restore the audit log location and restart the gateway")
    )]
    Halted(String),
}

/// History log failures.
#[derive(Error, Debug, Diagnostic)]
pub enum HistoryError {
    #[error("{context}: {source}")]
    #[diagnostic(code(gateway::history::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored line is not a valid history record.
    #[error("Malformed history entry at line {line}: {source}")]
    #[diagnostic(
        code(gateway::history::deserialize),
        help("The history log was edited or truncated outside the gateway")
    )]
    Deserialize {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize history record: {0}")]
    #[diagnostic(code(gateway::history::serialize))]
    Serialize(#[from] serde_json::Error),
}

/// Errors related to policy construction.
#[derive(Error, Debug, Diagnostic)]
pub enum PolicyError {
    #[error("Allowed commands cannot be empty")]
    #[diagnostic(
        code(gateway::policy::empty),
        help("Provide at least one command entry; unknown commands are always denied")
    )]
    Empty,

    #[error("Failed to read policy file {}: {source}", path.display())]
    #[diagnostic(code(gateway::policy::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy: {0}")]
    #[diagnostic(
        code(gateway::policy::parse),
        help("Expected a JSON object mapping each command to its args and paths lists")
    )]
    Parse(#[from] serde_json::Error),

    #[error("Cannot resolve path prefix '{prefix}' for command '{command}': {source}")]
    #[diagnostic(code(gateway::policy::prefix))]
    Prefix {
        command: String,
        prefix: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors related to the MCP server.
#[derive(Error, Debug, Diagnostic)]
pub enum ServerError {
    /// Failed to initialize server
    #[error("Failed to initialize MCP server: {0}")]
    #[diagnostic(code(gateway::server::init))]
    InitializationFailed(String),

    /// Transport error
    #[error("Transport error: {0}")]
    #[diagnostic(code(gateway::server::transport))]
    Transport(String),

    /// An outcome could not be audited; serving stopped.
    #[error("Server halted: {0}")]
    #[diagnostic(
        code(gateway::server::halted),
        help("Fix the audit log location before restarting the gateway")
    )]
    Halted(String),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
