//! Quote-aware splitting of a raw command line.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// `command args... path`, split but not yet validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub command: String,
    pub args: Vec<String>,
    pub path: String,
}

impl ParsedCommand {
    /// Splits `raw` with shell quoting rules. The last token is the path.
    ///
    /// Quoting only groups words; nothing is expanded or substituted, and
    /// the resulting tokens still go through sanitization.
    ///
    /// # Errors
    ///
    /// - `Empty` for blank input
    /// - `Tokenize` for unbalanced quotes
    /// - `MissingPath` when fewer than two tokens remain
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut parts = shell_words::split(raw).map_err(|e| ParseError::Tokenize(e.to_string()))?;
        if parts.len() < 2 {
            return Err(ParseError::MissingPath { found: parts.len() });
        }

        let path = parts.pop().unwrap_or_default();
        let command = parts.remove(0);
        Ok(Self {
            command,
            args: parts,
            path,
        })
    }
}
