//! Static risk classification.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Coarse risk classification of a command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Warning shown to the approver alongside the request.
    #[must_use]
    pub fn warning(self) -> &'static str {
        match self {
            Self::Low => "This operation is safe but requires confirmation.",
            Self::Medium => "This operation could modify files or data.",
            Self::High => "This operation could significantly impact the system.",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Lookup table driving [`RiskTable::assess`].
///
/// Read-only commands are checked first, so `ls -f` stays `LOW`. Anything
/// not listed defaults to `MEDIUM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskTable {
    /// Commands that only read.
    #[serde(default)]
    pub low: BTreeSet<String>,
    /// Destructive commands.
    #[serde(default)]
    pub high: BTreeSet<String>,
    /// Arguments that escalate any non-read command to `HIGH`.
    #[serde(default)]
    pub escalating_args: BTreeSet<String>,
}

impl Default for RiskTable {
    fn default() -> Self {
        let set = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            low: set(&["ls", "cat", "head", "tail"]),
            high: set(&["rm", "mv"]),
            escalating_args: set(&["-f", "--force"]),
        }
    }
}

impl RiskTable {
    /// Classifies `command` invoked with `args`.
    #[must_use]
    pub fn assess(&self, command: &str, args: &[String]) -> RiskLevel {
        if self.low.contains(command) {
            RiskLevel::Low
        } else if self.high.contains(command)
            || args.iter().any(|a| self.escalating_args.contains(a))
        {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        }
    }
}

/// Classifies with the built-in table.
#[must_use]
pub fn assess_risk(command: &str, args: &[String]) -> RiskLevel {
    RiskTable::default().assess(command, args)
}
