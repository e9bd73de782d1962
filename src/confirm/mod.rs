//! Risk assessment and the confirmation gate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use command_gateway::confirm::{ConfirmationGate, RiskLevel, RiskTable, ScriptedApproval};
//!
//! let gate = ConfirmationGate::new(RiskTable::default(), Arc::new(ScriptedApproval::new([true])));
//! assert_eq!(gate.assess_risk("ls", &[]), RiskLevel::Low);
//! assert_eq!(gate.assess_risk("rm", &["-rf".to_string()]), RiskLevel::High);
//! ```

mod approval;
mod risk;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

pub use approval::{
    AllowAll, ApprovalStrategy, ConfirmationRequest, DenyAll, FnApproval, InteractivePrompt,
    ScriptedApproval, prompt,
};
pub use risk::{RiskLevel, RiskTable, assess_risk};

/// Classifies requests and asks the injected strategy for approval.
#[derive(Clone)]
pub struct ConfirmationGate {
    risk: RiskTable,
    strategy: Arc<dyn ApprovalStrategy>,
}

impl ConfirmationGate {
    #[must_use]
    pub fn new(risk: RiskTable, strategy: Arc<dyn ApprovalStrategy>) -> Self {
        Self { risk, strategy }
    }

    #[must_use]
    pub fn assess_risk(&self, command: &str, args: &[String]) -> RiskLevel {
        self.risk.assess(command, args)
    }

    /// Builds the immutable snapshot handed to the strategy.
    #[must_use]
    pub fn request(
        &self,
        command: &str,
        args: &[String],
        path: &Path,
        user: &str,
    ) -> ConfirmationRequest {
        ConfirmationRequest {
            command: command.to_string(),
            args: args.to_vec(),
            path: path.to_path_buf(),
            user: user.to_string(),
            risk_level: self.assess_risk(command, args),
        }
    }

    /// Asks the strategy about an already built request.
    #[instrument(skip(self, request), fields(command = %request.command, risk = %request.risk_level))]
    pub async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        let approved = self.strategy.decide(request).await;
        debug!(approved, "Confirmation decided");
        approved
    }

    /// Assesses risk and asks for approval in one step.
    pub async fn require_confirmation(
        &self,
        command: &str,
        args: &[String],
        path: &Path,
        user: &str,
    ) -> bool {
        let request = self.request(command, args, path, user);
        self.confirm(&request).await
    }
}

impl std::fmt::Debug for ConfirmationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationGate")
            .field("risk", &self.risk)
            .finish_non_exhaustive()
    }
}
