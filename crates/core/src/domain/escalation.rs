use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::actor::{EmployeeId, Role};
use crate::domain::decision::DecisionRecord;
use crate::pricing::PricingBreakdown;

/// Monotonic case id assigned by the case store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Pending,
    Approved,
    Denied,
    Expired,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown case state `{0}`")]
pub struct ParseCaseStateError(pub String);

impl CaseState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }
}

impl std::str::FromStr for CaseState {
    type Err = ParseCaseStateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "expired" => Ok(Self::Expired),
            other => Err(ParseCaseStateError(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseAction {
    Approve,
    Deny,
}

impl CaseAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deny => "deny",
        }
    }
}

/// How a case reached a terminal state. `final_breakdown` is populated
/// on approvals, where the approved terms may differ from the original
/// proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResolution {
    pub approver_id: EmployeeId,
    pub approver_role: Role,
    pub action: CaseAction,
    pub final_discount_pct: Decimal,
    pub final_breakdown: Option<PricingBreakdown>,
    pub resolved_at: DateTime<Utc>,
}

/// A deferred approval, held by the state machine until a qualifying
/// approver acts or the timeout elapses. Ownership is by case id only;
/// the resolver may be a different process than the creator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationCase {
    pub id: CaseId,
    pub decision: DecisionRecord,
    pub opened_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: CaseState,
    pub resolution: Option<CaseResolution>,
}

impl EscalationCase {
    pub fn requester_role(&self) -> Role {
        self.decision.role
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state == CaseState::Pending && self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::CaseState;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!CaseState::Pending.is_terminal());
        assert!(CaseState::Approved.is_terminal());
        assert!(CaseState::Denied.is_terminal());
        assert!(CaseState::Expired.is_terminal());
    }

    #[test]
    fn case_state_round_trips_through_str() {
        for state in
            [CaseState::Pending, CaseState::Approved, CaseState::Denied, CaseState::Expired]
        {
            assert_eq!(state.as_str().parse::<CaseState>(), Ok(state));
        }
        assert!("open".parse::<CaseState>().is_err());
    }
}
