use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::config::EngineConfig;
use crate::domain::actor::{Actor, Role};
use crate::domain::decision::{DecisionId, DecisionRecord};
use crate::domain::escalation::{CaseAction, CaseId, CaseResolution, CaseState, EscalationCase};
use crate::ledger::{BudgetLedger, LedgerError};
use crate::policy::{PolicyTableError, TierPolicy};
use crate::pricing::{self, RoundingMode};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CaseStoreError {
    #[error("unknown case {0:?}")]
    UnknownCase(CaseId),
    #[error("case store persistence failure: {0}")]
    Persistence(String),
}

/// Result of the store's atomic completion attempt: either this caller
/// won the `Pending` transition, or someone else already resolved the
/// case and its recorded outcome is returned instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    Applied(EscalationCase),
    AlreadyTerminal(EscalationCase),
}

/// Durable home of escalation cases. Ids are monotonic so approvals can
/// happen asynchronously, in a different process than the one that
/// opened the case.
#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn insert(
        &self,
        decision: DecisionRecord,
        opened_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<EscalationCase, CaseStoreError>;

    async fn find(&self, case_id: CaseId) -> Result<Option<EscalationCase>, CaseStoreError>;

    /// Compare-and-swap on `Pending`: concurrent resolvers serialize
    /// here and only the first transition is applied.
    async fn complete(
        &self,
        case_id: CaseId,
        state: CaseState,
        resolution: CaseResolution,
    ) -> Result<CompletionOutcome, CaseStoreError>;

    /// Transitions every pending case past its deadline to `Expired`
    /// and returns the cases that changed.
    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EscalationCase>, CaseStoreError>;
}

#[derive(Default)]
struct InnerCases {
    next_id: i64,
    cases: BTreeMap<i64, EscalationCase>,
}

#[derive(Default)]
pub struct InMemoryCaseStore {
    inner: Mutex<InnerCases>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InnerCases> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn insert(
        &self,
        decision: DecisionRecord,
        opened_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<EscalationCase, CaseStoreError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let case = EscalationCase {
            id: CaseId(inner.next_id),
            decision,
            opened_at,
            expires_at,
            state: CaseState::Pending,
            resolution: None,
        };
        inner.cases.insert(case.id.0, case.clone());
        Ok(case)
    }

    async fn find(&self, case_id: CaseId) -> Result<Option<EscalationCase>, CaseStoreError> {
        Ok(self.lock().cases.get(&case_id.0).cloned())
    }

    async fn complete(
        &self,
        case_id: CaseId,
        state: CaseState,
        resolution: CaseResolution,
    ) -> Result<CompletionOutcome, CaseStoreError> {
        let mut inner = self.lock();
        let case = inner
            .cases
            .get_mut(&case_id.0)
            .ok_or(CaseStoreError::UnknownCase(case_id))?;

        if case.state.is_terminal() {
            return Ok(CompletionOutcome::AlreadyTerminal(case.clone()));
        }

        case.state = state;
        case.resolution = Some(resolution);
        Ok(CompletionOutcome::Applied(case.clone()))
    }

    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EscalationCase>, CaseStoreError> {
        let mut inner = self.lock();
        let mut expired = Vec::new();
        for case in inner.cases.values_mut() {
            if case.is_overdue(now) {
                case.state = CaseState::Expired;
                expired.push(case.clone());
            }
        }
        Ok(expired)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EscalationError {
    #[error("unknown escalation case {0:?}")]
    UnknownCase(CaseId),
    #[error("decision {0:?} does not require escalation")]
    DecisionNotEscalatable(DecisionId),
    #[error("approver role {approver_role:?} does not outrank requester role {requester_role:?}")]
    InsufficientRoleAuthority { approver_role: Role, requester_role: Role },
    #[error("override discount percentage must be within 0..=100: {0}%")]
    InvalidOverridePct(Decimal),
    #[error("approver cannot authorize these terms: {reason}")]
    ApprovalNotAuthorized { reason: String },
    #[error("budget exhausted: requested {requested_cents} cents, available {available_cents} cents")]
    BudgetExhausted { requested_cents: i64, available_cents: i64 },
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    Store(#[from] CaseStoreError),
}

impl From<LedgerError> for EscalationError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::InsufficientBudget { requested_cents, available_cents } => {
                Self::BudgetExhausted { requested_cents, available_cents }
            }
            other => Self::Ledger(other),
        }
    }
}

/// Drives escalation cases from `Pending` to a terminal state.
///
/// Approvals are re-validated with the same pricing and policy logic
/// used at the register, against the approver's own authority: the cost
/// floor binds everyone, and a non-unrestricted approver cannot grant
/// terms beyond their own tier ceiling.
pub struct EscalationService<C, L, S> {
    store: C,
    ledger: L,
    audit: S,
    policy: TierPolicy,
    min_margin_buffer_pct: Decimal,
    rounding: RoundingMode,
    case_timeout: Duration,
}

impl<C, L, S> EscalationService<C, L, S>
where
    C: CaseStore,
    L: BudgetLedger,
    S: AuditSink,
{
    pub fn new(
        config: &EngineConfig,
        store: C,
        ledger: L,
        audit: S,
    ) -> Result<Self, PolicyTableError> {
        let policy = TierPolicy::new(
            config.thresholds.high_margin_threshold_pct,
            config.policy.tiers.clone(),
            config.policy.unrestricted_roles.clone(),
        )?;
        Ok(Self {
            store,
            ledger,
            audit,
            policy,
            min_margin_buffer_pct: config.thresholds.min_margin_buffer_pct,
            rounding: config.rounding,
            case_timeout: config.case_timeout(),
        })
    }

    pub async fn open_case(
        &self,
        decision: &DecisionRecord,
    ) -> Result<EscalationCase, EscalationError> {
        if !decision.escalation_required {
            return Err(EscalationError::DecisionNotEscalatable(decision.decision_id.clone()));
        }

        let opened_at = Utc::now();
        let case =
            self.store.insert(decision.clone(), opened_at, opened_at + self.case_timeout).await?;

        let mut event = AuditEvent::new(
            Some(decision.decision_id.clone()),
            Some(case.id),
            correlation_id(decision),
            "escalation.case_opened",
            AuditCategory::Escalation,
            decision.employee_id.0.clone(),
            AuditOutcome::Escalated,
        )
        .with_metadata("proposed_discount_pct", decision.proposed_discount_pct.to_string());
        if let Some(reason) = decision.escalation_reason {
            event = event.with_metadata("escalation_reason", reason.as_str());
        }
        self.audit.emit(event);

        tracing::info!(case_id = case.id.0, decision_id = %decision.decision_id.0, "escalation case opened");
        Ok(case)
    }

    /// Resolves a pending case. Terminal cases replay their recorded
    /// outcome with no side effects, so re-approving an approved case
    /// never double-commits budget.
    pub async fn resolve(
        &self,
        case_id: CaseId,
        approver: &Actor,
        action: CaseAction,
        override_discount_pct: Option<Decimal>,
    ) -> Result<EscalationCase, EscalationError> {
        let case = self
            .store
            .find(case_id)
            .await?
            .ok_or(EscalationError::UnknownCase(case_id))?;

        if case.state.is_terminal() {
            return Ok(case);
        }

        let requester_role = case.requester_role();
        if !approver.role.outranks(requester_role) {
            return Err(EscalationError::InsufficientRoleAuthority {
                approver_role: approver.role,
                requester_role,
            });
        }

        match action {
            CaseAction::Deny => self.deny(case, approver).await,
            CaseAction::Approve => self.approve(case, approver, override_discount_pct).await,
        }
    }

    /// Sweeps pending cases past their deadline into `Expired`. Expiry
    /// has the same budget effect as denial (none) but is tagged
    /// distinctly for reporting.
    pub async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CaseId>, EscalationError> {
        let expired = self.store.expire_overdue(now).await?;

        for case in &expired {
            self.audit.emit(
                AuditEvent::new(
                    Some(case.decision.decision_id.clone()),
                    Some(case.id),
                    correlation_id(&case.decision),
                    "escalation.case_expired",
                    AuditCategory::Escalation,
                    "escalation-sweeper",
                    AuditOutcome::Denied,
                )
                .with_metadata("expired_at", now.to_rfc3339()),
            );
            tracing::info!(case_id = case.id.0, "escalation case expired");
        }

        Ok(expired.iter().map(|case| case.id).collect())
    }

    async fn deny(
        &self,
        case: EscalationCase,
        approver: &Actor,
    ) -> Result<EscalationCase, EscalationError> {
        let resolution = CaseResolution {
            approver_id: approver.employee_id.clone(),
            approver_role: approver.role,
            action: CaseAction::Deny,
            final_discount_pct: case.decision.proposed_discount_pct,
            final_breakdown: None,
            resolved_at: Utc::now(),
        };

        match self.store.complete(case.id, CaseState::Denied, resolution).await? {
            CompletionOutcome::Applied(resolved) => {
                self.audit.emit(
                    AuditEvent::new(
                        Some(resolved.decision.decision_id.clone()),
                        Some(resolved.id),
                        correlation_id(&resolved.decision),
                        "escalation.case_denied",
                        AuditCategory::Escalation,
                        approver.employee_id.0.clone(),
                        AuditOutcome::Denied,
                    )
                    .with_metadata("requester", resolved.decision.employee_id.0.clone())
                    .with_metadata(
                        "proposed_discount_pct",
                        resolved.decision.proposed_discount_pct.to_string(),
                    ),
                );
                Ok(resolved)
            }
            CompletionOutcome::AlreadyTerminal(resolved) => Ok(resolved),
        }
    }

    async fn approve(
        &self,
        case: EscalationCase,
        approver: &Actor,
        override_discount_pct: Option<Decimal>,
    ) -> Result<EscalationCase, EscalationError> {
        let final_pct = override_discount_pct.unwrap_or(case.decision.proposed_discount_pct);
        if final_pct < Decimal::ZERO || final_pct > Decimal::ONE_HUNDRED {
            return Err(EscalationError::InvalidOverridePct(final_pct));
        }

        // Same checks the register runs, against the approver's own
        // authority and the economics snapshot captured at validation.
        let breakdown = pricing::breakdown(
            &case.decision.economics,
            final_pct,
            approver.commission_rate,
            self.min_margin_buffer_pct,
            self.rounding,
        );
        let ceiling = self.policy.resolve(approver.role, breakdown.margin_before_pct);

        if breakdown.price_after_cents < breakdown.cost_floor_cents {
            return Err(EscalationError::ApprovalNotAuthorized {
                reason: format!(
                    "price after a {final_pct}% discount falls below the cost floor"
                ),
            });
        }
        if !ceiling.unrestricted && ceiling.max_discount_pct.map_or(true, |max| final_pct > max) {
            return Err(EscalationError::ApprovalNotAuthorized {
                reason: format!(
                    "{final_pct}% exceeds the {:?} ceiling for this margin class",
                    approver.role
                ),
            });
        }

        // Reserve before the state transition: a case is only marked
        // approved once its budget is held, and a losing concurrent
        // approver returns the hold untouched.
        let reservation = self
            .ledger
            .reserve(
                &case.decision.employee_id,
                breakdown.discount_cents,
                case.decision.transaction_id.clone(),
            )
            .await?;

        let resolution = CaseResolution {
            approver_id: approver.employee_id.clone(),
            approver_role: approver.role,
            action: CaseAction::Approve,
            final_discount_pct: final_pct,
            final_breakdown: Some(breakdown),
            resolved_at: Utc::now(),
        };

        match self.store.complete(case.id, CaseState::Approved, resolution).await? {
            CompletionOutcome::Applied(resolved) => {
                self.ledger.commit(&reservation.id).await?;

                self.audit.emit(
                    AuditEvent::new(
                        Some(resolved.decision.decision_id.clone()),
                        Some(resolved.id),
                        correlation_id(&resolved.decision),
                        "escalation.case_approved",
                        AuditCategory::Escalation,
                        approver.employee_id.0.clone(),
                        AuditOutcome::Applied,
                    )
                    .with_metadata("requester", resolved.decision.employee_id.0.clone())
                    .with_metadata(
                        "proposed_discount_pct",
                        resolved.decision.proposed_discount_pct.to_string(),
                    )
                    .with_metadata("final_discount_pct", final_pct.to_string())
                    .with_metadata("committed_cents", reservation.amount_cents.to_string()),
                );
                tracing::info!(
                    case_id = resolved.id.0,
                    approver = %approver.employee_id.0,
                    "escalation case approved"
                );
                Ok(resolved)
            }
            CompletionOutcome::AlreadyTerminal(resolved) => {
                if let Err(error) = self.ledger.release(&reservation.id).await {
                    tracing::warn!(
                        reservation_id = %reservation.id.0,
                        %error,
                        "failed to release reservation after losing a concurrent resolution"
                    );
                }
                Ok(resolved)
            }
        }
    }
}

fn correlation_id(decision: &DecisionRecord) -> String {
    decision.transaction_id.clone().unwrap_or_else(|| decision.decision_id.0.clone())
}
