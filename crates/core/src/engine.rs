use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::config::EngineConfig;
use crate::domain::actor::{Actor, EmployeeId};
use crate::domain::budget::{Reservation, ReservationId};
use crate::domain::decision::{DecisionId, DecisionRecord, DiscountRequest, EscalationReason};
use crate::domain::product::{ProductEconomics, ProductId};
use crate::ledger::{BudgetLedger, LedgerError};
use crate::policy::{PolicyTableError, TierPolicy};
use crate::pricing;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the product catalog. Existence checks happen here,
/// before any computation; a missing product never reaches the policy
/// path.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn economics(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<ProductEconomics>, StoreError>;
}

/// Read-only view of the employee roster: role and commission rate.
#[async_trait]
pub trait EmployeeStore: Send + Sync {
    async fn actor(&self, employee_id: &EmployeeId) -> Result<Option<Actor>, StoreError>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryProductStore {
    products: HashMap<String, ProductEconomics>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, product_id: ProductId, economics: ProductEconomics) {
        self.products.insert(product_id.0, economics);
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn economics(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<ProductEconomics>, StoreError> {
        Ok(self.products.get(&product_id.0).copied())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryEmployeeStore {
    actors: HashMap<String, Actor>,
}

impl InMemoryEmployeeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, actor: Actor) {
        self.actors.insert(actor.employee_id.0.clone(), actor);
    }
}

#[async_trait]
impl EmployeeStore for InMemoryEmployeeStore {
    async fn actor(&self, employee_id: &EmployeeId) -> Result<Option<Actor>, StoreError> {
        Ok(self.actors.get(&employee_id.0).cloned())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("discount percentage must be within 0..=100: {0}%")]
    InvalidDiscountPct(Decimal),
    #[error("unknown product {0:?}")]
    UnknownProduct(ProductId),
    #[error("unknown employee {0:?}")]
    UnknownEmployee(EmployeeId),
    #[error("decision {decision_id:?} was not allowed and cannot be committed directly")]
    DecisionNotAllowed { decision_id: DecisionId },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// The validation orchestrator. Stateless apart from its immutable
/// configuration, so concurrent calls for different employees proceed
/// fully in parallel; the budget ledger is the only shared mutable
/// resource and is only probed read-only here.
pub struct DiscountEngine<P, E, L, S> {
    config: EngineConfig,
    policy: TierPolicy,
    products: P,
    employees: E,
    ledger: L,
    audit: S,
}

impl<P, E, L, S> DiscountEngine<P, E, L, S>
where
    P: ProductStore,
    E: EmployeeStore,
    L: BudgetLedger,
    S: AuditSink,
{
    pub fn new(
        config: EngineConfig,
        products: P,
        employees: E,
        ledger: L,
        audit: S,
    ) -> Result<Self, PolicyTableError> {
        let policy = TierPolicy::new(
            config.thresholds.high_margin_threshold_pct,
            config.policy.tiers.clone(),
            config.policy.unrestricted_roles.clone(),
        )?;
        Ok(Self { config, policy, products, employees, ledger, audit })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Produces the full decision record for one proposed discount.
    ///
    /// Denial and escalation are successful results, not errors: every
    /// policy outcome yields a record and an audit entry. Only malformed
    /// input and unavailable collaborators surface as errors, and input
    /// errors are rejected before any computation or audit write.
    pub async fn validate(&self, request: &DiscountRequest) -> Result<DecisionRecord, EngineError> {
        let pct = request.proposed_discount_pct;
        if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
            return Err(EngineError::InvalidDiscountPct(pct));
        }

        let economics = self
            .products
            .economics(&request.product_id)
            .await?
            .ok_or_else(|| EngineError::UnknownProduct(request.product_id.clone()))?;
        let actor = self
            .employees
            .actor(&request.employee_id)
            .await?
            .ok_or_else(|| EngineError::UnknownEmployee(request.employee_id.clone()))?;

        let breakdown = pricing::breakdown(
            &economics,
            pct,
            actor.commission_rate,
            self.config.thresholds.min_margin_buffer_pct,
            self.config.rounding,
        );
        let ceiling = self.policy.resolve(actor.role, breakdown.margin_before_pct);

        // Fixed evaluation order, first match wins, so the reason is
        // unambiguous. The cost floor binds unrestricted roles too; a
        // role with no resolvable ceiling escalates rather than passes.
        let escalation_reason = if breakdown.price_after_cents < breakdown.cost_floor_cents {
            Some(EscalationReason::BelowCostFloor)
        } else if !ceiling.unrestricted
            && ceiling.max_discount_pct.map_or(true, |max| pct > max)
        {
            Some(EscalationReason::ExceedsTierLimit)
        } else {
            None
        };
        let allowed = escalation_reason.is_none();

        // Read-only projection; the ledger is only mutated on commit.
        let budget_remaining_before_cents = self.ledger.remaining(&request.employee_id).await?;
        let budget_remaining_after_cents =
            budget_remaining_before_cents - breakdown.discount_cents;

        let record = DecisionRecord {
            decision_id: DecisionId(Uuid::new_v4().to_string()),
            product_id: request.product_id.clone(),
            employee_id: request.employee_id.clone(),
            role: actor.role,
            transaction_id: request.transaction_id.clone(),
            proposed_discount_pct: pct,
            economics,
            breakdown,
            margin_class: ceiling.margin_class,
            max_discount_pct: ceiling.max_discount_pct,
            unrestricted: ceiling.unrestricted,
            allowed,
            escalation_required: !allowed,
            escalation_reason,
            budget_remaining_before_cents,
            budget_remaining_after_cents,
            decided_at: Utc::now(),
        };

        let outcome = if allowed { AuditOutcome::Allowed } else { AuditOutcome::Escalated };
        let mut event = AuditEvent::new(
            Some(record.decision_id.clone()),
            None,
            correlation_id(&record),
            "discount.validated",
            AuditCategory::Validation,
            record.employee_id.0.clone(),
            outcome,
        )
        .with_metadata("product_id", record.product_id.0.clone())
        .with_metadata("proposed_discount_pct", pct.to_string())
        .with_metadata("discount_cents", record.breakdown.discount_cents.to_string())
        .with_metadata("price_after_cents", record.breakdown.price_after_cents.to_string())
        .with_metadata("margin_class", record.margin_class.as_str());
        if let Some(reason) = record.escalation_reason {
            event = event.with_metadata("escalation_reason", reason.as_str());
        }
        self.audit.emit(event);

        tracing::debug!(
            decision_id = %record.decision_id.0,
            employee_id = %record.employee_id.0,
            allowed,
            "discount validated"
        );

        Ok(record)
    }

    /// Direct-commit path, step one: hold budget for an allowed
    /// decision. The hold is settled by `confirm` or `abandon`, or
    /// reaped by the ledger's reservation timeout if the register never
    /// comes back.
    pub async fn reserve_decision(
        &self,
        decision: &DecisionRecord,
    ) -> Result<Reservation, EngineError> {
        if !decision.allowed {
            return Err(EngineError::DecisionNotAllowed {
                decision_id: decision.decision_id.clone(),
            });
        }

        let reservation = self
            .ledger
            .reserve(
                &decision.employee_id,
                decision.breakdown.discount_cents,
                decision.transaction_id.clone(),
            )
            .await?;

        self.audit.emit(
            AuditEvent::new(
                Some(decision.decision_id.clone()),
                None,
                correlation_id(decision),
                "ledger.reserved",
                AuditCategory::Ledger,
                decision.employee_id.0.clone(),
                AuditOutcome::Applied,
            )
            .with_metadata("reservation_id", reservation.id.0.clone())
            .with_metadata("amount_cents", reservation.amount_cents.to_string()),
        );

        Ok(reservation)
    }

    /// Direct-commit path, step two: checkout confirmed.
    pub async fn confirm(
        &self,
        decision: &DecisionRecord,
        reservation_id: &ReservationId,
    ) -> Result<(), EngineError> {
        self.ledger.commit(reservation_id).await?;

        self.audit.emit(
            AuditEvent::new(
                Some(decision.decision_id.clone()),
                None,
                correlation_id(decision),
                "ledger.committed",
                AuditCategory::Ledger,
                decision.employee_id.0.clone(),
                AuditOutcome::Applied,
            )
            .with_metadata("reservation_id", reservation_id.0.clone()),
        );
        Ok(())
    }

    /// Direct-commit path, abandoned before checkout.
    pub async fn abandon(
        &self,
        decision: &DecisionRecord,
        reservation_id: &ReservationId,
    ) -> Result<(), EngineError> {
        self.ledger.release(reservation_id).await?;

        self.audit.emit(
            AuditEvent::new(
                Some(decision.decision_id.clone()),
                None,
                correlation_id(decision),
                "ledger.released",
                AuditCategory::Ledger,
                decision.employee_id.0.clone(),
                AuditOutcome::Applied,
            )
            .with_metadata("reservation_id", reservation_id.0.clone()),
        );
        Ok(())
    }
}

fn correlation_id(decision: &DecisionRecord) -> String {
    decision.transaction_id.clone().unwrap_or_else(|| decision.decision_id.0.clone())
}
