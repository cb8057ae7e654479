use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::{EmployeeId, Role};
use crate::domain::product::{ProductEconomics, ProductId};
use crate::policy::MarginClass;
use crate::pricing::PricingBreakdown;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    BelowCostFloor,
    ExceedsTierLimit,
}

impl EscalationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BelowCostFloor => "below_cost_floor",
            Self::ExceedsTierLimit => "exceeds_tier_limit",
        }
    }
}

/// One proposed line-item discount. Ephemeral: never persisted unless
/// the resulting decision escalates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountRequest {
    pub product_id: ProductId,
    pub employee_id: EmployeeId,
    pub proposed_discount_pct: Decimal,
    pub transaction_id: Option<String>,
}

/// The full outcome of one `validate` call: every computed quantity
/// plus the verdict. Immutable once produced; this is the unit written
/// to the audit sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: DecisionId,
    pub product_id: ProductId,
    pub employee_id: EmployeeId,
    pub role: Role,
    pub transaction_id: Option<String>,
    pub proposed_discount_pct: Decimal,
    pub economics: ProductEconomics,
    pub breakdown: PricingBreakdown,
    pub margin_class: MarginClass,
    pub max_discount_pct: Option<Decimal>,
    pub unrestricted: bool,
    pub allowed: bool,
    pub escalation_required: bool,
    pub escalation_reason: Option<EscalationReason>,
    pub budget_remaining_before_cents: i64,
    pub budget_remaining_after_cents: i64,
    pub decided_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{DecisionId, DecisionRecord, EscalationReason};
    use crate::domain::actor::{EmployeeId, Role};
    use crate::domain::product::{ProductEconomics, ProductId};
    use crate::policy::MarginClass;
    use crate::pricing::{breakdown, RoundingMode};

    #[test]
    fn decision_record_round_trips_through_serde() {
        let economics = ProductEconomics::new(164_999, 112_200).expect("economics");
        let record = DecisionRecord {
            decision_id: DecisionId("d-1".to_string()),
            product_id: ProductId("sku-401".to_string()),
            employee_id: EmployeeId("e-17".to_string()),
            role: Role::Staff,
            transaction_id: Some("txn-88".to_string()),
            proposed_discount_pct: Decimal::from(15),
            economics,
            breakdown: breakdown(
                &economics,
                Decimal::from(15),
                Decimal::new(5, 2),
                Decimal::from(5),
                RoundingMode::HalfUp,
            ),
            margin_class: MarginClass::High,
            max_discount_pct: Some(Decimal::from(10)),
            unrestricted: false,
            allowed: false,
            escalation_required: true,
            escalation_reason: Some(EscalationReason::ExceedsTierLimit),
            budget_remaining_before_cents: 50_000,
            budget_remaining_after_cents: 25_250,
            decided_at: Utc::now(),
        };

        let payload = serde_json::to_string(&record).expect("serialize");
        let restored: DecisionRecord = serde_json::from_str(&payload).expect("deserialize");
        assert_eq!(restored, record);
    }

    #[test]
    fn escalation_reasons_have_stable_wire_names() {
        assert_eq!(EscalationReason::BelowCostFloor.as_str(), "below_cost_floor");
        assert_eq!(EscalationReason::ExceedsTierLimit.as_str(), "exceeds_tier_limit");
    }
}
