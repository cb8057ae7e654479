use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::product::ProductEconomics;

/// Rounding for cent amounts derived from percentage arithmetic.
/// Half-up matches printed retail receipts; half-even is available for
/// deployments that settle against banker's-rounding ledgers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    HalfUp,
    HalfEven,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown rounding mode `{0}` (expected half_up|half_even)")]
pub struct ParseRoundingModeError(pub String);

impl RoundingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HalfUp => "half_up",
            Self::HalfEven => "half_even",
        }
    }

    fn strategy(self) -> RoundingStrategy {
        match self {
            Self::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            Self::HalfEven => RoundingStrategy::MidpointNearestEven,
        }
    }
}

impl std::str::FromStr for RoundingMode {
    type Err = ParseRoundingModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "half_up" => Ok(Self::HalfUp),
            "half_even" => Ok(Self::HalfEven),
            other => Err(ParseRoundingModeError(other.to_string())),
        }
    }
}

/// Every quantity the decision path computes, always fully populated so
/// the register can render an explanation whatever the outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub price_before_cents: i64,
    pub discount_cents: i64,
    pub price_after_cents: i64,
    pub margin_before_cents: i64,
    pub margin_after_cents: i64,
    pub margin_before_pct: Decimal,
    pub margin_after_pct: Decimal,
    pub cost_floor_cents: i64,
    pub commission_before_cents: i64,
    pub commission_after_cents: i64,
    pub commission_impact_cents: i64,
}

pub fn margin_cents(price_cents: i64, cost_cents: i64) -> i64 {
    price_cents - cost_cents
}

/// Margin as a percentage of price, to four decimal places. A zero
/// price is defined as zero margin rather than a division error.
pub fn margin_pct(price_cents: i64, cost_cents: i64) -> Decimal {
    if price_cents == 0 {
        return Decimal::ZERO;
    }

    (Decimal::from(price_cents - cost_cents) * Decimal::ONE_HUNDRED / Decimal::from(price_cents))
        .round_dp(4)
}

pub fn discount_cents(price_cents: i64, discount_pct: Decimal, mode: RoundingMode) -> i64 {
    round_cents(Decimal::from(price_cents) * discount_pct / Decimal::ONE_HUNDRED, mode)
}

pub fn price_after_cents(price_cents: i64, discount_pct: Decimal, mode: RoundingMode) -> i64 {
    price_cents - discount_cents(price_cents, discount_pct, mode)
}

/// Minimum acceptable post-discount price: cost plus the configured
/// margin buffer.
pub fn cost_floor_cents(cost_cents: i64, buffer_pct: Decimal, mode: RoundingMode) -> i64 {
    round_cents(
        Decimal::from(cost_cents) * (Decimal::ONE + buffer_pct / Decimal::ONE_HUNDRED),
        mode,
    )
}

pub fn commission_cents(margin_cents: i64, commission_rate: Decimal, mode: RoundingMode) -> i64 {
    round_cents(Decimal::from(margin_cents) * commission_rate, mode)
}

pub fn breakdown(
    economics: &ProductEconomics,
    discount_pct: Decimal,
    commission_rate: Decimal,
    min_margin_buffer_pct: Decimal,
    mode: RoundingMode,
) -> PricingBreakdown {
    let price_before_cents = economics.unit_price_cents;
    let cost_cents = economics.unit_cost_cents;

    let discount = discount_cents(price_before_cents, discount_pct, mode);
    let price_after_cents = price_before_cents - discount;

    let margin_before_cents = margin_cents(price_before_cents, cost_cents);
    let margin_after_cents = margin_cents(price_after_cents, cost_cents);

    let commission_before_cents = commission_cents(margin_before_cents, commission_rate, mode);
    let commission_after_cents = commission_cents(margin_after_cents, commission_rate, mode);

    PricingBreakdown {
        price_before_cents,
        discount_cents: discount,
        price_after_cents,
        margin_before_cents,
        margin_after_cents,
        margin_before_pct: margin_pct(price_before_cents, cost_cents),
        margin_after_pct: margin_pct(price_after_cents, cost_cents),
        cost_floor_cents: cost_floor_cents(cost_cents, min_margin_buffer_pct, mode),
        commission_before_cents,
        commission_after_cents,
        commission_impact_cents: commission_before_cents - commission_after_cents,
    }
}

fn round_cents(value: Decimal, mode: RoundingMode) -> i64 {
    value.round_dp_with_strategy(0, mode.strategy()).to_i64().unwrap_or(i64::MAX)
}
