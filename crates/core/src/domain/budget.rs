use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::actor::EmployeeId;

/// Identifies one accounting period, e.g. a shift (`"2026-08-06:am"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodId(pub String);

/// Discretionary discount budget for one `(employee, period)` pair.
/// Invariant: `reserved_cents + committed_cents <= limit_cents`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetEntry {
    pub limit_cents: i64,
    pub reserved_cents: i64,
    pub committed_cents: i64,
}

impl BudgetEntry {
    pub fn open(limit_cents: i64) -> Self {
        Self { limit_cents, reserved_cents: 0, committed_cents: 0 }
    }

    pub fn available_cents(&self) -> i64 {
        self.limit_cents - self.reserved_cents - self.committed_cents
    }

    pub fn holds_invariant(&self) -> bool {
        self.reserved_cents >= 0
            && self.committed_cents >= 0
            && self.reserved_cents + self.committed_cents <= self.limit_cents
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Reserved,
    Committed,
    Released,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown reservation state `{0}`")]
pub struct ParseReservationStateError(pub String);

impl ReservationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Committed => "committed",
            Self::Released => "released",
        }
    }
}

impl std::str::FromStr for ReservationState {
    type Err = ParseReservationStateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "reserved" => Ok(Self::Reserved),
            "committed" => Ok(Self::Committed),
            "released" => Ok(Self::Released),
            other => Err(ParseReservationStateError(other.to_string())),
        }
    }
}

/// A hold on budget taken during validation and settled (committed or
/// released) when the transaction concludes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub employee_id: EmployeeId,
    pub period: PeriodId,
    pub amount_cents: i64,
    pub transaction_id: Option<String>,
    pub requested_at: DateTime<Utc>,
}
