use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::actor::EmployeeId;
use crate::domain::budget::{BudgetEntry, PeriodId, Reservation, ReservationId, ReservationState};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient budget: requested {requested_cents} cents, available {available_cents} cents")]
    InsufficientBudget { requested_cents: i64, available_cents: i64 },
    #[error("unknown or stale reservation {0:?}")]
    UnknownReservation(ReservationId),
    #[error("no open budget period for employee {0:?}")]
    NoOpenPeriod(EmployeeId),
    #[error("budget period already open for employee {employee_id:?}: {period:?}")]
    PeriodAlreadyOpen { employee_id: EmployeeId, period: PeriodId },
    #[error("invalid reservation amount: {0} cents")]
    InvalidAmount(i64),
    #[error("ledger persistence failure: {0}")]
    Persistence(String),
}

/// Reserve-then-commit protocol over per-employee budget entries.
///
/// Every operation is a single atomic unit, linearizable per employee:
/// the gap between validation and checkout confirmation can span
/// minutes, and a read-then-decrement would let two registers pass
/// validation against the same stale balance. Implementations that
/// cannot complete a mutation must fail closed rather than silently
/// succeed.
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    async fn open_period(
        &self,
        employee_id: &EmployeeId,
        period: PeriodId,
        limit_cents: i64,
    ) -> Result<(), LedgerError>;

    /// Archives the open entry; archived entries admit no further
    /// mutation and outstanding reservations against them become stale.
    async fn close_period(&self, employee_id: &EmployeeId) -> Result<(), LedgerError>;

    /// Read-only probe of the open entry's available budget.
    async fn remaining(&self, employee_id: &EmployeeId) -> Result<i64, LedgerError>;

    async fn reserve(
        &self,
        employee_id: &EmployeeId,
        amount_cents: i64,
        transaction_id: Option<String>,
    ) -> Result<Reservation, LedgerError>;

    /// Moves a reserved amount into committed spend. Stale ids are the
    /// caller's concurrency conflict to resolve with a fresh reserve;
    /// the ledger never retries on their behalf.
    async fn commit(&self, reservation_id: &ReservationId) -> Result<(), LedgerError>;

    async fn release(&self, reservation_id: &ReservationId) -> Result<(), LedgerError>;

    /// Frees reservations abandoned before `older_than` (direct-commit
    /// paths whose caller never confirmed). Returns the number reaped.
    async fn release_expired(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError>;
}

struct OpenPeriod {
    period: PeriodId,
    entry: BudgetEntry,
}

struct ArchivedPeriod {
    employee_id: EmployeeId,
    period: PeriodId,
    entry: BudgetEntry,
}

struct Slot {
    reservation: Reservation,
    state: ReservationState,
}

#[derive(Default)]
struct Inner {
    open: HashMap<EmployeeId, OpenPeriod>,
    archived: Vec<ArchivedPeriod>,
    reservations: HashMap<String, Slot>,
}

/// Reference ledger: one mutex guards all state, so each operation is
/// trivially a single atomic unit.
#[derive(Default)]
pub struct InMemoryBudgetLedger {
    inner: Mutex<Inner>,
}

impl InMemoryBudgetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Archived entries, for end-of-period reporting.
    pub fn archived_entries(&self) -> Vec<(EmployeeId, PeriodId, BudgetEntry)> {
        self.lock()
            .archived
            .iter()
            .map(|archived| {
                (archived.employee_id.clone(), archived.period.clone(), archived.entry)
            })
            .collect()
    }
}

#[async_trait]
impl BudgetLedger for InMemoryBudgetLedger {
    async fn open_period(
        &self,
        employee_id: &EmployeeId,
        period: PeriodId,
        limit_cents: i64,
    ) -> Result<(), LedgerError> {
        if limit_cents < 0 {
            return Err(LedgerError::InvalidAmount(limit_cents));
        }

        let mut inner = self.lock();
        if let Some(existing) = inner.open.get(employee_id) {
            return Err(LedgerError::PeriodAlreadyOpen {
                employee_id: employee_id.clone(),
                period: existing.period.clone(),
            });
        }

        inner.open.insert(
            employee_id.clone(),
            OpenPeriod { period, entry: BudgetEntry::open(limit_cents) },
        );
        Ok(())
    }

    async fn close_period(&self, employee_id: &EmployeeId) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let open = inner
            .open
            .remove(employee_id)
            .ok_or_else(|| LedgerError::NoOpenPeriod(employee_id.clone()))?;

        inner.archived.push(ArchivedPeriod {
            employee_id: employee_id.clone(),
            period: open.period,
            entry: open.entry,
        });
        Ok(())
    }

    async fn remaining(&self, employee_id: &EmployeeId) -> Result<i64, LedgerError> {
        let inner = self.lock();
        inner
            .open
            .get(employee_id)
            .map(|open| open.entry.available_cents())
            .ok_or_else(|| LedgerError::NoOpenPeriod(employee_id.clone()))
    }

    async fn reserve(
        &self,
        employee_id: &EmployeeId,
        amount_cents: i64,
        transaction_id: Option<String>,
    ) -> Result<Reservation, LedgerError> {
        if amount_cents < 0 {
            return Err(LedgerError::InvalidAmount(amount_cents));
        }

        let mut inner = self.lock();
        let open = inner
            .open
            .get_mut(employee_id)
            .ok_or_else(|| LedgerError::NoOpenPeriod(employee_id.clone()))?;

        let available = open.entry.available_cents();
        if amount_cents > available {
            return Err(LedgerError::InsufficientBudget {
                requested_cents: amount_cents,
                available_cents: available,
            });
        }

        open.entry.reserved_cents += amount_cents;
        let reservation = Reservation {
            id: ReservationId(Uuid::new_v4().to_string()),
            employee_id: employee_id.clone(),
            period: open.period.clone(),
            amount_cents,
            transaction_id,
            requested_at: Utc::now(),
        };
        inner.reservations.insert(
            reservation.id.0.clone(),
            Slot { reservation: reservation.clone(), state: ReservationState::Reserved },
        );

        Ok(reservation)
    }

    async fn commit(&self, reservation_id: &ReservationId) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let slot = inner
            .reservations
            .get(&reservation_id.0)
            .filter(|slot| slot.state == ReservationState::Reserved)
            .ok_or_else(|| LedgerError::UnknownReservation(reservation_id.clone()))?;
        let employee_id = slot.reservation.employee_id.clone();
        let period = slot.reservation.period.clone();
        let amount_cents = slot.reservation.amount_cents;

        let open = inner
            .open
            .get_mut(&employee_id)
            .filter(|open| open.period == period)
            .ok_or_else(|| LedgerError::UnknownReservation(reservation_id.clone()))?;
        open.entry.reserved_cents -= amount_cents;
        open.entry.committed_cents += amount_cents;

        if let Some(slot) = inner.reservations.get_mut(&reservation_id.0) {
            slot.state = ReservationState::Committed;
        }
        Ok(())
    }

    async fn release(&self, reservation_id: &ReservationId) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let slot = inner
            .reservations
            .get(&reservation_id.0)
            .filter(|slot| slot.state == ReservationState::Reserved)
            .ok_or_else(|| LedgerError::UnknownReservation(reservation_id.clone()))?;
        let employee_id = slot.reservation.employee_id.clone();
        let period = slot.reservation.period.clone();
        let amount_cents = slot.reservation.amount_cents;

        let open = inner
            .open
            .get_mut(&employee_id)
            .filter(|open| open.period == period)
            .ok_or_else(|| LedgerError::UnknownReservation(reservation_id.clone()))?;
        open.entry.reserved_cents -= amount_cents;

        if let Some(slot) = inner.reservations.get_mut(&reservation_id.0) {
            slot.state = ReservationState::Released;
        }
        Ok(())
    }

    async fn release_expired(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError> {
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .reservations
            .values()
            .filter(|slot| {
                slot.state == ReservationState::Reserved
                    && slot.reservation.requested_at < older_than
            })
            .map(|slot| slot.reservation.id.0.clone())
            .collect();

        let mut reaped = 0;
        for id in expired {
            let (employee_id, period, amount_cents) = {
                let slot = match inner.reservations.get(&id) {
                    Some(slot) => slot,
                    None => continue,
                };
                (
                    slot.reservation.employee_id.clone(),
                    slot.reservation.period.clone(),
                    slot.reservation.amount_cents,
                )
            };

            if let Some(open) =
                inner.open.get_mut(&employee_id).filter(|open| open.period == period)
            {
                open.entry.reserved_cents -= amount_cents;
            }
            if let Some(slot) = inner.reservations.get_mut(&id) {
                slot.state = ReservationState::Released;
            }
            reaped += 1;
        }

        Ok(reaped)
    }
}
