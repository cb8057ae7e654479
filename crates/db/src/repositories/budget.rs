use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use tillgate_core::domain::actor::EmployeeId;
use tillgate_core::domain::budget::{PeriodId, Reservation, ReservationId};
use tillgate_core::ledger::{BudgetLedger, LedgerError};

use crate::DbPool;

const MAX_ATTEMPTS: u32 = 3;

/// Durable budget ledger over SQLite.
///
/// Each mutation runs in one transaction whose guard is a conditional
/// `UPDATE` — the balance check and the decrement are the same
/// statement, never a separate read followed by a write. Transient lock
/// contention is retried a bounded number of times; anything that still
/// cannot complete fails closed as a persistence error.
pub struct SqlBudgetLedger {
    pool: DbPool,
}

impl SqlBudgetLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Inner single-attempt outcome: `Fail` is a terminal business result,
/// while the `Err` branch carries a database error that may be retried.
enum Step<T> {
    Done(T),
    Fail(LedgerError),
}

fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            message.contains("locked") || message.contains("busy")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

fn fail_closed(error: sqlx::Error) -> LedgerError {
    LedgerError::Persistence(error.to_string())
}

#[async_trait]
impl BudgetLedger for SqlBudgetLedger {
    async fn open_period(
        &self,
        employee_id: &EmployeeId,
        period: PeriodId,
        limit_cents: i64,
    ) -> Result<(), LedgerError> {
        if limit_cents < 0 {
            return Err(LedgerError::InvalidAmount(limit_cents));
        }

        let existing = sqlx::query(
            "SELECT period FROM budget_period WHERE employee_id = ? AND status = 'open'",
        )
        .bind(&employee_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(fail_closed)?;

        if let Some(row) = existing {
            let open_period: String = row.try_get("period").map_err(fail_closed)?;
            return Err(LedgerError::PeriodAlreadyOpen {
                employee_id: employee_id.clone(),
                period: PeriodId(open_period),
            });
        }

        let inserted = sqlx::query(
            "INSERT INTO budget_period
                 (employee_id, period, limit_cents, reserved_cents, committed_cents, status, opened_at)
             VALUES (?, ?, ?, 0, 0, 'open', ?)",
        )
        .bind(&employee_id.0)
        .bind(&period.0)
        .bind(limit_cents)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            // Lost the race against a concurrent open on the partial
            // unique index.
            Err(error) if is_unique_violation(&error) => Err(LedgerError::PeriodAlreadyOpen {
                employee_id: employee_id.clone(),
                period,
            }),
            Err(error) => Err(fail_closed(error)),
        }
    }

    async fn close_period(&self, employee_id: &EmployeeId) -> Result<(), LedgerError> {
        let updated = sqlx::query(
            "UPDATE budget_period SET status = 'closed', closed_at = ?
             WHERE employee_id = ? AND status = 'open'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&employee_id.0)
        .execute(&self.pool)
        .await
        .map_err(fail_closed)?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::NoOpenPeriod(employee_id.clone()));
        }
        Ok(())
    }

    async fn remaining(&self, employee_id: &EmployeeId) -> Result<i64, LedgerError> {
        let row = sqlx::query(
            "SELECT limit_cents - reserved_cents - committed_cents AS available_cents
             FROM budget_period WHERE employee_id = ? AND status = 'open'",
        )
        .bind(&employee_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(fail_closed)?;

        match row {
            Some(row) => row.try_get("available_cents").map_err(fail_closed),
            None => Err(LedgerError::NoOpenPeriod(employee_id.clone())),
        }
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

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.reserve_once(employee_id, amount_cents, transaction_id.as_deref()).await {
                Ok(Step::Done(reservation)) => return Ok(reservation),
                Ok(Step::Fail(error)) => return Err(error),
                Err(error) if is_transient(&error) && attempts < MAX_ATTEMPTS => {
                    tracing::warn!(
                        operation = "reserve",
                        attempt = attempts,
                        error = %error,
                        "transient ledger failure, retrying"
                    );
                }
                Err(error) => return Err(fail_closed(error)),
            }
        }
    }

    async fn commit(&self, reservation_id: &ReservationId) -> Result<(), LedgerError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.settle_once(reservation_id, Settlement::Commit).await {
                Ok(Step::Done(())) => return Ok(()),
                Ok(Step::Fail(error)) => return Err(error),
                Err(error) if is_transient(&error) && attempts < MAX_ATTEMPTS => {
                    tracing::warn!(
                        operation = "commit",
                        attempt = attempts,
                        error = %error,
                        "transient ledger failure, retrying"
                    );
                }
                Err(error) => return Err(fail_closed(error)),
            }
        }
    }

    async fn release(&self, reservation_id: &ReservationId) -> Result<(), LedgerError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.settle_once(reservation_id, Settlement::Release).await {
                Ok(Step::Done(())) => return Ok(()),
                Ok(Step::Fail(error)) => return Err(error),
                Err(error) if is_transient(&error) && attempts < MAX_ATTEMPTS => {
                    tracing::warn!(
                        operation = "release",
                        attempt = attempts,
                        error = %error,
                        "transient ledger failure, retrying"
                    );
                }
                Err(error) => return Err(fail_closed(error)),
            }
        }
    }

    async fn release_expired(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError> {
        self.release_expired_once(older_than).await.map_err(fail_closed)
    }
}

#[derive(Clone, Copy)]
enum Settlement {
    Commit,
    Release,
}

impl SqlBudgetLedger {
    async fn reserve_once(
        &self,
        employee_id: &EmployeeId,
        amount_cents: i64,
        transaction_id: Option<&str>,
    ) -> Result<Step<Reservation>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query(
            "SELECT id, period, limit_cents, reserved_cents, committed_cents
             FROM budget_period WHERE employee_id = ? AND status = 'open'",
        )
        .bind(&employee_id.0)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(Step::Fail(LedgerError::NoOpenPeriod(employee_id.clone())));
        };

        let period_row_id: i64 = row.try_get("id")?;
        let period: String = row.try_get("period")?;
        let limit_cents: i64 = row.try_get("limit_cents")?;
        let reserved_cents: i64 = row.try_get("reserved_cents")?;
        let committed_cents: i64 = row.try_get("committed_cents")?;

        // The guard and the decrement are one statement; the SELECT
        // above only feeds the error message.
        let updated = sqlx::query(
            "UPDATE budget_period
             SET reserved_cents = reserved_cents + ?
             WHERE id = ? AND status = 'open'
               AND reserved_cents + committed_cents + ? <= limit_cents",
        )
        .bind(amount_cents)
        .bind(period_row_id)
        .bind(amount_cents)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(Step::Fail(LedgerError::InsufficientBudget {
                requested_cents: amount_cents,
                available_cents: limit_cents - reserved_cents - committed_cents,
            }));
        }

        let reservation = Reservation {
            id: ReservationId(Uuid::new_v4().to_string()),
            employee_id: employee_id.clone(),
            period: PeriodId(period),
            amount_cents,
            transaction_id: transaction_id.map(str::to_string),
            requested_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO budget_reservation
                 (id, period_row_id, employee_id, amount_cents, transaction_id, state, requested_at)
             VALUES (?, ?, ?, ?, ?, 'reserved', ?)",
        )
        .bind(&reservation.id.0)
        .bind(period_row_id)
        .bind(&reservation.employee_id.0)
        .bind(reservation.amount_cents)
        .bind(&reservation.transaction_id)
        .bind(reservation.requested_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Step::Done(reservation))
    }

    async fn settle_once(
        &self,
        reservation_id: &ReservationId,
        settlement: Settlement,
    ) -> Result<Step<()>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query(
            "SELECT period_row_id, amount_cents FROM budget_reservation
             WHERE id = ? AND state = 'reserved'",
        )
        .bind(&reservation_id.0)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(Step::Fail(LedgerError::UnknownReservation(reservation_id.clone())));
        };

        let period_row_id: i64 = row.try_get("period_row_id")?;
        let amount_cents: i64 = row.try_get("amount_cents")?;

        let updated = match settlement {
            Settlement::Commit => {
                sqlx::query(
                    "UPDATE budget_period
                     SET reserved_cents = reserved_cents - ?, committed_cents = committed_cents + ?
                     WHERE id = ? AND status = 'open' AND reserved_cents >= ?",
                )
                .bind(amount_cents)
                .bind(amount_cents)
                .bind(period_row_id)
                .bind(amount_cents)
                .execute(&mut *tx)
                .await?
            }
            Settlement::Release => {
                sqlx::query(
                    "UPDATE budget_period
                     SET reserved_cents = reserved_cents - ?
                     WHERE id = ? AND status = 'open' AND reserved_cents >= ?",
                )
                .bind(amount_cents)
                .bind(period_row_id)
                .bind(amount_cents)
                .execute(&mut *tx)
                .await?
            }
        };

        // A closed period means the reservation went stale.
        if updated.rows_affected() == 0 {
            return Ok(Step::Fail(LedgerError::UnknownReservation(reservation_id.clone())));
        }

        let new_state = match settlement {
            Settlement::Commit => "committed",
            Settlement::Release => "released",
        };
        let flipped = sqlx::query(
            "UPDATE budget_reservation SET state = ? WHERE id = ? AND state = 'reserved'",
        )
        .bind(new_state)
        .bind(&reservation_id.0)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            return Ok(Step::Fail(LedgerError::UnknownReservation(reservation_id.clone())));
        }

        tx.commit().await?;
        Ok(Step::Done(()))
    }

    async fn release_expired_once(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let expired = sqlx::query(
            "SELECT id, period_row_id, amount_cents FROM budget_reservation
             WHERE state = 'reserved' AND requested_at < ?",
        )
        .bind(older_than.to_rfc3339())
        .fetch_all(&mut *tx)
        .await?;

        let mut reaped = 0;
        for row in expired {
            let id: String = row.try_get("id")?;
            let period_row_id: i64 = row.try_get("period_row_id")?;
            let amount_cents: i64 = row.try_get("amount_cents")?;

            sqlx::query(
                "UPDATE budget_period SET reserved_cents = reserved_cents - ?
                 WHERE id = ? AND status = 'open' AND reserved_cents >= ?",
            )
            .bind(amount_cents)
            .bind(period_row_id)
            .bind(amount_cents)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE budget_reservation SET state = 'released' WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            reaped += 1;
        }

        tx.commit().await?;
        if reaped > 0 {
            tracing::info!(reaped, "released abandoned budget reservations");
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use tillgate_core::domain::actor::EmployeeId;
    use tillgate_core::domain::budget::PeriodId;
    use tillgate_core::ledger::{BudgetLedger, LedgerError};

    use super::SqlBudgetLedger;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn clerk() -> EmployeeId {
        EmployeeId("e-17".to_string())
    }

    async fn ledger_with_budget(limit_cents: i64) -> SqlBudgetLedger {
        let ledger = SqlBudgetLedger::new(setup().await);
        ledger
            .open_period(&clerk(), PeriodId("2026-08-06:am".to_string()), limit_cents)
            .await
            .expect("open period");
        ledger
    }

    #[tokio::test]
    async fn reserve_then_commit_moves_funds_exactly_once() {
        let ledger = ledger_with_budget(50_000).await;

        let reservation = ledger.reserve(&clerk(), 12_500, None).await.expect("reserve");
        assert_eq!(ledger.remaining(&clerk()).await.expect("probe"), 37_500);

        ledger.commit(&reservation.id).await.expect("commit");
        assert_eq!(ledger.remaining(&clerk()).await.expect("probe"), 37_500);

        let error = ledger.commit(&reservation.id).await.expect_err("double commit");
        assert!(matches!(error, LedgerError::UnknownReservation(_)));
    }

    #[tokio::test]
    async fn reserve_guard_rejects_overspend_without_side_effects() {
        let ledger = ledger_with_budget(10_000).await;

        let error = ledger.reserve(&clerk(), 10_001, None).await.expect_err("over budget");
        assert_eq!(
            error,
            LedgerError::InsufficientBudget { requested_cents: 10_001, available_cents: 10_000 }
        );
        assert_eq!(ledger.remaining(&clerk()).await.expect("probe"), 10_000);
    }

    #[tokio::test]
    async fn release_returns_funds() {
        let ledger = ledger_with_budget(10_000).await;

        let reservation = ledger.reserve(&clerk(), 4_000, None).await.expect("reserve");
        ledger.release(&reservation.id).await.expect("release");
        assert_eq!(ledger.remaining(&clerk()).await.expect("probe"), 10_000);

        let error = ledger.release(&reservation.id).await.expect_err("double release");
        assert!(matches!(error, LedgerError::UnknownReservation(_)));
    }

    #[tokio::test]
    async fn closed_periods_reject_further_mutation() {
        let ledger = ledger_with_budget(10_000).await;

        let reservation = ledger.reserve(&clerk(), 4_000, None).await.expect("reserve");
        ledger.close_period(&clerk()).await.expect("close");

        let error = ledger.commit(&reservation.id).await.expect_err("stale commit");
        assert!(matches!(error, LedgerError::UnknownReservation(_)));
        assert!(matches!(
            ledger.remaining(&clerk()).await.expect_err("closed"),
            LedgerError::NoOpenPeriod(_)
        ));
        assert!(matches!(
            ledger.close_period(&clerk()).await.expect_err("double close"),
            LedgerError::NoOpenPeriod(_)
        ));
    }

    #[tokio::test]
    async fn one_open_period_per_employee() {
        let ledger = ledger_with_budget(10_000).await;

        let error = ledger
            .open_period(&clerk(), PeriodId("2026-08-06:pm".to_string()), 5_000)
            .await
            .expect_err("second open period");
        assert!(matches!(error, LedgerError::PeriodAlreadyOpen { .. }));
    }

    #[tokio::test]
    async fn release_expired_reaps_only_abandoned_reservations() {
        let ledger = ledger_with_budget(10_000).await;

        ledger.reserve(&clerk(), 3_000, Some("txn-1".to_string())).await.expect("reserve");
        let committed =
            ledger.reserve(&clerk(), 2_000, Some("txn-2".to_string())).await.expect("reserve");
        ledger.commit(&committed.id).await.expect("commit");

        let reaped = ledger
            .release_expired(Utc::now() + Duration::seconds(1))
            .await
            .expect("release expired");
        assert_eq!(reaped, 1);
        assert_eq!(ledger.remaining(&clerk()).await.expect("probe"), 8_000);
    }

    #[tokio::test]
    async fn concurrent_reserves_never_exceed_the_limit() {
        let ledger = Arc::new(ledger_with_budget(100_000).await);

        let mut handles = Vec::new();
        for index in 0..32 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.reserve(&clerk(), 10_000, Some(format!("txn-{index}"))).await
            }));
        }

        let mut granted = 0_i64;
        for handle in handles {
            if let Ok(reservation) = handle.await.expect("task") {
                granted += reservation.amount_cents;
            }
        }

        assert_eq!(granted, 100_000);
        assert_eq!(ledger.remaining(&clerk()).await.expect("probe"), 0);
    }
}
