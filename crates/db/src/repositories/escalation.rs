use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use tillgate_core::domain::decision::DecisionRecord;
use tillgate_core::domain::escalation::{CaseId, CaseResolution, CaseState, EscalationCase};
use tillgate_core::escalation::{CaseStore, CaseStoreError, CompletionOutcome};

use super::{parse_utc, RepositoryError};
use crate::DbPool;

/// Durable escalation case store. Ids are monotonic via the rowid
/// sequence, and `complete` is a compare-and-swap on `state =
/// 'pending'` so concurrent resolvers serialize at the database.
pub struct SqlCaseStore {
    pool: DbPool,
}

impl SqlCaseStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn store_error(error: RepositoryError) -> CaseStoreError {
    CaseStoreError::Persistence(error.to_string())
}

fn db_error(error: sqlx::Error) -> CaseStoreError {
    CaseStoreError::Persistence(error.to_string())
}

fn row_to_case(row: &SqliteRow) -> Result<EscalationCase, RepositoryError> {
    let id: i64 = row.try_get("id")?;
    let decision_json: String = row.try_get("decision_json")?;
    let decision: DecisionRecord = serde_json::from_str(&decision_json)
        .map_err(|error| RepositoryError::Decode(format!("decision_json: {error}")))?;

    let state_raw: String = row.try_get("state")?;
    let state: CaseState = state_raw
        .parse()
        .map_err(|error| RepositoryError::Decode(format!("state: {error}")))?;

    let opened_at_raw: String = row.try_get("opened_at")?;
    let expires_at_raw: String = row.try_get("expires_at")?;
    let resolution_json: Option<String> = row.try_get("resolution_json")?;
    let resolution: Option<CaseResolution> = match resolution_json {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|error| RepositoryError::Decode(format!("resolution_json: {error}")))?,
        ),
        None => None,
    };

    Ok(EscalationCase {
        id: CaseId(id),
        decision,
        opened_at: parse_utc("opened_at", &opened_at_raw)?,
        expires_at: parse_utc("expires_at", &expires_at_raw)?,
        state,
        resolution,
    })
}

const CASE_COLUMNS: &str =
    "id, decision_id, decision_json, state, opened_at, expires_at, resolution_json, resolved_at";

#[async_trait]
impl CaseStore for SqlCaseStore {
    async fn insert(
        &self,
        decision: DecisionRecord,
        opened_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<EscalationCase, CaseStoreError> {
        let decision_json = serde_json::to_string(&decision)
            .map_err(|error| CaseStoreError::Persistence(format!("encode decision: {error}")))?;

        let inserted = sqlx::query(
            "INSERT INTO escalation_case (decision_id, decision_json, state, opened_at, expires_at)
             VALUES (?, ?, 'pending', ?, ?)",
        )
        .bind(&decision.decision_id.0)
        .bind(&decision_json)
        .bind(opened_at.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(EscalationCase {
            id: CaseId(inserted.last_insert_rowid()),
            decision,
            opened_at,
            expires_at,
            state: CaseState::Pending,
            resolution: None,
        })
    }

    async fn find(&self, case_id: CaseId) -> Result<Option<EscalationCase>, CaseStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CASE_COLUMNS} FROM escalation_case WHERE id = ?"
        ))
        .bind(case_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_case(row).map_err(store_error)?)),
            None => Ok(None),
        }
    }

    async fn complete(
        &self,
        case_id: CaseId,
        state: CaseState,
        resolution: CaseResolution,
    ) -> Result<CompletionOutcome, CaseStoreError> {
        let resolution_json = serde_json::to_string(&resolution)
            .map_err(|error| CaseStoreError::Persistence(format!("encode resolution: {error}")))?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let updated = sqlx::query(
            "UPDATE escalation_case
             SET state = ?, resolution_json = ?, resolved_at = ?
             WHERE id = ? AND state = 'pending'",
        )
        .bind(state.as_str())
        .bind(&resolution_json)
        .bind(resolution.resolved_at.to_rfc3339())
        .bind(case_id.0)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let row = sqlx::query(&format!(
            "SELECT {CASE_COLUMNS} FROM escalation_case WHERE id = ?"
        ))
        .bind(case_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        let Some(row) = row else {
            return Err(CaseStoreError::UnknownCase(case_id));
        };
        let case = row_to_case(&row).map_err(store_error)?;

        if updated.rows_affected() == 1 {
            Ok(CompletionOutcome::Applied(case))
        } else {
            Ok(CompletionOutcome::AlreadyTerminal(case))
        }
    }

    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EscalationCase>, CaseStoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let overdue = sqlx::query(
            "SELECT id FROM escalation_case WHERE state = 'pending' AND expires_at <= ?",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;

        let mut expired = Vec::new();
        for row in overdue {
            let id: i64 = row.try_get("id").map_err(db_error)?;
            let updated = sqlx::query(
                "UPDATE escalation_case SET state = 'expired' WHERE id = ? AND state = 'pending'",
            )
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if updated.rows_affected() == 1 {
                let row = sqlx::query(&format!(
                    "SELECT {CASE_COLUMNS} FROM escalation_case WHERE id = ?"
                ))
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
                expired.push(row_to_case(&row).map_err(store_error)?);
            }
        }

        tx.commit().await.map_err(db_error)?;
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use tillgate_core::domain::actor::{EmployeeId, Role};
    use tillgate_core::domain::decision::{DecisionId, DecisionRecord, EscalationReason};
    use tillgate_core::domain::escalation::{CaseAction, CaseResolution, CaseState};
    use tillgate_core::domain::product::{ProductEconomics, ProductId};
    use tillgate_core::escalation::{CaseStore, CaseStoreError, CompletionOutcome};
    use tillgate_core::policy::MarginClass;
    use tillgate_core::pricing::{breakdown, RoundingMode};

    use super::SqlCaseStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlCaseStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlCaseStore::new(pool)
    }

    fn sample_decision(id: &str) -> DecisionRecord {
        let economics = ProductEconomics::new(164_999, 112_200).expect("economics");
        let pct = Decimal::from(15);
        DecisionRecord {
            decision_id: DecisionId(id.to_string()),
            product_id: ProductId("sku-flagship".to_string()),
            employee_id: EmployeeId("e-staff".to_string()),
            role: Role::Staff,
            transaction_id: Some("txn-9".to_string()),
            proposed_discount_pct: pct,
            economics,
            breakdown: breakdown(
                &economics,
                pct,
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
            budget_remaining_before_cents: 100_000,
            budget_remaining_after_cents: 75_250,
            decided_at: Utc::now(),
        }
    }

    fn manager_resolution(action: CaseAction) -> CaseResolution {
        CaseResolution {
            approver_id: EmployeeId("e-manager".to_string()),
            approver_role: Role::Manager,
            action,
            final_discount_pct: Decimal::from(15),
            final_breakdown: None,
            resolved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trip_with_monotonic_ids() {
        let store = setup().await;
        let now = Utc::now();

        let first = store
            .insert(sample_decision("d-1"), now, now + Duration::hours(4))
            .await
            .expect("insert first");
        let second = store
            .insert(sample_decision("d-2"), now, now + Duration::hours(4))
            .await
            .expect("insert second");
        assert!(second.id > first.id);

        let found = store.find(first.id).await.expect("find").expect("case exists");
        assert_eq!(found.state, CaseState::Pending);
        assert_eq!(found.decision, first.decision);
        assert!(found.resolution.is_none());
    }

    #[tokio::test]
    async fn complete_applies_only_the_first_resolution() {
        let store = setup().await;
        let now = Utc::now();
        let case = store
            .insert(sample_decision("d-1"), now, now + Duration::hours(4))
            .await
            .expect("insert");

        let first = store
            .complete(case.id, CaseState::Approved, manager_resolution(CaseAction::Approve))
            .await
            .expect("first completion");
        assert!(matches!(first, CompletionOutcome::Applied(ref applied) if applied.state == CaseState::Approved));

        let second = store
            .complete(case.id, CaseState::Denied, manager_resolution(CaseAction::Deny))
            .await
            .expect("second completion");
        match second {
            CompletionOutcome::AlreadyTerminal(resolved) => {
                assert_eq!(resolved.state, CaseState::Approved);
                assert_eq!(
                    resolved.resolution.expect("resolution").action,
                    CaseAction::Approve
                );
            }
            CompletionOutcome::Applied(_) => panic!("second completion must not apply"),
        }
    }

    #[tokio::test]
    async fn complete_rejects_unknown_case() {
        let store = setup().await;
        let error = store
            .complete(
                tillgate_core::domain::escalation::CaseId(404),
                CaseState::Denied,
                manager_resolution(CaseAction::Deny),
            )
            .await
            .expect_err("unknown case");
        assert!(matches!(error, CaseStoreError::UnknownCase(_)));
    }

    #[tokio::test]
    async fn expire_overdue_transitions_only_overdue_pending_cases() {
        let store = setup().await;
        let now = Utc::now();

        let overdue = store
            .insert(sample_decision("d-1"), now - Duration::hours(5), now - Duration::hours(1))
            .await
            .expect("insert overdue");
        let fresh = store
            .insert(sample_decision("d-2"), now, now + Duration::hours(4))
            .await
            .expect("insert fresh");

        let expired = store.expire_overdue(now).await.expect("sweep");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, overdue.id);
        assert_eq!(expired[0].state, CaseState::Expired);

        let untouched = store.find(fresh.id).await.expect("find").expect("case");
        assert_eq!(untouched.state, CaseState::Pending);
    }
}
