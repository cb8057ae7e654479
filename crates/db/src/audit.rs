use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use tillgate_core::audit::{AuditEvent, AuditSink};

use crate::DbPool;

const MAX_ATTEMPTS: u32 = 3;

enum Message {
    Event(Box<AuditEvent>),
    Flush(oneshot::Sender<()>),
}

/// Append-only audit writer that never blocks the decision path:
/// `emit` hands the event to a background task over an unbounded
/// channel and returns immediately. Failed writes are retried a few
/// times and then logged locally and dropped; an audit failure never
/// reverses a committed budget change.
#[derive(Clone)]
pub struct SqlAuditSink {
    sender: mpsc::UnboundedSender<Message>,
}

impl SqlAuditSink {
    /// Spawns the background writer on the current tokio runtime.
    pub fn spawn(pool: DbPool) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    Message::Event(event) => write_with_retry(&pool, &event).await,
                    Message::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self { sender }
    }

    /// Waits until every previously emitted event has been attempted.
    pub async fn flush(&self) {
        let (ack_sender, ack_receiver) = oneshot::channel();
        if self.sender.send(Message::Flush(ack_sender)).is_ok() {
            let _ = ack_receiver.await;
        }
    }
}

impl AuditSink for SqlAuditSink {
    fn emit(&self, event: AuditEvent) {
        if self.sender.send(Message::Event(Box::new(event))).is_err() {
            tracing::warn!("audit writer task is gone, dropping event");
        }
    }
}

async fn write_with_retry(pool: &DbPool, event: &AuditEvent) {
    for attempt in 1..=MAX_ATTEMPTS {
        match insert_event(pool, event).await {
            Ok(()) => return,
            Err(error) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    event_id = %event.event_id,
                    attempt,
                    error = %error,
                    "audit write failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
            Err(error) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    error = %error,
                    "audit write dropped after bounded retries"
                );
            }
        }
    }
}

async fn insert_event(pool: &DbPool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    let metadata_json =
        serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".to_string());

    sqlx::query(
        "INSERT INTO audit_event
             (event_id, decision_id, case_id, correlation_id, event_type, category, actor,
              outcome, metadata_json, occurred_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.decision_id.as_ref().map(|id| id.0.clone()))
    .bind(event.case_id.map(|id| id.0))
    .bind(&event.correlation_id)
    .bind(&event.event_type)
    .bind(event.category.as_str())
    .bind(&event.actor)
    .bind(event.outcome.as_str())
    .bind(&metadata_json)
    .bind(event.occurred_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}
