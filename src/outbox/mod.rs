//! Transactional outbox.
//!
//! State changes stage their messages in the `outbox` table inside the same
//! transaction; the dispatcher drains staged rows to the broker. This gives
//! at-least-once publication without a two-phase commit; consumers are
//! idempotent, so duplicates are harmless.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::mq::{Envelope, QueuePublisher};

/// A message staged for publication, co-committed with a business row.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub aggregate_type: &'static str,
    pub aggregate_id: Uuid,
    pub queue: String,
    pub message_type: String,
    pub priority: u8,
    pub payload: serde_json::Value,
}

/// Stage a message inside an open transaction.
pub async fn insert_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    msg: &NewOutboxMessage,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO outbox (aggregate_type, aggregate_id, queue, message_type, priority, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(msg.aggregate_type)
    .bind(msg.aggregate_id)
    .bind(&msg.queue)
    .bind(&msg.message_type)
    .bind(msg.priority as i16)
    .bind(&msg.payload)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Polls unpublished outbox rows and hands them to the broker.
pub struct OutboxDispatcher {
    pool: PgPool,
    publisher: Arc<dyn QueuePublisher>,
    poll_interval: Duration,
    batch: i64,
}

impl OutboxDispatcher {
    pub fn new(pool: PgPool, publisher: Arc<dyn QueuePublisher>) -> Self {
        Self {
            pool,
            publisher,
            poll_interval: Duration::from_millis(200),
            batch: 100,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Outbox dispatcher started");
        loop {
            match self.drain_once().await {
                Ok(0) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Ok(n) => debug!(published = n, "Outbox batch dispatched"),
                Err(e) => {
                    error!(error = %e, "Outbox drain failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
            if cancel.is_cancelled() {
                break;
            }
        }
        info!("Outbox dispatcher stopped");
    }

    /// Publish one batch. Rows are locked with SKIP LOCKED so concurrent
    /// dispatchers never double-claim; a row is only marked published after
    /// the broker accepted it.
    pub async fn drain_once(&self) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, queue, message_type, priority, payload
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.batch)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let mut published = 0usize;
        for row in &rows {
            let id: i64 = row.get("id");
            let aggregate_id: Uuid = row.get("aggregate_id");
            let queue: String = row.get("queue");
            let message_type: String = row.get("message_type");
            let priority: i16 = row.get("priority");
            let payload: serde_json::Value = row.get("payload");

            let envelope =
                Envelope::new(&queue, &message_type, priority as u8, aggregate_id, payload);

            match self.publisher.publish(&queue, &envelope).await {
                Ok(()) => {
                    sqlx::query(
                        "UPDATE outbox SET published_at = NOW(), attempts = attempts + 1 WHERE id = $1",
                    )
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    published += 1;
                }
                Err(e) => {
                    warn!(outbox_id = id, queue = %queue, error = %e, "Publish failed, will replay");
                    sqlx::query("UPDATE outbox SET attempts = attempts + 1 WHERE id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    // Broker is likely down; stop hammering this batch.
                    break;
                }
            }
        }

        tx.commit().await?;
        Ok(published)
    }
}
