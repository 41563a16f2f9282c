//! Position worker: consumes `positions.updates` and applies create /
//! update / close to the position aggregate.
//!
//! A semaphore caps parallel handlers; a per-key lock table serializes
//! updates to the same `(user_id, symbol)` so a position's history is a
//! clean prefix of its published updates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::service::PositionService;
use crate::config::WorkerConfig;
use crate::mq::{
    classify_failure, Delivery, ErrorClass, HealthMonitor, KeyedLocks, PositionUpdateMsg,
    QueueSpec, RedisBroker,
};

const CLAIM_MIN_IDLE: Duration = Duration::from_secs(60);
const CONSUME_BLOCK: Duration = Duration::from_secs(1);

pub struct PositionWorker {
    broker: RedisBroker,
    spec: QueueSpec,
    service: Arc<PositionService>,
    health: Arc<HealthMonitor>,
    config: WorkerConfig,
    locks: KeyedLocks,
}

impl PositionWorker {
    pub fn new(
        broker: RedisBroker,
        spec: QueueSpec,
        service: Arc<PositionService>,
        health: Arc<HealthMonitor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            spec,
            service,
            health,
            config,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let consumer = format!("position-worker-{}", Uuid::new_v4().simple());
        info!(
            consumer = %consumer,
            max_concurrent_updates = self.config.max_concurrent_updates,
            "Position worker started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_updates));
        let mut inflight: JoinSet<()> = JoinSet::new();

        match self
            .broker
            .claim_stale(&self.spec, &consumer, CLAIM_MIN_IDLE, self.config.prefetch)
            .await
        {
            Ok(deliveries) => {
                for delivery in deliveries {
                    self.dispatch(&mut inflight, semaphore.clone(), delivery).await;
                }
            }
            Err(e) => warn!(error = %e, "Stale-claim pass failed"),
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.health.heartbeat();
            while let Some(joined) = inflight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Position handler panicked");
                }
            }

            let deliveries = match self
                .broker
                .consume(&self.spec, &consumer, self.config.prefetch, CONSUME_BLOCK)
                .await
            {
                Ok(d) => d,
                Err(e) => {
                    error!(error = %e, "Consume failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };

            for delivery in deliveries {
                self.dispatch(&mut inflight, semaphore.clone(), delivery).await;
            }
        }

        let deadline = self.config.shutdown_deadline;
        info!(inflight = inflight.len(), "Draining position worker");
        let drained = tokio::time::timeout(deadline, async {
            while inflight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown deadline hit with handlers in flight, aborting them");
            inflight.abort_all();
        }
        self.health.stop();
        info!("Position worker stopped");
    }

    async fn dispatch(
        &self,
        inflight: &mut JoinSet<()>,
        semaphore: Arc<Semaphore>,
        delivery: Delivery,
    ) {
        let Ok(permit) = semaphore.acquire_owned().await else {
            return;
        };
        let broker = self.broker.clone();
        let spec = self.spec.clone();
        let service = self.service.clone();
        let health = self.health.clone();
        let locks = self.locks.clone();
        let deadline = self.config.process_deadline;
        inflight.spawn(async move {
            handle_delivery(broker, spec, service, health, locks, deadline, delivery).await;
            drop(permit);
        });
    }
}

async fn handle_delivery(
    broker: RedisBroker,
    spec: QueueSpec,
    service: Arc<PositionService>,
    health: Arc<HealthMonitor>,
    locks: KeyedLocks,
    deadline: Duration,
    delivery: Delivery,
) {
    let attempt = delivery.envelope.headers.retry_attempt;

    let msg: PositionUpdateMsg = match delivery.envelope.decode() {
        Ok(m) => m,
        Err(e) => {
            let reason = format!("malformed payload: {e}");
            if let Err(e) = broker.dead_letter(&spec, &delivery.envelope, &reason).await {
                error!(error = %e, "Dead-letter publish failed");
            }
            ack(&broker, &spec, &delivery).await;
            health.record(false);
            return;
        }
    };

    // Serialize per (user, symbol); unrelated keys run in parallel.
    let key = format!("{}:{}", msg.user_id, msg.symbol);
    let _guard = locks.lock(&key).await;

    let result = tokio::time::timeout(deadline, service.apply(&msg)).await;

    match result {
        Ok(Ok(_events)) => {
            ack(&broker, &spec, &delivery).await;
            health.record(true);
        }
        Ok(Err(err)) => {
            dispose_failure(&broker, &spec, &delivery, &msg, attempt, err.to_string()).await;
            health.record(false);
        }
        Err(_) => {
            dispose_failure(
                &broker,
                &spec,
                &delivery,
                &msg,
                attempt,
                "processing deadline exceeded".to_string(),
            )
            .await;
            health.record(false);
        }
    }
}

async fn dispose_failure(
    broker: &RedisBroker,
    spec: &QueueSpec,
    delivery: &Delivery,
    msg: &PositionUpdateMsg,
    attempt: u32,
    reason: String,
) {
    match classify_failure(&reason) {
        ErrorClass::Retryable => {
            if let Some(delay) = spec.delay_for_attempt(attempt + 1) {
                warn!(
                    order_id = %msg.order_id,
                    symbol = %msg.symbol,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    reason = %reason,
                    "Scheduling position-update retry"
                );
                if let Err(e) = broker.schedule_retry(spec, &delivery.envelope, delay).await {
                    error!(error = %e, "Retry scheduling failed; delivery will be reclaimed");
                    return;
                }
            } else {
                error!(order_id = %msg.order_id, reason = %reason, "Retries exhausted, dead-lettering");
                if let Err(e) = broker.dead_letter(spec, &delivery.envelope, &reason).await {
                    error!(error = %e, "Dead-letter publish failed");
                }
            }
        }
        ErrorClass::NonRetryable => {
            error!(order_id = %msg.order_id, reason = %reason, "Fatal position update, dead-lettering");
            if let Err(e) = broker.dead_letter(spec, &delivery.envelope, &reason).await {
                error!(error = %e, "Dead-letter publish failed");
            }
        }
    }
    ack(broker, spec, delivery).await;
}

async fn ack(broker: &RedisBroker, spec: &QueueSpec, delivery: &Delivery) {
    if let Err(e) = broker.ack(spec, &delivery.stream_id).await {
        error!(stream_id = %delivery.stream_id, error = %e, "Ack failed");
    }
}
