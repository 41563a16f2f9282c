//! Order worker: consumes `orders.processing`, drives the process-order
//! use case, and routes failures to the retry ladder or the DLQ.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::service::{OrderService, ProcessOutcome};
use crate::config::WorkerConfig;
use crate::mq::{
    classify_failure, Delivery, ErrorClass, HealthMonitor, OrderQueued, QueueSpec, RedisBroker,
};

/// Messages stuck pending on a dead consumer are reclaimed after this.
const CLAIM_MIN_IDLE: Duration = Duration::from_secs(60);
const CONSUME_BLOCK: Duration = Duration::from_secs(1);

pub struct OrderWorker {
    broker: RedisBroker,
    spec: QueueSpec,
    service: Arc<OrderService>,
    health: Arc<HealthMonitor>,
    config: WorkerConfig,
}

impl OrderWorker {
    pub fn new(
        broker: RedisBroker,
        spec: QueueSpec,
        service: Arc<OrderService>,
        health: Arc<HealthMonitor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            spec,
            service,
            health,
            config,
        }
    }

    /// Main consume loop. Runs until cancelled, then drains in-flight
    /// handlers within the shutdown deadline.
    pub async fn run(self, cancel: CancellationToken) {
        let consumer = format!("order-worker-{}", Uuid::new_v4().simple());
        info!(
            consumer = %consumer,
            concurrency = self.config.order_concurrency,
            prefetch = self.config.prefetch,
            "Order worker started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.order_concurrency));
        let mut inflight: JoinSet<()> = JoinSet::new();

        // Recover deliveries orphaned by a crashed predecessor.
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
                    error!(error = %e, "Order handler panicked");
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

        self.drain(inflight).await;
        self.health.stop();
        info!("Order worker stopped");
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
        let deadline = self.config.process_deadline;
        inflight.spawn(async move {
            handle_delivery(broker, spec, service, health, deadline, delivery).await;
            drop(permit);
        });
    }

    async fn drain(&self, mut inflight: JoinSet<()>) {
        let deadline = self.config.shutdown_deadline;
        info!(inflight = inflight.len(), "Draining order worker");
        let drained = tokio::time::timeout(deadline, async {
            while inflight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown deadline hit with handlers in flight, aborting them");
            inflight.abort_all();
        }
    }
}

async fn handle_delivery(
    broker: RedisBroker,
    spec: QueueSpec,
    service: Arc<OrderService>,
    health: Arc<HealthMonitor>,
    deadline: Duration,
    delivery: Delivery,
) {
    let attempt = delivery.envelope.headers.retry_attempt;

    let payload: OrderQueued = match delivery.envelope.decode() {
        Ok(p) => p,
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

    let result = tokio::time::timeout(deadline, service.process(payload.order_id, attempt > 0)).await;

    match result {
        Ok(Ok(outcome)) => {
            match &outcome {
                ProcessOutcome::Executed(order) => {
                    info!(order_id = %order.id, price = %order.execution_price.unwrap_or_default(), "Order executed");
                }
                ProcessOutcome::Failed { order_id, reason } => {
                    info!(%order_id, reason = %reason, "Order failed at execution");
                }
                ProcessOutcome::AlreadyTerminal | ProcessOutcome::Raced | ProcessOutcome::Missing => {
                    info!(order_id = %payload.order_id, ?outcome, "Dropping redundant delivery");
                }
            }
            ack(&broker, &spec, &delivery).await;
            health.record(true);
        }
        Ok(Err(err)) => {
            dispose_failure(&broker, &spec, &service, &delivery, payload.order_id, attempt, err.to_string())
                .await;
            health.record(false);
        }
        Err(_) => {
            dispose_failure(
                &broker,
                &spec,
                &service,
                &delivery,
                payload.order_id,
                attempt,
                "processing deadline exceeded".to_string(),
            )
            .await;
            health.record(false);
        }
    }
}

/// Retry-or-DLQ branch for a failed delivery. The original entry is acked
/// either way; the retry copy lives in the retry set.
async fn dispose_failure(
    broker: &RedisBroker,
    spec: &QueueSpec,
    service: &Arc<OrderService>,
    delivery: &Delivery,
    order_id: Uuid,
    attempt: u32,
    reason: String,
) {
    match classify_failure(&reason) {
        ErrorClass::Retryable => {
            if let Some(delay) = spec.delay_for_attempt(attempt + 1) {
                warn!(%order_id, attempt = attempt + 1, delay_secs = delay.as_secs(), reason = %reason, "Scheduling retry");
                if let Err(e) = broker.schedule_retry(spec, &delivery.envelope, delay).await {
                    error!(error = %e, "Retry scheduling failed; delivery will be reclaimed");
                    // Leave unacked so XAUTOCLAIM picks it back up.
                    return;
                }
            } else {
                error!(%order_id, reason = %reason, "Retries exhausted, dead-lettering");
                if let Err(e) = broker.dead_letter(spec, &delivery.envelope, &reason).await {
                    error!(error = %e, "Dead-letter publish failed");
                }
                abandon(service, order_id, &reason).await;
            }
        }
        ErrorClass::NonRetryable => {
            error!(%order_id, reason = %reason, "Fatal processing error, dead-lettering");
            if let Err(e) = broker.dead_letter(spec, &delivery.envelope, &reason).await {
                error!(error = %e, "Dead-letter publish failed");
            }
            abandon(service, order_id, &reason).await;
        }
    }
    ack(broker, spec, delivery).await;
}

async fn abandon(service: &Arc<OrderService>, order_id: Uuid, reason: &str) {
    match service.abandon(order_id, reason).await {
        Ok(true) => info!(%order_id, "Order marked FAILED after dead-letter"),
        Ok(false) => {}
        Err(e) => error!(%order_id, error = %e, "Failed to mark dead-lettered order"),
    }
}

async fn ack(broker: &RedisBroker, spec: &QueueSpec, delivery: &Delivery) {
    if let Err(e) = broker.ack(spec, &delivery.stream_id).await {
        error!(stream_id = %delivery.stream_id, error = %e, "Ack failed");
    }
}
