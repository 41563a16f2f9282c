//! Retry scheduler: routes due retry members back to their main queue and
//! enforces queue TTLs.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::broker::RedisBroker;

pub struct RetryScheduler {
    broker: RedisBroker,
    poll_interval: Duration,
    batch: usize,
}

impl RetryScheduler {
    pub fn new(broker: RedisBroker) -> Self {
        Self {
            broker,
            poll_interval: Duration::from_secs(1),
            batch: 128,
        }
    }

    /// Run until cancelled. Errors are logged and the loop keeps going; the
    /// broker reconnects underneath.
    pub async fn run(self, cancel: CancellationToken) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Retry scheduler started");
        let mut trim_tick = 0u32;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            for spec in self.broker.declared() {
                match self.broker.promote_due(&spec, self.batch).await {
                    Ok(0) => {}
                    Ok(n) => debug!(queue = %spec.name, promoted = n, "Promoted due retries"),
                    Err(e) => error!(queue = %spec.name, error = %e, "Retry promotion failed"),
                }
            }

            // TTL trimming is cheap but not urgent; once a minute is plenty.
            trim_tick += 1;
            if trim_tick >= 60 {
                trim_tick = 0;
                for spec in self.broker.declared() {
                    if let Err(e) = self.broker.trim_expired(&spec).await {
                        error!(queue = %spec.name, error = %e, "Queue trim failed");
                    }
                }
            }
        }
        info!("Retry scheduler stopped");
    }
}
