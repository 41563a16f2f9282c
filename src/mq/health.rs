//! Worker health tracking.
//!
//! A worker is `Degraded` when its rolling error rate exceeds 50% over at
//! least 10 processed messages, `Unhealthy` when its heartbeat is older
//! than three intervals, `Stopped` after shutdown.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

const OUTCOME_WINDOW: usize = 50;
const MIN_SAMPLE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Stopped,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "HEALTHY",
            HealthState::Degraded => "DEGRADED",
            HealthState::Unhealthy => "UNHEALTHY",
            HealthState::Stopped => "STOPPED",
        }
    }
}

struct Inner {
    last_heartbeat: Instant,
    outcomes: VecDeque<bool>,
    stopped: bool,
}

pub struct HealthMonitor {
    heartbeat_interval: Duration,
    inner: Mutex<Inner>,
}

impl HealthMonitor {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            heartbeat_interval,
            inner: Mutex::new(Inner {
                last_heartbeat: Instant::now(),
                outcomes: VecDeque::with_capacity(OUTCOME_WINDOW),
                stopped: false,
            }),
        }
    }

    pub fn heartbeat(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_heartbeat = Instant::now();
    }

    pub fn record(&self, ok: bool) {
        let mut inner = self.inner.lock().unwrap();
        if inner.outcomes.len() == OUTCOME_WINDOW {
            inner.outcomes.pop_front();
        }
        inner.outcomes.push_back(ok);
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
    }

    pub fn state(&self) -> HealthState {
        let inner = self.inner.lock().unwrap();
        if inner.stopped {
            return HealthState::Stopped;
        }
        if inner.last_heartbeat.elapsed() > self.heartbeat_interval * 3 {
            return HealthState::Unhealthy;
        }
        let n = inner.outcomes.len();
        if n >= MIN_SAMPLE {
            let failures = inner.outcomes.iter().filter(|ok| !**ok).count();
            if failures * 2 > n {
                return HealthState::Degraded;
            }
        }
        HealthState::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_by_default() {
        let m = HealthMonitor::new(Duration::from_secs(5));
        assert_eq!(m.state(), HealthState::Healthy);
    }

    #[test]
    fn test_degraded_needs_minimum_sample() {
        let m = HealthMonitor::new(Duration::from_secs(5));
        // 5 failures out of 5: above 50% but below the 10-message floor.
        for _ in 0..5 {
            m.record(false);
        }
        assert_eq!(m.state(), HealthState::Healthy);

        for _ in 0..5 {
            m.record(false);
        }
        assert_eq!(m.state(), HealthState::Degraded);
    }

    #[test]
    fn test_recovers_as_window_rolls() {
        let m = HealthMonitor::new(Duration::from_secs(5));
        for _ in 0..10 {
            m.record(false);
        }
        assert_eq!(m.state(), HealthState::Degraded);
        for _ in 0..OUTCOME_WINDOW {
            m.record(true);
        }
        assert_eq!(m.state(), HealthState::Healthy);
    }

    #[test]
    fn test_unhealthy_on_missed_heartbeats() {
        let m = HealthMonitor::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(m.state(), HealthState::Unhealthy);
        m.heartbeat();
        assert_eq!(m.state(), HealthState::Healthy);
    }

    #[test]
    fn test_stopped_wins() {
        let m = HealthMonitor::new(Duration::from_secs(5));
        m.stop();
        assert_eq!(m.state(), HealthState::Stopped);
    }
}
