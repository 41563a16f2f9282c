//! Retry-ladder and dead-letter behavior that can be verified without a
//! live broker: ladder schedules, envelope header evolution, and the
//! classification that drives the retry/DLQ branch.

use std::time::Duration;

use uuid::Uuid;

use orderflow::mq::{classify_failure, Envelope, ErrorClass, QueueSpec};

#[test]
fn test_order_ladder_matches_configuration() {
    let spec = QueueSpec::orders();
    let expected = [
        Duration::from_secs(5 * 60),
        Duration::from_secs(15 * 60),
        Duration::from_secs(60 * 60),
        Duration::from_secs(6 * 60 * 60),
    ];
    for (i, want) in expected.iter().enumerate() {
        assert_eq!(spec.delay_for_attempt(i as u32 + 1), Some(*want));
    }
    // The attempt past the ladder dead-letters.
    assert_eq!(spec.delay_for_attempt(expected.len() as u32 + 1), None);
}

#[test]
fn test_message_walks_the_full_ladder_then_dead_letters() {
    let spec = QueueSpec::orders();
    let mut envelope = Envelope::new(
        &spec.name,
        "order.process",
        7,
        Uuid::new_v4(),
        serde_json::json!({"order_id": Uuid::new_v4()}),
    );

    let mut observed_ttls = Vec::new();
    loop {
        let next_attempt = envelope.headers.retry_attempt + 1;
        match spec.delay_for_attempt(next_attempt) {
            Some(delay) => {
                envelope = envelope.for_retry(delay);
                observed_ttls.push(envelope.headers.ttl_ms.unwrap());
            }
            None => break,
        }
    }

    // TTLs observed on the retry queue match the configured ladder.
    assert_eq!(observed_ttls, vec![300_000, 900_000, 3_600_000, 21_600_000]);
    assert_eq!(envelope.headers.retry_attempt, spec.max_retries());
    assert_eq!(envelope.headers.original_queue, "orders.processing");

    let dead = envelope.for_dead_letter("market data unavailable: request timed out");
    assert!(dead
        .headers
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("timed out"));
    assert_eq!(dead.headers.priority, 1);
}

#[test]
fn test_positions_ladder_is_tighter() {
    let spec = QueueSpec::positions();
    assert_eq!(
        (1..=4)
            .map(|i| spec.delay_for_attempt(i).unwrap().as_secs())
            .collect::<Vec<_>>(),
        vec![120, 600, 1800, 7200]
    );
}

#[test]
fn test_classification_drives_the_branch() {
    // Everything the workers can see as transient goes to the ladder...
    for transient in [
        "market data unavailable: deadline exceeded",
        "storage error: connection reset by peer",
        "broker connection error: io error",
        "temporary conflict: concurrent position update",
        "processing deadline exceeded",
        "network is unreachable",
    ] {
        assert_eq!(classify_failure(transient), ErrorClass::Retryable, "{transient}");
    }

    // ...and terminal domain failures go straight to the DLQ.
    for fatal in [
        "no open position in AAPL",
        "validation failed: trade value below minimum",
        "maximum open positions reached (100)",
        "malformed payload: missing field `order_id`",
    ] {
        assert_eq!(classify_failure(fatal), ErrorClass::NonRetryable, "{fatal}");
    }
}
