//! Position use-case guards and edge cases.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::Harness;
use rust_decimal_macros::dec;
use uuid::Uuid;

use orderflow::config::RiskConfig;
use orderflow::mq::PositionUpdateMsg;
use orderflow::order::model::OrderSide;
use orderflow::position::error::PositionError;
use orderflow::position::events::PositionEvent;
use orderflow::position::model::PositionStatus;

fn update(user: Uuid, side: OrderSide, qty: &str, price: &str) -> PositionUpdateMsg {
    PositionUpdateMsg {
        order_id: Uuid::new_v4(),
        user_id: user,
        symbol: "AAPL".into(),
        side,
        quantity: qty.parse().unwrap(),
        execution_price: price.parse().unwrap(),
        executed_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_sell_without_position_is_fatal() {
    let h = Harness::new();
    let user = Uuid::new_v4();

    let err = h
        .positions
        .apply(&update(user, OrderSide::Sell, "5", "150"))
        .await
        .unwrap_err();
    assert!(matches!(err, PositionError::NoPosition(_)));
    // Fatal for the worker: straight to the DLQ, no retry.
    assert_eq!(
        orderflow::mq::classify_failure(&err.to_string()),
        orderflow::mq::ErrorClass::NonRetryable
    );
}

#[tokio::test]
async fn test_oversized_sell_closes_at_held_quantity() {
    let h = Harness::new();
    let user = Uuid::new_v4();

    h.positions
        .apply(&update(user, OrderSide::Buy, "10", "150"))
        .await
        .unwrap();

    // A sell for more than held fully closes; only the held quantity
    // is realized.
    let events = h
        .positions
        .apply(&update(user, OrderSide::Sell, "25", "160"))
        .await
        .unwrap();

    let closed = events
        .iter()
        .any(|e| matches!(e, PositionEvent::PositionClosed { .. }));
    assert!(closed);

    let realized = events
        .iter()
        .find_map(|e| match e {
            PositionEvent::PositionUpdated { transaction, .. } => transaction.realized_pnl,
            _ => None,
        })
        .unwrap();
    assert_eq!(realized, dec!(100)); // (160-150) * 10, not 25

    assert!(h.position_store.open_position(user, "AAPL").is_none());
}

#[tokio::test]
async fn test_reopening_after_close_creates_new_row() {
    let h = Harness::new();
    let user = Uuid::new_v4();

    h.positions
        .apply(&update(user, OrderSide::Buy, "10", "150"))
        .await
        .unwrap();
    h.positions
        .apply(&update(user, OrderSide::Sell, "10", "160"))
        .await
        .unwrap();

    let events = h
        .positions
        .apply(&update(user, OrderSide::Buy, "4", "155"))
        .await
        .unwrap();
    assert!(matches!(events[0], PositionEvent::PositionCreated { .. }));

    // Two rows total: the closed one stays for audit.
    let all = h.position_store.all();
    assert_eq!(all.len(), 2);
    let open = h.position_store.open_position(user, "AAPL").unwrap();
    assert_eq!(open.quantity, dec!(4));
    assert_eq!(open.average_price, dec!(155));
    assert_eq!(open.status, PositionStatus::Active);
}

#[tokio::test]
async fn test_max_positions_guard() {
    let mut risk = RiskConfig::default();
    risk.max_positions_per_user = 1;
    let h = Harness::with_risk(risk);
    let user = Uuid::new_v4();

    h.positions
        .apply(&update(user, OrderSide::Buy, "1", "150"))
        .await
        .unwrap();

    let mut second = update(user, OrderSide::Buy, "1", "50");
    second.symbol = "MSFT".into();
    let err = h.positions.apply(&second).await.unwrap_err();
    assert!(matches!(err, PositionError::MaxPositions(1)));
}

#[tokio::test]
async fn test_minimum_trade_value_guard() {
    let h = Harness::new();
    let user = Uuid::new_v4();

    // 0.001 * 0.001 is far below the $0.01 floor.
    let err = h
        .positions
        .apply(&update(user, OrderSide::Buy, "0.001", "0.001"))
        .await
        .unwrap_err();
    assert!(matches!(err, PositionError::Validation(_)));
}

#[tokio::test]
async fn test_close_price_sanity_guard() {
    let h = Harness::new();
    let user = Uuid::new_v4();

    h.positions
        .apply(&update(user, OrderSide::Buy, "10", "150"))
        .await
        .unwrap();

    // Closing at 1 when the basis is 150 trips the fat-finger floor
    // (default: anything below 10% of basis).
    let err = h
        .positions
        .apply(&update(user, OrderSide::Sell, "10", "1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PositionError::Validation(_)));

    // The position is untouched.
    let position = h.position_store.open_position(user, "AAPL").unwrap();
    assert_eq!(position.quantity, dec!(10));

    // A partial sell at the same price is not a close and passes the guard.
    let events = h
        .positions
        .apply(&update(user, OrderSide::Sell, "2", "20"))
        .await
        .unwrap();
    assert!(matches!(events[0], PositionEvent::PositionUpdated { .. }));
}

#[tokio::test]
async fn test_minimum_holding_period_guard() {
    let mut risk = RiskConfig::default();
    risk.min_holding_period = Duration::from_secs(3600);
    let h = Harness::with_risk(risk);
    let user = Uuid::new_v4();

    h.positions
        .apply(&update(user, OrderSide::Buy, "10", "150"))
        .await
        .unwrap();

    let err = h
        .positions
        .apply(&update(user, OrderSide::Sell, "10", "155"))
        .await
        .unwrap_err();
    assert!(matches!(err, PositionError::Validation(_)));

    // Partial sells are unaffected by the holding-period guard.
    assert!(h
        .positions
        .apply(&update(user, OrderSide::Sell, "3", "155"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_price_mark_emits_only_on_change() {
    let h = Harness::new();
    let user = Uuid::new_v4();

    h.positions
        .apply(&update(user, OrderSide::Buy, "10", "150"))
        .await
        .unwrap();

    let event = h
        .positions
        .mark_price(user, "AAPL", dec!(150))
        .await
        .unwrap();
    assert!(event.is_none());

    let event = h
        .positions
        .mark_price(user, "AAPL", dec!(158))
        .await
        .unwrap();
    match event {
        Some(PositionEvent::PositionPriceUpdated {
            old_price,
            new_price,
            ..
        }) => {
            assert_eq!(old_price, Some(dec!(150)));
            assert_eq!(new_price, dec!(158));
        }
        other => panic!("expected PositionPriceUpdated, got {other:?}"),
    }

    let position = h.position_store.open_position(user, "AAPL").unwrap();
    assert_eq!(position.unrealized_pnl, Some(dec!(80)));
}

#[tokio::test]
async fn test_rest_invariants_hold_through_random_walk() {
    let h = Harness::new();
    let user = Uuid::new_v4();

    let trades = [
        (OrderSide::Buy, "3", "101.5"),
        (OrderSide::Buy, "7", "99.25"),
        (OrderSide::Sell, "4", "103"),
        (OrderSide::Buy, "11", "104"),
        (OrderSide::Sell, "2", "98.5"),
        (OrderSide::Buy, "0.5", "102.125"),
    ];
    for (side, qty, price) in trades {
        h.positions
            .apply(&update(user, side, qty, price))
            .await
            .unwrap();
        let position = h.position_store.open_position(user, "AAPL").unwrap();
        assert!(position.invariants_hold(), "invariant broke after {side:?} {qty}@{price}");
    }
}
