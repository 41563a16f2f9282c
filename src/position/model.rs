//! Position aggregate: weighted-average cost basis and status machine.
//!
//! A position row is the consistency boundary for one `(user_id, symbol)`
//! holding. Market-snapshot fields are derived and refreshed on every
//! mutation; the cost basis only moves on buys.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Active,
    Partial,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Active => "ACTIVE",
            PositionStatus::Partial => "PARTIAL",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(PositionStatus::Active),
            "PARTIAL" => Some(PositionStatus::Partial),
            "CLOSED" => Some(PositionStatus::Closed),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, PositionStatus::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionType {
    Long,
    Short,
}

impl PositionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionType::Long => "LONG",
            PositionType::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(PositionType::Long),
            "SHORT" => Some(PositionType::Short),
            _ => None,
        }
    }
}

/// Tolerance for the `total_investment = quantity * average_price`
/// invariant check.
pub const INVESTMENT_TOLERANCE_EXP: u32 = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub total_investment: Decimal,
    pub current_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub unrealized_pnl_pct: Option<Decimal>,
    pub position_type: PositionType,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Open a new LONG position from an initial buy.
    pub fn open(
        user_id: Uuid,
        symbol: String,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        let mut position = Self {
            id: Uuid::new_v4(),
            user_id,
            symbol,
            quantity,
            average_price: price,
            total_investment: quantity * price,
            current_price: Some(price),
            market_value: None,
            unrealized_pnl: None,
            unrealized_pnl_pct: None,
            position_type: PositionType::Long,
            status: PositionStatus::Active,
            created_at: at,
            updated_at: at,
            last_trade_at: Some(at),
        };
        position.refresh_market_fields();
        position
    }

    /// Fold a buy into the weighted-average cost basis:
    /// `new_avg = (old_qty*old_avg + add_qty*add_price) / (old_qty + add_qty)`.
    pub fn apply_buy(&mut self, quantity: Decimal, price: Decimal, at: DateTime<Utc>) {
        let new_quantity = self.quantity + quantity;
        self.average_price =
            (self.quantity * self.average_price + quantity * price) / new_quantity;
        self.quantity = new_quantity;
        self.total_investment = self.quantity * self.average_price;
        self.current_price = Some(price);
        self.last_trade_at = Some(at);
        self.updated_at = Utc::now();
        self.refresh_market_fields();
    }

    /// Reduce the position by a sell. The average price never moves on a
    /// sell; the realized P&L of the reduced shares is returned.
    ///
    /// Callers guarantee `quantity <= self.quantity`.
    pub fn apply_sell(&mut self, quantity: Decimal, price: Decimal, at: DateTime<Utc>) -> Decimal {
        debug_assert!(quantity <= self.quantity);
        let realized = (price - self.average_price) * quantity;
        self.quantity -= quantity;
        self.total_investment = self.quantity * self.average_price;
        self.current_price = Some(price);
        self.last_trade_at = Some(at);
        self.updated_at = Utc::now();
        if self.quantity.is_zero() {
            // basis is kept on the closed row for audit
            self.status = PositionStatus::Closed;
        } else {
            self.status = PositionStatus::Partial;
        }
        self.refresh_market_fields();
        realized
    }

    /// Refresh the market snapshot from `current_price`. Returns true when
    /// the price actually changed.
    pub fn mark_price(&mut self, price: Decimal) -> bool {
        if self.current_price == Some(price) {
            return false;
        }
        self.current_price = Some(price);
        self.refresh_market_fields();
        true
    }

    fn refresh_market_fields(&mut self) {
        match self.current_price {
            Some(price) => {
                self.market_value = Some(self.quantity * price);
                let pnl = (price - self.average_price) * self.quantity;
                self.unrealized_pnl = Some(pnl);
                self.unrealized_pnl_pct = if self.total_investment.is_zero() {
                    Some(Decimal::ZERO)
                } else {
                    Some(pnl / self.total_investment * Decimal::ONE_HUNDRED)
                };
            }
            None => {
                self.market_value = None;
                self.unrealized_pnl = None;
                self.unrealized_pnl_pct = None;
            }
        }
    }

    pub fn holding_period(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// At-rest invariants: investment consistency within 1e-8 and the
    /// status/quantity correspondence.
    pub fn invariants_hold(&self) -> bool {
        let tolerance = Decimal::new(1, INVESTMENT_TOLERANCE_EXP);
        let drift = (self.total_investment - self.quantity * self.average_price).abs();
        if drift > tolerance {
            return false;
        }
        match self.status {
            PositionStatus::Closed => self.quantity.is_zero(),
            PositionStatus::Active | PositionStatus::Partial => self.quantity > Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_position(qty: Decimal, price: Decimal) -> Position {
        Position::open(Uuid::new_v4(), "AAPL".into(), qty, price, Utc::now())
    }

    #[test]
    fn test_open_sets_basis() {
        let p = new_position(dec!(10), dec!(150));
        assert_eq!(p.quantity, dec!(10));
        assert_eq!(p.average_price, dec!(150));
        assert_eq!(p.total_investment, dec!(1500));
        assert_eq!(p.status, PositionStatus::Active);
        assert_eq!(p.market_value, Some(dec!(1500)));
        assert!(p.invariants_hold());
    }

    #[test]
    fn test_weighted_average_on_buy() {
        let mut p = new_position(dec!(10), dec!(150));
        p.apply_buy(dec!(5), dec!(160), Utc::now());

        assert_eq!(p.quantity, dec!(15));
        // (10*150 + 5*160) / 15 = 153.3333...
        let expected = dec!(2300) / dec!(15);
        assert!((p.average_price - expected).abs() < dec!(0.000001));
        assert!((p.total_investment - dec!(2300)).abs() < dec!(0.00000001));
        assert!(p.invariants_hold());
    }

    #[test]
    fn test_sell_keeps_average_and_realizes_pnl() {
        let mut p = new_position(dec!(10), dec!(150));
        p.apply_buy(dec!(5), dec!(160), Utc::now());
        let avg_before = p.average_price;

        let realized = p.apply_sell(dec!(6), dec!(170), Utc::now());

        assert_eq!(p.quantity, dec!(9));
        assert_eq!(p.average_price, avg_before);
        assert_eq!(p.status, PositionStatus::Partial);
        // (170 - 153.3333...) * 6 = 100.00
        assert!((realized - dec!(100)).abs() < dec!(0.0001));
        assert!(p.invariants_hold());
    }

    #[test]
    fn test_full_sell_closes() {
        let mut p = new_position(dec!(10), dec!(150));
        let realized = p.apply_sell(dec!(10), dec!(175), Utc::now());

        assert_eq!(p.quantity, Decimal::ZERO);
        assert_eq!(p.status, PositionStatus::Closed);
        assert_eq!(realized, dec!(250));
        assert_eq!(p.total_investment, Decimal::ZERO);
        assert!(p.invariants_hold());
    }

    #[test]
    fn test_buy_sequence_matches_direct_formula() {
        let buys = [
            (dec!(3), dec!(101.5)),
            (dec!(7), dec!(99.25)),
            (dec!(11), dec!(104)),
            (dec!(2), dec!(98.125)),
        ];
        let mut p = new_position(buys[0].0, buys[0].1);
        for (qty, price) in &buys[1..] {
            p.apply_buy(*qty, *price, Utc::now());
        }

        let total_qty: Decimal = buys.iter().map(|(q, _)| *q).sum();
        let total_cost: Decimal = buys.iter().map(|(q, px)| *q * *px).sum();
        let expected = total_cost / total_qty;
        // 1e-6 relative
        assert!(((p.average_price - expected) / expected).abs() < dec!(0.000001));
    }

    #[test]
    fn test_mark_price_only_reports_changes() {
        let mut p = new_position(dec!(10), dec!(150));
        assert!(!p.mark_price(dec!(150)));
        assert!(p.mark_price(dec!(155)));
        assert_eq!(p.unrealized_pnl, Some(dec!(50)));
        assert_eq!(p.unrealized_pnl_pct.map(|v| v.round_dp(4)), Some(dec!(3.3333)));
    }
}
