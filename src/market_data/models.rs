//! Market-data snapshot entry.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataEntry {
    pub symbol: String,
    pub name: String,
    pub category: String,
    #[serde(rename = "lastQuote")]
    pub last_quote: Decimal,
    pub updated_at: DateTime<Utc>,
}
