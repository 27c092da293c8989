//! The exchange contract the guard depends on.
//!
//! Keeping this behind a trait lets the reconciliation loop run
//! against the live Bittrex client or a mock without caring which.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the book an order sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Quote snapshot for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

/// A resting order as reported by the exchange (read-only view).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub quantity_remaining: Decimal,
    pub limit: Decimal,
}

/// The four operations the guard needs from an exchange.
///
/// Every call can fail independently; callers treat failure as
/// non-fatal and resumable on the next tick.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Current bid/ask/last for an instrument.
    async fn ticker(&self, instrument: &str) -> Result<Ticker>;

    /// All resting orders for an instrument.
    async fn open_orders(&self, instrument: &str) -> Result<Vec<Order>>;

    /// Place a limit sell; returns the exchange-assigned order id.
    async fn place_limit_sell(
        &self,
        instrument: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<String>;

    /// Cancel a resting order by id.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;
}
