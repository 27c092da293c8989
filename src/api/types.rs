//! Wire types for the Bittrex v1.1 REST API.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Every v1.1 endpoint wraps its payload in this envelope.
///
/// `success == false` carries the rejection reason in `message`;
/// `result` may be `null` even on success (e.g. `/market/cancel`).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub result: Option<T>,
}

/// Result of `/public/getticker`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TickerResponse {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

/// One entry from `/market/getopenorders`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenOrderResponse {
    pub order_uuid: String,
    pub exchange: String,
    pub order_type: String,
    pub quantity: Decimal,
    pub quantity_remaining: Decimal,
    pub limit: Decimal,
    #[serde(default)]
    pub price: Decimal,
}

/// Result of `/market/selllimit`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderIdResponse {
    pub uuid: String,
}
