//! Bittrex v1.1 REST client.
//!
//! Public market data needs no credentials. Order listing, placement
//! and cancellation are authenticated with `apikey`/`nonce` query
//! parameters plus an `apisign` header: HMAC-SHA512 over the full
//! request URI, hex-encoded.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha512;
use tracing::debug;

use super::exchange::{ExchangeApi, Order, OrderSide, Ticker};
use super::types::{ApiEnvelope, OpenOrderResponse, OrderIdResponse, TickerResponse};

const API_BASE: &str = "https://api.bittrex.com/api/v1.1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type HmacSha512 = Hmac<Sha512>;

/// API credentials for the authenticated market endpoints.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

/// HTTP client for the Bittrex exchange.
pub struct BittrexClient {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl BittrexClient {
    /// Create a client against the production API.
    pub fn new(credentials: Option<Credentials>) -> Result<Self> {
        Self::with_base_url(API_BASE.to_string(), credentials)
    }

    /// Create with a custom base URL (for testing).
    pub fn with_base_url(base_url: String, credentials: Option<Credentials>) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    /// Build a client from `BITTREX_API_KEY` / `BITTREX_API_SECRET`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("BITTREX_API_KEY").context("BITTREX_API_KEY not set")?;
        let secret = std::env::var("BITTREX_API_SECRET").context("BITTREX_API_SECRET not set")?;
        Self::new(Some(Credentials { key, secret }))
    }

    /// Public-data-only client; authenticated calls will fail.
    pub fn public() -> Result<Self> {
        Self::new(None)
    }

    fn nonce() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Sign the full request URI the way the exchange expects.
    fn sign(secret: &str, uri: &str) -> String {
        let mut mac =
            HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
        mac.update(uri.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn build_url(&self, path: &str, query: &[(&str, &str)]) -> String {
        let mut url = format!("{}{}", self.base_url, path);
        for (i, (key, value)) in query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            url.push_str(&format!("{}{}={}", sep, key, value));
        }
        url
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let url = self.build_url(path, query);
        debug!(url = %url, "GET");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", path))?;

        Self::unwrap_envelope(response, path).await
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let creds = self
            .credentials
            .as_ref()
            .context("Exchange credentials not configured")?;

        let nonce = Self::nonce().to_string();
        let mut query = query.to_vec();
        query.push(("apikey", creds.key.as_str()));
        query.push(("nonce", nonce.as_str()));

        let url = self.build_url(path, &query);
        let apisign = Self::sign(&creds.secret, &url);
        debug!(path = %path, "Signed GET");

        let response = self
            .http
            .get(&url)
            .header("apisign", apisign)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", path))?;

        Self::unwrap_envelope(response, path).await
    }

    /// Check HTTP status and the `{success, message, result}` envelope.
    async fn unwrap_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
        path: &str,
    ) -> Result<Option<T>> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("{} returned {}: {}", path, status, body);
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))?;

        if !envelope.success {
            bail!("{} rejected: {}", path, envelope.message);
        }

        Ok(envelope.result)
    }
}

#[async_trait]
impl ExchangeApi for BittrexClient {
    async fn ticker(&self, instrument: &str) -> Result<Ticker> {
        let ticker: TickerResponse = self
            .get_public("/public/getticker", &[("market", instrument)])
            .await?
            .context("Ticker response had no result")?;

        Ok(Ticker {
            bid: ticker.bid,
            ask: ticker.ask,
            last: ticker.last,
        })
    }

    async fn open_orders(&self, instrument: &str) -> Result<Vec<Order>> {
        let items: Vec<OpenOrderResponse> = self
            .get_signed("/market/getopenorders", &[("market", instrument)])
            .await?
            .unwrap_or_default();

        Ok(items
            .into_iter()
            .map(|o| Order {
                id: o.order_uuid,
                instrument: o.exchange,
                side: if o.order_type.contains("SELL") {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                },
                quantity: o.quantity,
                quantity_remaining: o.quantity_remaining,
                limit: o.limit,
            })
            .collect())
    }

    async fn place_limit_sell(
        &self,
        instrument: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<String> {
        let placed: OrderIdResponse = self
            .get_signed(
                "/market/selllimit",
                &[
                    ("market", instrument),
                    ("quantity", &quantity.to_string()),
                    ("rate", &price.to_string()),
                ],
            )
            .await?
            .context("Sell order was accepted but no order id returned")?;

        Ok(placed.uuid)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        // Successful cancels come back with a null result.
        let _: Option<serde_json::Value> = self
            .get_signed("/market/cancel", &[("uuid", order_id)])
            .await?;
        Ok(())
    }
}
