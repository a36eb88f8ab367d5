//! Binance REST venue for isolated margin trading.
//!
//! Implements [`VenuePort`] over Binance's REST API:
//! - Market/limit orders on isolated margin
//! - Account position query (reconciliation input)
//! - Public ticker prices
//!
//! # Authentication
//!
//! Binance uses API key + secret with HMAC SHA256 signatures. All signed
//! requests require:
//! - `X-MBX-APIKEY` header
//! - `signature` query parameter (HMAC SHA256 of the query string)
//! - `timestamp` query parameter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use keeper_domain::{ExchangePosition, OrderSide, Price, Quantity, Side, Symbol};

use crate::error::ExchangeError;
use crate::ports::{OrderType, VenueFill, VenuePort};

/// Binance REST API base URL (Spot/Margin)
const BINANCE_API_URL: &str = "https://api.binance.com";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// HTTP failure classification
// =============================================================================

/// How a request failed, before endpoint-specific error mapping.
enum HttpFailure {
    /// Network error, timeout, 5xx, or venue-side throttling
    Transient(String),
    /// Venue answered with an error payload
    Api { code: i64, msg: String },
    /// Unintelligible response
    Malformed(String),
}

impl HttpFailure {
    /// Mapping for order placement: API errors are venue rejections.
    fn into_order_error(self) -> ExchangeError {
        match self {
            HttpFailure::Transient(msg) => ExchangeError::Unavailable(msg),
            HttpFailure::Api { code, msg } => {
                ExchangeError::OrderRejected(format!("{} ({})", msg, code))
            }
            HttpFailure::Malformed(msg) => ExchangeError::InvalidResponse(msg),
        }
    }

    /// Mapping for reads: only transport problems are retryable.
    fn into_read_error(self) -> ExchangeError {
        match self {
            HttpFailure::Transient(msg) => ExchangeError::Unavailable(msg),
            HttpFailure::Api { code, msg } => {
                ExchangeError::InvalidResponse(format!("{} ({})", msg, code))
            }
            HttpFailure::Malformed(msg) => ExchangeError::InvalidResponse(msg),
        }
    }
}

// =============================================================================
// Binance venue
// =============================================================================

/// Binance isolated margin REST client.
pub struct BinanceVenue {
    client: Client,
    api_key: String,
    api_secret: String,
    testnet: bool,
}

impl BinanceVenue {
    /// Create a new Binance venue client.
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_secret,
            testnet: false,
        }
    }

    /// Create a client against the Binance testnet.
    pub fn testnet(api_key: String, api_secret: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_secret,
            testnet: true,
        }
    }

    fn base_url(&self) -> &str {
        if self.testnet {
            "https://testnet.binance.vision"
        } else {
            BINANCE_API_URL
        }
    }

    /// Build the query string with signature for signed requests.
    ///
    /// Binance requires all parameters in the query string, sorted, plus a
    /// timestamp, signed with HMAC SHA256.
    fn build_signed_query(
        &self,
        mut params: Vec<(&str, String)>,
    ) -> Result<String, ExchangeError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        params.push(("timestamp", timestamp));

        params.sort_by(|a, b| a.0.cmp(b.0));

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Signature(format!("HMAC error: {}", e)))?;

        mac.update(query_string.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}&signature={}", query_string, signature))
    }

    /// Send a request and classify the outcome.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, HttpFailure> {
        let response = timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), request.send())
            .await
            .map_err(|_| HttpFailure::Transient("request timed out".to_string()))?
            .map_err(|e| HttpFailure::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HttpFailure::Malformed(e.to_string()))?;

        if status.is_success() {
            return Ok(body);
        }

        if status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(HttpFailure::Transient(format!("HTTP {}: {}", status, body)));
        }

        match serde_json::from_str::<BinanceErrorResponse>(&body) {
            Ok(err) => Err(HttpFailure::Api { code: err.code, msg: err.msg }),
            Err(_) => Err(HttpFailure::Malformed(format!("HTTP {}: {}", status, body))),
        }
    }

    async fn get_public(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<String, HttpFailure> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url(), endpoint)
        } else {
            let query = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            format!("{}{}?{}", self.base_url(), endpoint, query)
        };

        self.send(self.client.get(&url)).await
    }

    async fn get_signed(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<String, HttpFailure> {
        let query = self
            .build_signed_query(params)
            .map_err(|e| HttpFailure::Malformed(e.to_string()))?;
        let url = format!("{}{}?{}", self.base_url(), endpoint, query);

        self.send(self.client.get(&url).header("X-MBX-APIKEY", &self.api_key))
            .await
    }

    async fn post_signed(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<String, HttpFailure> {
        let query = self
            .build_signed_query(params)
            .map_err(|e| HttpFailure::Malformed(e.to_string()))?;
        let url = format!("{}{}?{}", self.base_url(), endpoint, query);

        self.send(self.client.post(&url).header("X-MBX-APIKEY", &self.api_key))
            .await
    }

    async fn delete_signed(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<String, HttpFailure> {
        let query = self
            .build_signed_query(params)
            .map_err(|e| HttpFailure::Malformed(e.to_string()))?;
        let url = format!("{}{}?{}", self.base_url(), endpoint, query);

        self.send(self.client.delete(&url).header("X-MBX-APIKEY", &self.api_key))
            .await
    }
}

#[async_trait]
impl VenuePort for BinanceVenue {
    async fn place_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Quantity,
        order_type: &OrderType,
    ) -> Result<VenueFill, ExchangeError> {
        let side_str = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };

        let mut params = vec![
            ("symbol", symbol.as_pair()),
            ("side", side_str.to_string()),
            ("quantity", quantity.as_decimal().to_string()),
        ];

        match order_type {
            OrderType::Market => params.push(("type", "MARKET".to_string())),
            OrderType::Limit { price } => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("price", price.as_decimal().to_string()));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }

        let body = self
            .post_signed("/sapi/v1/margin/order", params)
            .await
            .map_err(HttpFailure::into_order_error)?;

        let response: MarginOrderResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        fill_from_response(response)
    }

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let body = self
            .get_signed("/sapi/v1/margin/isolated/account", vec![])
            .await
            .map_err(HttpFailure::into_read_error)?;

        let account: IsolatedAccountResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        let mut positions = Vec::new();
        for (pair, side, quantity) in account_holdings(&account) {
            let symbol = match Symbol::from_pair(&pair) {
                Ok(symbol) => symbol,
                Err(e) => {
                    warn!(pair = %pair, error = %e, "Skipping unparseable isolated margin pair");
                    continue;
                }
            };

            // Isolated margin reports balances, not entries; the ticker is
            // the best available price estimate for the adopted position.
            let price = self.get_ticker(&symbol).await?;

            positions.push(ExchangePosition {
                symbol,
                side,
                quantity: Quantity::new(quantity)
                    .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?,
                entry_price: price,
            });
        }

        Ok(positions)
    }

    async fn get_ticker(&self, symbol: &Symbol) -> Result<Price, ExchangeError> {
        let params = vec![("symbol", symbol.as_pair())];

        let body = self
            .get_public("/api/v3/ticker/price", params)
            .await
            .map_err(HttpFailure::into_read_error)?;

        let response: PriceResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        Price::new(response.price).map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), ExchangeError> {
        let params = vec![
            ("symbol", symbol.as_pair()),
            ("orderId", order_id.to_string()),
        ];

        self.delete_signed("/sapi/v1/margin/order", params)
            .await
            .map_err(HttpFailure::into_order_error)?;

        Ok(())
    }
}

// =============================================================================
// Response types and mapping
// =============================================================================

/// Binance error response.
#[derive(Debug, Deserialize)]
struct BinanceErrorResponse {
    code: i64,
    msg: String,
}

/// Margin order response (immediately filled orders only).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginOrderResponse {
    order_id: u64,
    status: String,
    executed_qty: Decimal,
    cummulative_quote_qty: Decimal,
    transact_time: i64,
}

/// Isolated margin account response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IsolatedAccountResponse {
    assets: Vec<IsolatedPair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IsolatedPair {
    symbol: String,
    base_asset: PairAsset,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairAsset {
    borrowed: Decimal,
    net_asset: Decimal,
}

/// Extract (pair, side, quantity) holdings from an isolated margin account.
///
/// A borrowed base asset means the position is short; a positive net base
/// balance is long.
fn account_holdings(account: &IsolatedAccountResponse) -> Vec<(String, Side, Decimal)> {
    account
        .assets
        .iter()
        .filter(|pair| !pair.base_asset.net_asset.is_zero())
        .map(|pair| {
            let side = if pair.base_asset.borrowed > Decimal::ZERO {
                Side::Short
            } else {
                Side::Long
            };
            (pair.symbol.clone(), side, pair.base_asset.net_asset.abs())
        })
        .collect()
}

/// Convert an order response into a fill, or fail if it did not fill.
///
/// Resting orders are not supported at this boundary: the store records
/// positions from confirmed fills only.
fn fill_from_response(response: MarginOrderResponse) -> Result<VenueFill, ExchangeError> {
    if response.status != "FILLED" || response.executed_qty.is_zero() {
        return Err(ExchangeError::OrderRejected(format!(
            "order {} not immediately filled (status {})",
            response.order_id, response.status
        )));
    }

    let avg_price = response.cummulative_quote_qty / response.executed_qty;

    Ok(VenueFill {
        venue_order_id: response.order_id.to_string(),
        fill_price: Price::new(avg_price)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?,
        filled_quantity: Quantity::new(response.executed_qty)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?,
        filled_at: DateTime::from_timestamp_millis(response.transact_time)
            .unwrap_or_else(Utc::now),
    })
}

/// Price ticker response.
#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Decimal,
}

// =============================================================================
// Tests
// =============================================================================
