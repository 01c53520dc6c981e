use crate::api::{MarketDataProvider, OrderPlacement};
use crate::config::BrokerConfig;
use crate::models::{
    Candle, CandleInterval, OrderRequest, OrderResponse, OrderType, Product, TradeSide, Validity,
};
use crate::{Result, TradeError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

// Type alias for the rate limiter to simplify signatures
type UpstoxRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the Upstox v2 REST API (market data and order placement)
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct UpstoxClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<UpstoxRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    candles: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct LtpQuote {
    last_price: f64,
    #[serde(default)]
    instrument_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderData {
    order_id: String,
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody<'a> {
    quantity: u64,
    product: Product,
    validity: Validity,
    price: f64,
    instrument_token: &'a str,
    order_type: OrderType,
    transaction_type: TradeSide,
    disclosed_quantity: u64,
    trigger_price: f64,
    is_amo: bool,
}

// ============== Implementation ==============

impl UpstoxClient {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    /// Rate-limited send. 401 maps to `Unauthenticated` so the caller can
    /// re-login; other failures are plain rejections and are not retried.
    async fn send(&self, request: RequestBuilder, access_token: &str) -> Result<String> {
        self.rate_limiter.until_ready().await;

        let response = request
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(TradeError::Unauthenticated(
                "access token rejected by broker".to_string(),
            ));
        }

        if !status.is_success() {
            tracing::warn!("Upstox API error {}: {}", status, body);
            return Err(TradeError::remote(Some(status.as_u16()), body));
        }

        Ok(body)
    }

    fn unwrap_envelope<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T> {
        let envelope: Envelope<T> = serde_json::from_str(body)?;

        if envelope.status != "success" {
            return Err(TradeError::remote(
                None,
                format!("status={} body={}", envelope.status, body),
            ));
        }

        envelope
            .data
            .ok_or_else(|| TradeError::remote(None, "response without data"))
    }
}

/// Decode `[timestamp, open, high, low, close, volume, (oi)]`
fn parse_candle_row(row: &[serde_json::Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(TradeError::InvalidInput(format!(
            "candle row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let timestamp = row[0]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| TradeError::InvalidInput(format!("bad candle timestamp {}", row[0])))?;

    let number = |i: usize| {
        row[i]
            .as_f64()
            .ok_or_else(|| TradeError::InvalidInput(format!("bad candle field {}: {}", i, row[i])))
    };

    Ok(Candle {
        timestamp,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(5)?,
    })
}

#[async_trait]
impl MarketDataProvider for UpstoxClient {
    /// Endpoint: GET /historical-candle/{instrument_key}/{interval}/{to_date}/{from_date}
    async fn get_candles(
        &self,
        access_token: &str,
        symbol: &str,
        interval: CandleInterval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/historical-candle/{}/{}/{}/{}",
            self.base_url,
            urlencoding::encode(symbol),
            interval.as_str(),
            to.format("%Y-%m-%d"),
            from.format("%Y-%m-%d")
        );

        tracing::debug!("Fetching {} candles for {} ({} to {})", interval.as_str(), symbol, from, to);

        let body = self.send(self.client.get(&url), access_token).await?;
        let data: CandleData = Self::unwrap_envelope(&body)?;

        let mut candles = data
            .candles
            .iter()
            .map(|row| parse_candle_row(row))
            .collect::<Result<Vec<_>>>()?;

        // Broker returns newest first
        candles.sort_by_key(|c| c.timestamp);

        tracing::debug!("Fetched {} candles for {}", candles.len(), symbol);
        Ok(candles)
    }

    /// Endpoint: GET /market-quote/ltp?instrument_key={symbol}
    async fn get_last_price(&self, access_token: &str, symbol: &str) -> Result<f64> {
        let request = self
            .client
            .get(format!("{}/market-quote/ltp", self.base_url))
            .query(&[("instrument_key", symbol)]);

        let body = self.send(request, access_token).await?;
        let quotes: HashMap<String, LtpQuote> = Self::unwrap_envelope(&body)?;

        // Keys come back as "EXCHANGE:name"; match on instrument_token when present
        let quote = quotes
            .values()
            .find(|q| q.instrument_token.as_deref() == Some(symbol))
            .or_else(|| quotes.values().next())
            .ok_or_else(|| TradeError::remote(None, format!("no quote for {}", symbol)))?;

        Ok(quote.last_price)
    }
}

#[async_trait]
impl OrderPlacement for UpstoxClient {
    /// Endpoint: POST /order/place
    async fn place_order(&self, access_token: &str, order: &OrderRequest) -> Result<OrderResponse> {
        let body = PlaceOrderBody {
            quantity: order.quantity,
            product: order.product,
            validity: order.validity,
            price: order.price,
            instrument_token: &order.symbol,
            order_type: order.order_type,
            transaction_type: order.side,
            disclosed_quantity: order.disclosed_quantity,
            trigger_price: order.trigger_price,
            is_amo: order.is_amo,
        };

        tracing::info!(
            "Placing {:?} {:?} order: {} x {} @ {:.2}",
            order.side,
            order.order_type,
            order.quantity,
            order.symbol,
            order.price
        );

        let request = self
            .client
            .post(format!("{}/order/place", self.base_url))
            .json(&body);

        let response = self.send(request, access_token).await?;
        let envelope: Envelope<OrderData> = serde_json::from_str(&response)?;
        let data = envelope
            .data
            .ok_or_else(|| TradeError::remote(None, format!("order rejected: {}", response)))?;

        Ok(OrderResponse {
            order_id: data.order_id,
            status: envelope.status,
        })
    }
}
