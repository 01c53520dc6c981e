pub mod upstox;

use crate::models::{Candle, CandleInterval, OrderRequest, OrderResponse};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use upstox::UpstoxClient;

/// Source of historical candles and live quotes. Every call takes the
/// current access token; a 401 surfaces as `TradeError::Unauthenticated`.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Candles for `[from, to]`, oldest first
    async fn get_candles(
        &self,
        access_token: &str,
        symbol: &str,
        interval: CandleInterval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>>;

    async fn get_last_price(&self, access_token: &str, symbol: &str) -> Result<f64>;
}

#[async_trait]
pub trait OrderPlacement: Send + Sync {
    async fn place_order(&self, access_token: &str, order: &OrderRequest) -> Result<OrderResponse>;
}
