use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candlestick as returned by the historical data endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Close price at a point in time. This is what the pivot detector works on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl From<&Candle> for PricePoint {
    fn from(candle: &Candle) -> Self {
        Self {
            timestamp: candle.timestamp,
            price: candle.close,
        }
    }
}

/// Mean-crossover point and the number of samples that touch its level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pivot {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub connections: usize,
}

/// Trading signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    /// Order side for actionable signals
    pub fn side(&self) -> Option<TradeSide> {
        match self {
            Signal::Buy => Some(TradeSide::Buy),
            Signal::Sell => Some(TradeSide::Sell),
            Signal::Hold => None,
        }
    }
}

/// Output of one strategy evaluation. Never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StrategyDecision {
    pub action: Signal,
    pub order_price: Option<f64>,
    pub quantity: Option<u64>,
    pub deviation: f64,
    pub connections: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    #[serde(rename = "MARKET")]
    Market,
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "SL-M")]
    StopLossMarket,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validity {
    Day,
    Ioc,
}

/// Product code: delivery or intraday
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Product {
    #[serde(rename = "D", alias = "delivery")]
    Delivery,
    #[serde(rename = "I", alias = "intraday")]
    Intraday,
}

/// Candle granularity accepted by the historical data endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum CandleInterval {
    #[serde(rename = "1minute")]
    #[value(name = "1minute")]
    OneMinute,
    #[serde(rename = "30minute")]
    #[value(name = "30minute")]
    ThirtyMinute,
    #[serde(rename = "day")]
    #[value(name = "day")]
    Day,
    #[serde(rename = "week")]
    #[value(name = "week")]
    Week,
    #[serde(rename = "month")]
    #[value(name = "month")]
    Month,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1minute",
            CandleInterval::ThirtyMinute => "30minute",
            CandleInterval::Day => "day",
            CandleInterval::Week => "week",
            CandleInterval::Month => "month",
        }
    }
}

/// Order as submitted to the order placement service
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub quantity: u64,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub price: f64,
    pub validity: Validity,
    pub product: Product,
    pub disclosed_quantity: u64,
    pub trigger_price: f64,
    pub is_amo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: String,
}

/// One line of a batch MCP run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct McpReport {
    pub symbol: String,
    pub pivot: Option<Pivot>,
    pub error: Option<String>,
}
