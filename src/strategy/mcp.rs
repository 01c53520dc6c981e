use crate::models::{CandleInterval, Pivot, PricePoint, Product, Signal, StrategyDecision, Validity};
use crate::{Result, TradeError};
use serde::Deserialize;

/// MCP proximity strategy
///
/// Trades only when the live price sits within `deviation_threshold` of the
/// most connected pivot. Direction follows the short-term trend: above the
/// recent average means BUY, otherwise SELL. Size is the whole investment
/// amount in whole units.
#[derive(Debug, Clone)]
pub struct McpStrategy {
    config: McpStrategyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpStrategyConfig {
    /// Max relative distance from the pivot to act (0.005 = 0.5%)
    pub deviation_threshold: f64,

    /// Number of trailing points used for the trend average
    pub recent_window: usize,

    /// Candle granularity for the historical fetch
    pub interval: CandleInterval,

    /// Days of history fed to the pivot detector
    pub lookback_days: i64,

    pub product: Product,
    pub validity: Validity,

    /// Decide but never send orders
    pub dry_run: bool,
}

impl Default for McpStrategyConfig {
    fn default() -> Self {
        Self {
            deviation_threshold: 0.005,
            recent_window: 10,
            interval: CandleInterval::Day,
            lookback_days: 30,
            product: Product::Delivery,
            validity: Validity::Day,
            dry_run: false,
        }
    }
}

impl McpStrategy {
    pub fn new(config: McpStrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &McpStrategyConfig {
        &self.config
    }

    /// The trailing window `decide` expects, taken from a full series
    pub fn recent_window<'a>(&self, points: &'a [PricePoint]) -> &'a [PricePoint] {
        let start = points.len().saturating_sub(self.config.recent_window);
        &points[start..]
    }

    pub fn decide(
        &self,
        pivot: &Pivot,
        current_price: f64,
        recent_window: &[PricePoint],
        investment_amount: f64,
    ) -> Result<StrategyDecision> {
        if !pivot.price.is_finite() || pivot.price <= 0.0 {
            return Err(TradeError::InvalidInput(format!(
                "pivot price {} must be positive",
                pivot.price
            )));
        }
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(TradeError::InvalidInput(format!(
                "current price {} must be positive",
                current_price
            )));
        }
        if !investment_amount.is_finite() || investment_amount < 0.0 {
            return Err(TradeError::InvalidInput(format!(
                "investment amount {} must be a non-negative number",
                investment_amount
            )));
        }

        let deviation = (current_price - pivot.price).abs() / pivot.price;

        if deviation > self.config.deviation_threshold {
            tracing::debug!(
                "HOLD: price {:.2} is {:.3}% from pivot {:.2} (limit {:.3}%)",
                current_price,
                deviation * 100.0,
                pivot.price,
                self.config.deviation_threshold * 100.0
            );
            return Ok(StrategyDecision {
                action: Signal::Hold,
                order_price: None,
                quantity: None,
                deviation,
                connections: pivot.connections,
            });
        }

        if recent_window.is_empty() {
            return Err(TradeError::InvalidInput(
                "recent window must contain at least one price".to_string(),
            ));
        }
        let avg_recent =
            recent_window.iter().map(|p| p.price).sum::<f64>() / recent_window.len() as f64;

        let action = if current_price > avg_recent {
            Signal::Buy
        } else {
            Signal::Sell
        };

        let quantity = (investment_amount / current_price).floor() as u64;
        if quantity == 0 {
            return Err(TradeError::InsufficientCapital {
                amount: investment_amount,
                price: current_price,
            });
        }

        tracing::info!(
            "🎯 MCP {:?}: price {:.2} within {:.3}% of pivot {:.2} ({} connections), recent avg {:.2}, qty {}",
            action,
            current_price,
            deviation * 100.0,
            pivot.price,
            pivot.connections,
            avg_recent,
            quantity
        );

        Ok(StrategyDecision {
            action,
            order_price: Some(current_price),
            quantity: Some(quantity),
            deviation,
            connections: pivot.connections,
        })
    }
}

impl Default for McpStrategy {
    fn default() -> Self {
        Self::new(McpStrategyConfig::default())
    }
}
