use crate::api::{MarketDataProvider, OrderPlacement};
use crate::auth::SessionManager;
use crate::execution::login::LoginPrompt;
use crate::models::{
    McpReport, OrderRequest, OrderResponse, OrderType, Pivot, PricePoint, StrategyDecision,
};
use crate::strategy::{McpStrategy, PivotDetector};
use crate::Result;
use chrono::{Days, Utc};
use std::future::Future;
use std::sync::Arc;

/// Logins attempted per call after an `Unauthenticated` failure
const MAX_REAUTH_RETRIES: u32 = 1;

/// What one strategy run ended with
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    /// Price never crossed its mean in the lookback window
    NoPivotFound,
    Hold(StrategyDecision),
    /// Actionable decision, not sent because dry run is on
    DryRun(StrategyDecision),
    Placed(StrategyDecision, OrderResponse),
}

/// Wires session, market data, detector, strategy and order placement
pub struct Trader {
    session: Arc<SessionManager>,
    market: Arc<dyn MarketDataProvider>,
    orders: Arc<dyn OrderPlacement>,
    prompt: Arc<dyn LoginPrompt>,
    detector: PivotDetector,
    strategy: McpStrategy,
}

impl Trader {
    pub fn new(
        session: Arc<SessionManager>,
        market: Arc<dyn MarketDataProvider>,
        orders: Arc<dyn OrderPlacement>,
        prompt: Arc<dyn LoginPrompt>,
        detector: PivotDetector,
        strategy: McpStrategy,
    ) -> Self {
        Self {
            session,
            market,
            orders,
            prompt,
            detector,
            strategy,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Run an authenticated call. On `Unauthenticated` (no session, or a 401
    /// from the broker) prompt for a login and retry once.
    pub async fn with_reauth<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;

        loop {
            match self.session.require_auth(&op).await {
                Err(e) if e.is_unauthenticated() && retries < MAX_REAUTH_RETRIES => {
                    retries += 1;
                    tracing::warn!("{}, starting interactive login", e);

                    let code = self
                        .prompt
                        .obtain_code(&self.session.authorization_url())
                        .await?;
                    self.session.complete_login(&code).await?;
                }
                other => return other,
            }
        }
    }

    /// Close prices over the configured lookback, oldest first
    pub async fn fetch_points(&self, symbol: &str) -> Result<Vec<PricePoint>> {
        let config = self.strategy.config();
        let to = Utc::now().date_naive();
        let from = to
            .checked_sub_days(Days::new(config.lookback_days.max(1) as u64))
            .unwrap_or(to);
        let interval = config.interval;

        let candles = self
            .with_reauth(|token| async move {
                self.market
                    .get_candles(&token, symbol, interval, from, to)
                    .await
            })
            .await?;

        Ok(candles.iter().map(PricePoint::from).collect())
    }

    pub async fn compute_mcp(&self, symbol: &str) -> Result<Option<Pivot>> {
        let points = self.fetch_points(symbol).await?;
        self.detector.detect_mcp(&points)
    }

    /// MCP for each symbol, one after another. A failing symbol is recorded
    /// in its report and the batch moves on.
    pub async fn batch_mcp(&self, symbols: &[String]) -> Vec<McpReport> {
        let mut reports = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let report = match self.compute_mcp(symbol).await {
                Ok(pivot) => {
                    match &pivot {
                        Some(p) => tracing::info!(
                            "{}: MCP {:.2} ({} connections) at {}",
                            symbol,
                            p.price,
                            p.connections,
                            p.timestamp
                        ),
                        None => tracing::info!("{}: no pivot found", symbol),
                    }
                    McpReport {
                        symbol: symbol.clone(),
                        pivot,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::error!("{}: MCP calculation failed: {}", symbol, e);
                    McpReport {
                        symbol: symbol.clone(),
                        pivot: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }

        reports
    }

    /// Full pipeline for one symbol: history, MCP, live price, decision,
    /// and an order when the decision is actionable.
    pub async fn run_strategy(&self, symbol: &str, investment_amount: f64) -> Result<StrategyOutcome> {
        let points = self.fetch_points(symbol).await?;

        let Some(pivot) = self.detector.detect_mcp(&points)? else {
            tracing::info!("{}: no pivot in {} points, nothing to do", symbol, points.len());
            return Ok(StrategyOutcome::NoPivotFound);
        };

        let current_price = self
            .with_reauth(|token| async move { self.market.get_last_price(&token, symbol).await })
            .await?;

        let recent = self.strategy.recent_window(&points);
        let decision = self
            .strategy
            .decide(&pivot, current_price, recent, investment_amount)?;

        let (Some(side), Some(quantity), Some(price)) = (
            decision.action.side(),
            decision.quantity,
            decision.order_price,
        ) else {
            return Ok(StrategyOutcome::Hold(decision));
        };

        let config = self.strategy.config();
        if config.dry_run {
            tracing::info!("Dry run: would {:?} {} x {} @ {:.2}", side, quantity, symbol, price);
            return Ok(StrategyOutcome::DryRun(decision));
        }

        let order = OrderRequest {
            symbol: symbol.to_string(),
            quantity,
            side,
            order_type: OrderType::Limit,
            price,
            validity: config.validity,
            product: config.product,
            disclosed_quantity: 0,
            trigger_price: 0.0,
            is_amo: false,
        };

        let response = self
            .with_reauth(|token| {
                let order = &order;
                async move { self.orders.place_order(&token, order).await }
            })
            .await?;

        tracing::info!("✅ Order {} accepted ({})", response.order_id, response.status);
        Ok(StrategyOutcome::Placed(decision, response))
    }
}
