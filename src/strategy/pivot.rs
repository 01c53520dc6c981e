use crate::models::{Pivot, PricePoint};
use crate::{Result, TradeError};
use serde::Deserialize;

/// Most Connected Pivot detection
///
/// Candidates are the points where price crosses the series mean (not local
/// extrema). Each candidate is scored by how many samples sit within
/// `tolerance` (relative) of its price; the best score wins and ties go to
/// the earliest crossover.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PivotConfig {
    /// Relative distance that still counts as a touch (0.001 = 0.1%)
    pub tolerance: f64,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self { tolerance: 0.001 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PivotDetector {
    config: PivotConfig,
}

impl PivotDetector {
    pub fn new(config: PivotConfig) -> Self {
        Self { config }
    }

    pub fn tolerance(&self) -> f64 {
        self.config.tolerance
    }

    /// Return the most connected mean-crossover pivot, or `None` when the
    /// series never crosses its mean.
    pub fn detect_mcp(&self, points: &[PricePoint]) -> Result<Option<Pivot>> {
        if points.is_empty() {
            return Ok(None);
        }

        if let Some(bad) = points.iter().find(|p| !p.price.is_finite() || p.price <= 0.0) {
            return Err(TradeError::InvalidInput(format!(
                "price {} at {} is not a positive number",
                bad.price, bad.timestamp
            )));
        }

        // A one-way trend crosses its mean exactly once; that is not a reversal
        if is_monotonic(points) {
            tracing::debug!("Series of {} points is monotonic, no pivot", points.len());
            return Ok(None);
        }

        let avg = points.iter().map(|p| p.price).sum::<f64>() / points.len() as f64;
        let candidates = crossovers(points, avg);

        let mut best: Option<Pivot> = None;
        for candidate in candidates {
            let connections = self.count_connections(points, candidate.price);

            // Strict comparison keeps the earliest candidate on ties
            if best.map_or(true, |b| connections > b.connections) {
                best = Some(Pivot {
                    timestamp: candidate.timestamp,
                    price: candidate.price,
                    connections,
                });
            }
        }

        if let Some(pivot) = &best {
            tracing::debug!(
                "MCP {:.2} at {} with {} connections (mean {:.2}, {} points)",
                pivot.price,
                pivot.timestamp,
                pivot.connections,
                avg,
                points.len()
            );
        }

        Ok(best)
    }

    fn count_connections(&self, points: &[PricePoint], level: f64) -> usize {
        points
            .iter()
            .filter(|p| (level - p.price).abs() / level <= self.config.tolerance)
            .count()
    }
}

/// Strictly rising or strictly falling. Plateaus go through the crossover walk.
fn is_monotonic(points: &[PricePoint]) -> bool {
    let rising = points.windows(2).all(|w| w[1].price > w[0].price);
    let falling = points.windows(2).all(|w| w[1].price < w[0].price);
    rising || falling
}

/// Points where the above/below-mean state flips. Equality with the mean
/// counts as below.
fn crossovers(points: &[PricePoint], avg: f64) -> Vec<PricePoint> {
    let mut above = points[0].price > avg;
    let mut out = Vec::new();

    for point in &points[1..] {
        let now_above = point.price > avg;
        if now_above != above {
            out.push(*point);
            above = now_above;
        }
    }

    out
}
