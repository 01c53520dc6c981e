//! Error taxonomy shared by the session, strategy and brokerage layers.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradeError {
    /// No usable session. The caller has to drive a fresh login.
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// The authorization server or a data/order endpoint answered with an error.
    #[error("Remote rejection ({status:?}): {message}")]
    RemoteRejection { status: Option<u16>, message: String },

    /// The refresh token (or authorization code) was permanently rejected.
    #[error("Grant rejected: {0}")]
    InvalidGrant(String),

    /// Investment amount does not cover a single unit at the current price.
    #[error("Insufficient capital: {amount:.2} does not buy one unit at {price:.2}")]
    InsufficientCapital { amount: f64, price: f64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl TradeError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, TradeError::Unauthenticated(_))
    }

    pub(crate) fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        TradeError::RemoteRejection {
            status,
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for TradeError {
    fn from(e: redis::RedisError) -> Self {
        TradeError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for TradeError {
    fn from(e: std::io::Error) -> Self {
        TradeError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_detection() {
        assert!(TradeError::Unauthenticated("expired".into()).is_unauthenticated());
        assert!(!TradeError::InvalidInput("bad".into()).is_unauthenticated());
    }

    #[test]
    fn test_insufficient_capital_message() {
        let err = TradeError::InsufficientCapital {
            amount: 100.0,
            price: 17870.0,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient capital: 100.00 does not buy one unit at 17870.00"
        );
    }
}
