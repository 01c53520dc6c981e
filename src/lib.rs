// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod strategy;

// Re-export commonly used types
pub use auth::{SessionManager, TokenState, TokenStore};
pub use error::TradeError;
pub use models::*;
pub use strategy::{McpStrategy, PivotDetector};

// Error handling
pub type Result<T> = std::result::Result<T, TradeError>;
