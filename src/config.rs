//! Layered configuration: defaults, optional `pivotbot.toml`, then `PIVOTBOT__*`
//! environment variables (e.g. `PIVOTBOT__BROKER__CLIENT_ID`).

use crate::strategy::mcp::McpStrategyConfig;
use crate::strategy::pivot::PivotConfig;
use crate::Result;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://api.upstox.com/v2";
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub session: SessionConfig,
    pub pivot: PivotConfig,
    pub strategy: McpStrategyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub base_url: String,
    /// Applies to every brokerage HTTP call
    pub request_timeout_secs: u64,
    pub requests_per_second: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:8080/callback".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
            requests_per_second: 5,
        }
    }
}

/// Where the token pair is mirrored between runs
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    File,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub backend: TokenBackend,
    pub token_path: PathBuf,
    pub redis_url: String,
    pub redis_key: String,
    /// Tokens expiring within this window are refreshed eagerly
    pub refresh_margin_secs: i64,
    pub refresh_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: TokenBackend::File,
            token_path: PathBuf::from("tokens.json"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_key: "pivotbot:session".to_string(),
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            refresh_timeout_secs: 15,
        }
    }
}

impl AppConfig {
    /// Load configuration. An explicit `path` must exist; the default
    /// `pivotbot.toml` in the working directory is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = Config::builder();
        let builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("pivotbot").required(false)),
        };

        Self::from_builder(
            builder.add_source(
                Environment::with_prefix("PIVOTBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            ),
        )
    }

    fn from_builder(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: AppConfig = builder.build()?.try_deserialize()?;

        let margin = config.session.refresh_margin_secs;
        if margin < 0 || chrono::Duration::try_seconds(margin).is_none() {
            return Err(crate::TradeError::InvalidInput(format!(
                "session.refresh_margin_secs out of range: {}",
                margin
            )));
        }

        if config.strategy.recent_window == 0 {
            return Err(crate::TradeError::InvalidInput(
                "strategy.recent_window must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}
