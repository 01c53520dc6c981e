use crate::auth::TokenState;
use crate::persistence::TokenPersistence;
use crate::{Result, TradeError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

/// Redis persistence for the session token pair
///
/// Stores the serialized `TokenState` as a plain string under one key, so
/// several hosts pointed at the same Redis share a single session.
pub struct RedisPersistence {
    conn: ConnectionManager,
    key: String,
}

impl RedisPersistence {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `key` - Key holding the session document
    pub async fn new(redis_url: &str, key: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| TradeError::Timeout(Duration::from_secs(5)))??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl TokenPersistence for RedisPersistence {
    async fn load(&self) -> Result<Option<TokenState>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&self.key).await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, state: &TokenState) -> Result<()> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(state)?;

        conn.set::<_, _, ()>(&self.key, value).await?;

        tracing::debug!("Saved session state to Redis key {}", self.key);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("redis key {}", self.key)
    }
}
