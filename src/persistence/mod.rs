//! Durable backends for the session token pair.
//!
//! The session manager only sees [`TokenPersistence`]; any backend that can
//! load and save one JSON document works.

pub mod redis_store;

use crate::auth::TokenState;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub use redis_store::RedisPersistence;

#[async_trait]
pub trait TokenPersistence: Send + Sync {
    /// Previously saved state, or `None` if nothing was ever stored
    async fn load(&self) -> Result<Option<TokenState>>;

    async fn save(&self, state: &TokenState) -> Result<()>;

    /// Short label for log lines
    fn describe(&self) -> String;
}

/// JSON file on local disk
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenPersistence for FilePersistence {
    async fn load(&self) -> Result<Option<TokenState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: TokenState = serde_json::from_str(&raw)?;
        Ok(Some(state))
    }

    async fn save(&self, state: &TokenState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;

        // Write beside the target then rename so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await?;
        // mode() only applies on create; a leftover tmp file keeps its old bits
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!("Saved session state to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Process-local store, lost on exit. Clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    slot: Arc<Mutex<Option<TokenState>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: TokenState) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(state))),
        }
    }
}

#[async_trait]
impl TokenPersistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<TokenState>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, state: &TokenState) -> Result<()> {
        *self.slot.lock().await = Some(state.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
