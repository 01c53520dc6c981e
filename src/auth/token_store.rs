use crate::auth::oauth::TokenGrant;
use crate::persistence::TokenPersistence;
use crate::{Result, TradeError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Access/refresh token pair plus expiry
///
/// `authenticated` is true only while an access token is held and its expiry
/// was in the future at the last check.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub authenticated: bool,
}

impl TokenState {
    /// Build a fresh state from a grant. `previous_refresh` is kept when the
    /// server does not rotate the refresh token. A non-positive or
    /// unrepresentable `expires_in` is rejected.
    pub fn from_grant(
        grant: TokenGrant,
        previous_refresh: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let expires_at = Some(grant.expires_in)
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                TradeError::remote(
                    None,
                    format!("token grant has invalid expires_in={}", grant.expires_in),
                )
            })?;

        Ok(Self {
            access_token: Some(grant.access_token),
            refresh_token: grant.refresh_token.or(previous_refresh),
            expires_at: Some(expires_at),
            authenticated: true,
        })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_some() && self.expires_at.is_some_and(|at| at > now)
    }
}

// Tokens are secrets; keep them out of logs
impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Durable mirror of the session state
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn TokenPersistence>,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn TokenPersistence>) -> Self {
        Self { backend }
    }

    /// Load the stored state. Missing or unreadable state starts empty.
    pub async fn load(&self) -> TokenState {
        match self.backend.load().await {
            Ok(Some(mut state)) => {
                state.authenticated = state.is_valid_at(Utc::now());
                tracing::info!(
                    "Restored session from {} (authenticated: {})",
                    self.backend.describe(),
                    state.authenticated
                );
                state
            }
            Ok(None) => {
                tracing::info!("No stored session in {}", self.backend.describe());
                TokenState::default()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load session from {} ({}), starting unauthenticated",
                    self.backend.describe(),
                    e
                );
                TokenState::default()
            }
        }
    }

    pub async fn save(&self, state: &TokenState) -> Result<()> {
        self.backend.save(state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    #[test]
    fn test_from_grant_sets_expiry() {
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "a".to_string(),
            refresh_token: Some("r".to_string()),
            expires_in: 3600,
        };

        let state = TokenState::from_grant(grant, None, now).unwrap();
        assert_eq!(state.expires_at, Some(now + Duration::seconds(3600)));
        assert_eq!(state.refresh_token.as_deref(), Some("r"));
        assert!(state.authenticated);
        assert!(state.is_valid_at(now));
    }

    #[test]
    fn test_from_grant_keeps_previous_refresh_token() {
        let grant = TokenGrant {
            access_token: "a2".to_string(),
            refresh_token: None,
            expires_in: 60,
        };

        let state = TokenState::from_grant(grant, Some("old".to_string()), Utc::now()).unwrap();
        assert_eq!(state.refresh_token.as_deref(), Some("old"));
    }

    fn grant_with_lifetime(expires_in: i64) -> TokenGrant {
        TokenGrant {
            access_token: "a".to_string(),
            refresh_token: Some("r".to_string()),
            expires_in,
        }
    }

    #[test]
    fn test_from_grant_rejects_out_of_range_lifetime() {
        let err = TokenState::from_grant(grant_with_lifetime(i64::MAX), None, Utc::now()).unwrap_err();
        assert!(matches!(err, TradeError::RemoteRejection { status: None, .. }));

        // Fits in a TimeDelta but lands past the last representable date
        let err = TokenState::from_grant(
            grant_with_lifetime(1_000_000_000_000_000),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, TradeError::RemoteRejection { .. }));
    }

    #[test]
    fn test_from_grant_rejects_non_positive_lifetime() {
        for expires_in in [0, -60] {
            let err = TokenState::from_grant(grant_with_lifetime(expires_in), None, Utc::now())
                .unwrap_err();
            assert!(matches!(err, TradeError::RemoteRejection { .. }));
        }
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let state = TokenState {
            access_token: Some("super-secret".to_string()),
            refresh_token: Some("also-secret".to_string()),
            expires_at: None,
            authenticated: false,
        };

        let printed = format!("{:?}", state);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_load_recomputes_authenticated_flag() {
        let expired = TokenState {
            access_token: Some("a".to_string()),
            refresh_token: Some("r".to_string()),
            expires_at: Some(Utc::now() - Duration::minutes(1)),
            authenticated: true,
        };
        let store = TokenStore::new(Arc::new(MemoryPersistence::with_state(expired)));

        let loaded = store.load().await;
        assert!(!loaded.authenticated);
        assert_eq!(loaded.refresh_token.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_load_empty_backend() {
        let store = TokenStore::new(Arc::new(MemoryPersistence::new()));
        assert_eq!(store.load().await, TokenState::default());
    }
}
