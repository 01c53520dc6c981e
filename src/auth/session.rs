use crate::auth::oauth::AuthorizationServer;
use crate::auth::token_store::{TokenState, TokenStore};
use crate::config::{SessionConfig, DEFAULT_REFRESH_MARGIN_SECS};
use crate::{Result, TradeError};
use chrono::{Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Owner of the single brokerage session
///
/// The state mutex is held for the whole check-and-refresh, so callers that
/// find the token near expiry at the same moment share one refresh: the
/// first does the exchange, the rest wait and then take the fast path.
pub struct SessionManager {
    auth: Arc<dyn AuthorizationServer>,
    store: TokenStore,
    state: Mutex<TokenState>,
    refresh_margin: ChronoDuration,
    refresh_timeout: Duration,
}

impl SessionManager {
    /// Create a manager, restoring whatever the store holds
    pub async fn new(
        auth: Arc<dyn AuthorizationServer>,
        store: TokenStore,
        config: &SessionConfig,
    ) -> Self {
        let state = store.load().await;

        Self {
            auth,
            store,
            state: Mutex::new(state),
            refresh_margin: ChronoDuration::try_seconds(config.refresh_margin_secs)
                .unwrap_or_else(|| ChronoDuration::seconds(DEFAULT_REFRESH_MARGIN_SECS)),
            refresh_timeout: Duration::from_secs(config.refresh_timeout_secs),
        }
    }

    pub fn authorization_url(&self) -> String {
        self.auth.authorization_url()
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> TokenState {
        self.state.lock().await.clone()
    }

    /// True when a usable access token is held, refreshing it first if it
    /// expires within the margin. False means an interactive login is needed.
    pub async fn ensure_valid_token(&self) -> bool {
        let mut state = self.state.lock().await;
        self.check_and_refresh(&mut state).await
    }

    async fn check_and_refresh(&self, state: &mut TokenState) -> bool {
        let Some(refresh_token) = state.refresh_token.clone() else {
            tracing::debug!("No refresh token on record, login required");
            return false;
        };

        let now = Utc::now();
        let remaining = state
            .expires_at
            .map(|at| at - now)
            .unwrap_or_else(ChronoDuration::zero);

        if remaining > self.refresh_margin && state.access_token.is_some() {
            state.authenticated = true;
            return true;
        }

        tracing::info!(
            "Access token expires in {}s, refreshing",
            remaining.num_seconds()
        );

        let attempt = timeout(self.refresh_timeout, self.auth.refresh(&refresh_token)).await;
        let refreshed = match attempt {
            Ok(result) => result
                .and_then(|grant| TokenState::from_grant(grant, Some(refresh_token), Utc::now())),
            Err(_) => Err(TradeError::Timeout(self.refresh_timeout)),
        };

        match refreshed {
            Ok(fresh) => {
                if let Err(e) = self.store.save(&fresh).await {
                    tracing::error!("Token refreshed but could not be persisted: {}", e);
                }
                *state = fresh;
                tracing::info!("✓ Access token refreshed");
                true
            }
            Err(TradeError::InvalidGrant(reason)) => {
                tracing::warn!("Refresh token rejected ({}), clearing session", reason);
                *state = TokenState::default();
                if let Err(e) = self.store.save(state).await {
                    tracing::error!("Failed to persist cleared session: {}", e);
                }
                false
            }
            Err(e) => {
                // Tokens stay for the next attempt; the flag follows the expiry just seen
                state.authenticated = state.is_valid_at(now);
                tracing::warn!("Token refresh failed, keeping current tokens: {}", e);
                false
            }
        }
    }

    /// Run `op` with a valid access token, or fail with `Unauthenticated`
    /// without running it.
    pub async fn require_auth<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let access_token = {
            let mut state = self.state.lock().await;
            if !self.check_and_refresh(&mut state).await {
                return Err(TradeError::Unauthenticated(
                    "no valid session, login required".to_string(),
                ));
            }
            state.access_token.clone().ok_or_else(|| {
                TradeError::Unauthenticated("session has no access token".to_string())
            })?
        };

        op(access_token).await
    }

    /// Exchange a one-time authorization code for the initial token pair
    pub async fn complete_login(&self, code: &str) -> Result<()> {
        let grant = timeout(self.refresh_timeout, self.auth.exchange_code(code))
            .await
            .map_err(|_| TradeError::Timeout(self.refresh_timeout))??;

        let fresh = TokenState::from_grant(grant, None, Utc::now())?;

        let mut state = self.state.lock().await;
        *state = fresh;
        tracing::info!("✓ Logged in, token valid until {:?}", state.expires_at);

        self.store.save(&state).await
    }

    /// Drop every token and persist the empty state
    pub async fn logout(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = TokenState::default();
        tracing::info!("Logged out");

        self.store.save(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth::TokenGrant;
    use crate::persistence::{MemoryPersistence, TokenPersistence};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum RefreshBehavior {
        Succeed,
        Fail,
        InvalidGrant,
        Hang,
        BogusLifetime,
    }

    struct MockAuth {
        behavior: RefreshBehavior,
        refresh_calls: AtomicUsize,
        exchange_calls: AtomicUsize,
    }

    impl MockAuth {
        fn new(behavior: RefreshBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                refresh_calls: AtomicUsize::new(0),
                exchange_calls: AtomicUsize::new(0),
            })
        }

        fn refreshes(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthorizationServer for MockAuth {
        fn authorization_url(&self) -> String {
            "https://auth.example/dialog".to_string()
        }

        async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            if code == "bad" {
                return Err(TradeError::InvalidGrant("code used".to_string()));
            }
            Ok(TokenGrant {
                access_token: format!("access-{}", code),
                refresh_token: Some(format!("refresh-{}", code)),
                expires_in: if code == "forever" { i64::MAX } else { 3600 },
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant> {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behavior {
                RefreshBehavior::Succeed => {
                    // Give concurrent callers a chance to pile up
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(TokenGrant {
                        access_token: format!("access-r{}", n),
                        refresh_token: Some(format!("refresh-r{}", n)),
                        expires_in: 3600,
                    })
                }
                RefreshBehavior::Fail => Err(TradeError::remote(Some(503), "unavailable")),
                RefreshBehavior::InvalidGrant => {
                    Err(TradeError::InvalidGrant("revoked".to_string()))
                }
                RefreshBehavior::BogusLifetime => Ok(TokenGrant {
                    access_token: "access-bogus".to_string(),
                    refresh_token: None,
                    expires_in: -1,
                }),
                RefreshBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(TradeError::remote(None, "unreachable"))
                }
            }
        }
    }

    fn state_expiring_in(minutes: i64) -> TokenState {
        TokenState {
            access_token: Some("access-0".to_string()),
            refresh_token: Some("refresh-0".to_string()),
            expires_at: Some(Utc::now() + ChronoDuration::minutes(minutes)),
            authenticated: true,
        }
    }

    async fn manager(
        auth: Arc<MockAuth>,
        initial: Option<TokenState>,
    ) -> (SessionManager, MemoryPersistence) {
        let backend = match initial {
            Some(state) => MemoryPersistence::with_state(state),
            None => MemoryPersistence::new(),
        };
        let config = SessionConfig {
            refresh_timeout_secs: 1,
            ..SessionConfig::default()
        };
        let session =
            SessionManager::new(auth, TokenStore::new(Arc::new(backend.clone())), &config).await;
        (session, backend)
    }

    #[tokio::test]
    async fn test_no_refresh_token_returns_false() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let (session, _) = manager(auth.clone(), None).await;

        assert!(!session.ensure_valid_token().await);
        assert_eq!(auth.refreshes(), 0);
    }

    #[tokio::test]
    async fn test_fresh_token_takes_fast_path() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let (session, _) = manager(auth.clone(), Some(state_expiring_in(60))).await;

        assert!(session.ensure_valid_token().await);
        assert!(session.ensure_valid_token().await);
        assert_eq!(auth.refreshes(), 0);
    }

    #[tokio::test]
    async fn test_near_expiry_refreshes_and_persists() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let (session, backend) = manager(auth.clone(), Some(state_expiring_in(2))).await;

        assert!(session.ensure_valid_token().await);
        assert_eq!(auth.refreshes(), 1);

        let state = session.snapshot().await;
        assert_eq!(state.access_token.as_deref(), Some("access-r1"));
        assert_eq!(state.refresh_token.as_deref(), Some("refresh-r1"));
        assert!(state.authenticated);
        assert_eq!(backend.load().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_state() {
        let auth = MockAuth::new(RefreshBehavior::Fail);
        let before = state_expiring_in(2);
        let (session, backend) = manager(auth.clone(), Some(before.clone())).await;

        assert!(!session.ensure_valid_token().await);

        let after = session.snapshot().await;
        assert_eq!(after.access_token, before.access_token);
        assert_eq!(after.refresh_token, before.refresh_token);
        assert_eq!(after.expires_at, before.expires_at);
        assert_eq!(backend.load().await.unwrap().unwrap().refresh_token, before.refresh_token);

        // Next check retries
        assert!(!session.ensure_valid_token().await);
        assert_eq!(auth.refreshes(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_of_expired_token_clears_flag() {
        let auth = MockAuth::new(RefreshBehavior::Fail);
        // Flag left over from an earlier check that saw the token still valid
        let expired = state_expiring_in(-5);
        let (session, _) = manager(auth, None).await;
        *session.state.lock().await = expired.clone();

        assert!(!session.ensure_valid_token().await);

        let after = session.snapshot().await;
        assert!(!after.authenticated);
        assert_eq!(after.access_token, expired.access_token);
        assert_eq!(after.refresh_token, expired.refresh_token);
        assert_eq!(after.expires_at, expired.expires_at);
    }

    #[tokio::test]
    async fn test_failed_refresh_of_live_token_stays_authenticated() {
        let auth = MockAuth::new(RefreshBehavior::Fail);
        let (session, _) = manager(auth, Some(state_expiring_in(2))).await;

        assert!(!session.ensure_valid_token().await);
        assert!(session.snapshot().await.authenticated);
    }

    #[tokio::test]
    async fn test_login_with_bogus_lifetime_is_rejected() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let (session, backend) = manager(auth, None).await;

        let err = session.complete_login("forever").await.unwrap_err();
        assert!(matches!(err, TradeError::RemoteRejection { .. }));
        assert_eq!(session.snapshot().await, TokenState::default());
        assert_eq!(backend.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_with_bogus_lifetime_keeps_state() {
        let auth = MockAuth::new(RefreshBehavior::BogusLifetime);
        let before = state_expiring_in(2);
        let (session, _) = manager(auth, Some(before.clone())).await;

        assert!(!session.ensure_valid_token().await);
        let after = session.snapshot().await;
        assert_eq!(after.access_token, before.access_token);
        assert_eq!(after.expires_at, before.expires_at);
    }

    #[tokio::test]
    async fn test_refresh_timeout_keeps_state() {
        let auth = MockAuth::new(RefreshBehavior::Hang);
        let before = state_expiring_in(1);
        let (session, _) = manager(auth, Some(before.clone())).await;

        assert!(!session.ensure_valid_token().await);
        assert_eq!(session.snapshot().await.access_token, before.access_token);
    }

    #[tokio::test]
    async fn test_invalid_grant_clears_session() {
        let auth = MockAuth::new(RefreshBehavior::InvalidGrant);
        let (session, backend) = manager(auth.clone(), Some(state_expiring_in(1))).await;

        assert!(!session.ensure_valid_token().await);
        assert_eq!(session.snapshot().await, TokenState::default());
        assert_eq!(backend.load().await.unwrap(), Some(TokenState::default()));

        // No further network calls until a new login
        assert!(!session.ensure_valid_token().await);
        assert_eq!(auth.refreshes(), 1);

        session.complete_login("again").await.unwrap();
        assert!(session.ensure_valid_token().await);
    }

    #[tokio::test]
    async fn test_concurrent_checks_share_one_refresh() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let (session, _) = manager(auth.clone(), Some(state_expiring_in(1))).await;

        let (a, b, c) = tokio::join!(
            session.ensure_valid_token(),
            session.ensure_valid_token(),
            session.ensure_valid_token()
        );

        assert!(a && b && c);
        assert_eq!(auth.refreshes(), 1);
    }

    #[tokio::test]
    async fn test_require_auth_passes_token() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let (session, _) = manager(auth, Some(state_expiring_in(60))).await;

        let seen = session
            .require_auth(|token| async move { Ok(token) })
            .await
            .unwrap();
        assert_eq!(seen, "access-0");
    }

    #[tokio::test]
    async fn test_require_auth_blocks_without_session() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let (session, _) = manager(auth, None).await;
        let ran = AtomicUsize::new(0);

        let result: Result<()> = session
            .require_auth(|_| async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(TradeError::Unauthenticated(_))));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_then_logout() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let (session, backend) = manager(auth.clone(), None).await;

        session.complete_login("abc").await.unwrap();
        let state = session.snapshot().await;
        assert!(state.authenticated);
        assert_eq!(state.access_token.as_deref(), Some("access-abc"));
        assert_eq!(backend.load().await.unwrap(), Some(state));
        assert!(session.ensure_valid_token().await);

        session.logout().await.unwrap();
        assert_eq!(session.snapshot().await, TokenState::default());
        assert_eq!(backend.load().await.unwrap(), Some(TokenState::default()));
        assert!(!session.ensure_valid_token().await);
        assert_eq!(auth.refreshes(), 0);
    }

    #[tokio::test]
    async fn test_failed_login_leaves_state_alone() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let (session, _) = manager(auth, None).await;

        assert!(session.complete_login("bad").await.is_err());
        assert_eq!(session.snapshot().await, TokenState::default());
    }

    #[tokio::test]
    async fn test_restart_restores_session() {
        let auth = MockAuth::new(RefreshBehavior::Succeed);
        let backend = MemoryPersistence::new();
        let config = SessionConfig::default();

        let first = SessionManager::new(
            auth.clone(),
            TokenStore::new(Arc::new(backend.clone())),
            &config,
        )
        .await;
        first.complete_login("persisted").await.unwrap();
        drop(first);

        let second =
            SessionManager::new(auth.clone(), TokenStore::new(Arc::new(backend)), &config).await;
        assert!(second.ensure_valid_token().await);
        assert_eq!(
            second.snapshot().await.access_token.as_deref(),
            Some("access-persisted")
        );
        assert_eq!(auth.refreshes(), 0);
    }
}
