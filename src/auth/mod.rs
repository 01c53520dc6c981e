// OAuth2 session lifecycle
pub mod oauth;
pub mod session;
pub mod token_store;

pub use oauth::{AuthorizationServer, TokenGrant, UpstoxAuthClient};
pub use session::SessionManager;
pub use token_store::{TokenState, TokenStore};
