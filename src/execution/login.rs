use crate::{Result, TradeError};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Source of a fresh authorization code when the session is gone
#[async_trait]
pub trait LoginPrompt: Send + Sync {
    async fn obtain_code(&self, authorization_url: &str) -> Result<String>;
}

/// Prints the login URL and reads the code the user pastes back
pub struct StdinLoginPrompt;

#[async_trait]
impl LoginPrompt for StdinLoginPrompt {
    async fn obtain_code(&self, authorization_url: &str) -> Result<String> {
        eprintln!("\n🔑 Session expired. Open this URL and approve access:\n");
        eprintln!("   {}\n", authorization_url);
        eprintln!("Paste the `code` parameter from the redirect URL:");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

        let code = line.trim();
        if code.is_empty() {
            return Err(TradeError::Unauthenticated("login aborted".to_string()));
        }

        Ok(code.to_string())
    }
}

/// Fails immediately; for unattended runs where nobody can log in
pub struct NoLoginPrompt;

#[async_trait]
impl LoginPrompt for NoLoginPrompt {
    async fn obtain_code(&self, _authorization_url: &str) -> Result<String> {
        Err(TradeError::Unauthenticated(
            "interactive login disabled, run `pivotbot login` first".to_string(),
        ))
    }
}
