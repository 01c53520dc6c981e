use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pivotbot::api::UpstoxClient;
use pivotbot::auth::{SessionManager, TokenStore, UpstoxAuthClient};
use pivotbot::config::{AppConfig, TokenBackend};
use pivotbot::execution::{LoginPrompt, NoLoginPrompt, StdinLoginPrompt, StrategyOutcome, Trader};
use pivotbot::models::{CandleInterval, McpReport};
use pivotbot::persistence::{FilePersistence, MemoryPersistence, RedisPersistence, TokenPersistence};
use pivotbot::strategy::{McpStrategy, PivotDetector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pivotbot", version, about = "Most Connected Pivot trading assistant")]
struct Cli {
    /// Config file (defaults to ./pivotbot.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the URL that starts the broker login
    LoginUrl,
    /// Exchange the code from the login redirect for a session
    Login {
        #[arg(long)]
        code: String,
    },
    /// Forget the stored session
    Logout,
    /// Show whether a usable session is on record
    Status,
    /// Most connected pivot for each symbol, one at a time
    Mcp {
        #[arg(required = true)]
        symbols: Vec<String>,
        /// Save the reports as JSON
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        interval: Option<CandleInterval>,
        /// Days of history
        #[arg(long)]
        days: Option<i64>,
    },
    /// Evaluate the MCP strategy for one symbol and place the order
    Trade {
        symbol: String,
        /// Capital to commit, in account currency
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        dry_run: bool,
        /// Fail instead of asking for a login when the session is gone
        #[arg(long)]
        no_prompt: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let session = Arc::new(build_session(&config).await?);

    match cli.command {
        Command::LoginUrl => {
            println!("{}", session.authorization_url());
        }
        Command::Login { code } => {
            session.complete_login(&code).await?;
            println!("✅ Logged in");
        }
        Command::Logout => {
            session.logout().await?;
            println!("👋 Logged out");
        }
        Command::Status => {
            let valid = session.ensure_valid_token().await;
            let state = session.snapshot().await;
            println!("Authenticated: {}", valid);
            match state.expires_at {
                Some(at) => println!("Token expires: {}", at),
                None => println!("Token expires: -"),
            }
            println!("Refresh token on record: {}", state.refresh_token.is_some());
        }
        Command::Mcp {
            symbols,
            output,
            interval,
            days,
        } => {
            if let Some(interval) = interval {
                config.strategy.interval = interval;
            }
            if let Some(days) = days {
                config.strategy.lookback_days = days;
            }

            let trader = build_trader(&config, session, Arc::new(StdinLoginPrompt))?;
            let reports = trader.batch_mcp(&symbols).await;
            print_reports(&reports);

            if let Some(path) = output {
                save_reports(&path, &reports).await?;
                println!("💾 Saved {} reports to {}", reports.len(), path.display());
            }
        }
        Command::Trade {
            symbol,
            amount,
            dry_run,
            no_prompt,
        } => {
            config.strategy.dry_run |= dry_run;
            let prompt: Arc<dyn LoginPrompt> = if no_prompt {
                Arc::new(NoLoginPrompt)
            } else {
                Arc::new(StdinLoginPrompt)
            };

            let trader = build_trader(&config, session, prompt)?;
            match trader.run_strategy(&symbol, amount).await? {
                StrategyOutcome::NoPivotFound => println!("{}: no pivot found, no signal", symbol),
                StrategyOutcome::Hold(d) => println!(
                    "{}: HOLD (deviation {:.3}%, {} connections)",
                    symbol,
                    d.deviation * 100.0,
                    d.connections
                ),
                StrategyOutcome::DryRun(d) => println!(
                    "{}: would {:?} {} @ {:.2} (dry run)",
                    symbol,
                    d.action,
                    d.quantity.unwrap_or(0),
                    d.order_price.unwrap_or(0.0)
                ),
                StrategyOutcome::Placed(d, order) => println!(
                    "{}: {:?} {} @ {:.2} -> order {} ({})",
                    symbol,
                    d.action,
                    d.quantity.unwrap_or(0),
                    d.order_price.unwrap_or(0.0),
                    order.order_id,
                    order.status
                ),
            }
        }
    }

    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pivotbot=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn build_token_backend(config: &AppConfig) -> Result<Arc<dyn TokenPersistence>> {
    let session = &config.session;
    let backend: Arc<dyn TokenPersistence> = match session.backend {
        TokenBackend::File => Arc::new(FilePersistence::new(&session.token_path)),
        TokenBackend::Memory => Arc::new(MemoryPersistence::new()),
        TokenBackend::Redis => Arc::new(
            RedisPersistence::new(&session.redis_url, &session.redis_key)
                .await
                .context("Failed to connect to Redis token store")?,
        ),
    };

    tracing::debug!("Token store: {}", backend.describe());
    Ok(backend)
}

async fn build_session(config: &AppConfig) -> Result<SessionManager> {
    if config.broker.client_id.is_empty() {
        tracing::warn!("broker.client_id is empty; set PIVOTBOT__BROKER__CLIENT_ID");
    }

    let auth = Arc::new(UpstoxAuthClient::new(&config.broker)?);
    let store = TokenStore::new(build_token_backend(config).await?);

    Ok(SessionManager::new(auth, store, &config.session).await)
}

fn build_trader(
    config: &AppConfig,
    session: Arc<SessionManager>,
    prompt: Arc<dyn LoginPrompt>,
) -> Result<Trader> {
    let client = Arc::new(UpstoxClient::new(&config.broker)?);

    Ok(Trader::new(
        session,
        client.clone(),
        client,
        prompt,
        PivotDetector::new(config.pivot.clone()),
        McpStrategy::new(config.strategy.clone()),
    ))
}

// ============================================================================
// Output
// ============================================================================

fn print_reports(reports: &[McpReport]) {
    println!("\n{:<32} {:>12} {:>12}  {}", "SYMBOL", "MCP", "CONNECTIONS", "AT");
    for report in reports {
        match (&report.pivot, &report.error) {
            (Some(p), _) => println!(
                "{:<32} {:>12.2} {:>12}  {}",
                report.symbol, p.price, p.connections, p.timestamp
            ),
            (None, Some(e)) => println!("{:<32} error: {}", report.symbol, e),
            (None, None) => println!("{:<32} {:>12}", report.symbol, "-"),
        }
    }
}

async fn save_reports(path: &Path, reports: &[McpReport]) -> Result<()> {
    let json = serde_json::to_string_pretty(reports)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
