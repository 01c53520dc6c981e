// Authenticated orchestration of data fetch, decision and order placement
pub mod login;
pub mod trader;

pub use login::{LoginPrompt, NoLoginPrompt, StdinLoginPrompt};
pub use trader::{StrategyOutcome, Trader};
