// Pivot detection and the MCP trading decision
pub mod mcp;
pub mod pivot;

pub use mcp::{McpStrategy, McpStrategyConfig};
pub use pivot::{PivotConfig, PivotDetector};
