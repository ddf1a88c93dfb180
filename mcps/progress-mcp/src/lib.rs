//! Progress MCP Library
//!
//! Exposes the workflow progression engine over MCP.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use progress_mcp::ProgressMcpServer;
//! use progress_core::ProgressConfig;
//!
//! let server = ProgressMcpServer::from_config(&ProgressConfig::load()?)?;
//! // Use with in-memory transport or serve via stdio
//! ```
//!
//! - Durable layer: SQLite table of workflow instances, shared across restarts
//! - Ephemeral layer: single JSON backup file, rewritten on every change
//! - One persistence coordinator per loaded instance

pub mod logging;
pub mod params;
pub mod registry;
pub mod response;
pub mod server;
pub mod slot;
pub mod sqlite;
#[cfg(test)]
pub mod tests;

// Re-export main server type
pub use server::ProgressMcpServer;

// Re-export parameter types for direct API usage
pub use params::*;
