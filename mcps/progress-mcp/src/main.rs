//! Progress MCP Server - Workflow progression with crash-safe autosave
//!
//! Tools:
//! - list_presets / start_workflow / load_workflow
//! - complete_step / skip_step / navigate_to_step
//! - save_workflow / get_progress / clear_workflow / lifecycle_event

use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use std::path::PathBuf;

use progress_core::ProgressConfig;
use progress_mcp::{logging, LifecycleEvent, ProgressMcpServer};

#[derive(Parser, Debug)]
#[command(name = "progress-mcp")]
#[command(about = "Workflow progression MCP server", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: nearest progress.toml, then ~/.config/binks/progress.toml)
    #[arg(long, env = "PROGRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the SQLite database path
    #[arg(long, env = "PROGRESS_DB")]
    database: Option<PathBuf>,

    /// Override the autosave delay in milliseconds
    #[arg(long)]
    autosave_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_tracing()?;

    let mut config = match &cli.config {
        Some(path) => ProgressConfig::load_from_path(path)?,
        None => ProgressConfig::load()?,
    };
    if let Some(database) = cli.database {
        config.storage.database_path = database;
    }
    if let Some(ms) = cli.autosave_ms {
        config.autosave.delay_ms = ms;
    }

    tracing::info!("Starting Progress MCP Server");

    let server = ProgressMcpServer::from_config(&config)?;
    let handle = server.clone();

    let service = server.serve(stdio()).await?;

    tracing::info!("Server running, waiting for requests...");

    service.waiting().await?;

    // Transport closed: write pending autosaves and wait out running writes
    let flushed = handle.apply_lifecycle(LifecycleEvent::Hide, None).await?;
    tracing::info!(
        sessions = flushed.sessions,
        written = flushed.written,
        "Server shutting down"
    );
    Ok(())
}
