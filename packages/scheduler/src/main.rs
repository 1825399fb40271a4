// packages/scheduler/src/main.rs
//! Sentra Lab Multi-Agent Scheduler
//!
//! Loads configuration, registers the configured agents and keeps the
//! engine alive until Ctrl-C.

use anyhow::{Context, Result};
use sentra_lab_scheduler::observability::{describe_metrics, init_tracing};
use sentra_lab_scheduler::scheduler::AgentDescriptor;
use sentra_lab_scheduler::utils::config::EngineConfig;
use sentra_lab_scheduler::{BuildInfo, Engine};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first: it decides the log level and format
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_path(&path).with_context(|| format!("loading {}", path))?,
        None => EngineConfig::load().context("loading configuration")?,
    };

    init_tracing(&config.logging);
    describe_metrics();

    let build = BuildInfo::current();
    info!(
        "Starting Sentra Lab Scheduler v{} ({}, built {} with {})",
        build.version, build.git_hash, build.build_timestamp, build.rustc_version
    );
    info!("Configuration loaded: {:?}", config);

    let agents = config.agents.clone();
    let engine = Engine::new(config)?;

    for spec in agents {
        let id = spec.id.clone();
        if let Err(e) = engine.register_agent(AgentDescriptor::from(spec)) {
            error!("Failed to register agent {}: {}", id, e);
        }
    }
    info!("{} agent(s) registered", engine.router().agents().len());

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("Received shutdown signal, cleaning up...");

    engine.shutdown().await;

    let stats = engine.events().stats();
    info!(
        "Scheduler stopped ({} events published, {} dropped)",
        stats.push_count, stats.drop_count
    );
    Ok(())
}
