use aqe_fleet_core::{
    agent_shell::AgentShell,
    api::ApiServer,
    config::Config,
    coordinator::{AgentRegistry, Coordinator},
    dispatcher::TaskDispatcher,
    event_bus::EventBus,
    lifecycle::LifecycleManager,
    memory::InMemoryStore,
    models::{AgentIdentity, AgentKind, Capability},
    pattern_store::PatternStore,
};
use anyhow::Result;
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, Level};

const AGENT_ID: &str = "fleet-core-0";

/// Thin CLI wrapper around the fleet core library: the surface for running
/// it as a standalone service, not a feature surface of its own.
#[derive(Parser, Debug)]
#[command(name = "aqe-fleetd", version, about = "Agentic quality-engineering fleet core")]
struct Cli {
    /// Path to a `.env`-style config file, loaded before environment variables.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Overrides `FLEET_API_HOST`.
    #[arg(long)]
    host: Option<String>,

    /// Overrides `FLEET_API_PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// Tracing max level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    info!("starting aqe-fleet-core");

    if let Some(path) = &cli.config {
        dotenvy::from_path(path).map_err(|e| anyhow::anyhow!("failed to load {path:?}: {e}"))?;
    }

    let mut config = Config::load()?;
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }

    let memory = Arc::new(InMemoryStore::new());
    let event_bus = Arc::new(EventBus::new(config.event_bus.clone()).with_memory(memory.clone()));
    let pattern_store = Arc::new(PatternStore::new(config.pattern_store.clone()));

    let identity = AgentIdentity {
        id: AGENT_ID.to_string(),
        kind: AgentKind::from("qe-fleet"),
        capabilities: vec![
            Capability::new("generate_tests", "1.0"),
            Capability::new("security_scan", "1.0"),
            Capability::new("enforce_security_gate", "1.0"),
        ],
    };
    let lifecycle = Arc::new(LifecycleManager::new(identity, memory.clone()));
    let dispatcher = Arc::new(
        TaskDispatcher::new(config.dispatcher.clone(), AGENT_ID).with_event_bus(event_bus.clone()),
    );

    let registry = Arc::new(AgentRegistry::new());
    let mailboxes = Arc::new(RwLock::new(HashMap::new()));
    let coordinator = Arc::new(Coordinator::new(
        AGENT_ID,
        event_bus.clone(),
        memory.clone(),
        registry,
        mailboxes,
    ));

    let shell = Arc::new(AgentShell::new(
        lifecycle.clone(),
        dispatcher.clone(),
        coordinator,
        pattern_store,
        memory,
    ));
    shell.register_default_handlers().await;

    lifecycle.initialize(|| async { Ok(()) }).await?;

    let api_server = ApiServer::new(config, shell.clone());

    let dispatch_shell = shell.clone();
    let dispatch_loop = tokio::spawn(async move {
        loop {
            if let Err(e) = dispatch_shell.run_until_drained().await {
                error!(error = %e, "dispatch loop error");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "API server failed");
            }
        }
        result = dispatch_loop => {
            if let Err(e) = result {
                error!(error = %e, "dispatch loop task panicked");
            }
        }
    }

    Ok(())
}
