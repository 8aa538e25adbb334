//! Entry point: parses CLI arguments, loads configuration, starts the
//! process-wide event bus and conflict detector, spawns one worker task per
//! configured agent, and waits for all workers to finish or for a shutdown
//! signal (§1 Process shape).

mod agent;
mod config;
mod conflict;
mod coordination;
mod debugger;
mod error;
mod event_bus;
mod host;
mod llm;
mod memory;
mod patch;
mod queue;
mod tools;
mod types;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent::{AnthropicOAuthRefresher, ConflictEventRouter, Driver, DriverDeps};
use config::{CredentialStore, OAuthCredentials, RuntimeConfig};
use conflict::{ConflictCoordinator, ConflictDetector};
use coordination::CoordinationClient;
use event_bus::EventBus;
use host::FakeHost;
use llm::AnthropicClient;
use memory::MemoryStore;
use patch::PatchManager;
use queue::MessageQueue;
use tools::{register_builtin_tools, ToolRegistry};
use types::AgentId;

/// Multi-agent reverse-engineering orchestrator: agent runtime, conflict
/// coordination, and patch management over a shared binary under analysis.
#[derive(Parser, Debug, Clone)]
#[command(name = "swarm-re")]
#[command(author = "RidgetopAI")]
#[command(version)]
#[command(about = "Multi-agent reverse-engineering orchestrator", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Launch a swarm of agents against a binary under analysis.
    Run {
        /// Identifier of the binary under analysis (passed to tools and the
        /// conflict detector's per-binary ledger).
        #[arg(long)]
        binary_id: String,

        /// The task description handed to every agent as its first message.
        #[arg(long)]
        task: String,

        /// Number of agent workers to spawn.
        #[arg(long, default_value_t = 1)]
        agents: u32,

        /// Join the coordination server instead of running solo.
        #[arg(long, default_value_t = false)]
        coordinate: bool,
    },
    /// Manage the stored Anthropic OAuth credentials.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
enum AuthAction {
    /// Store an access/refresh token pair read from stdin-adjacent flags.
    Set {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
        #[arg(long)]
        expires_at: i64,
    },
    /// Remove any stored credentials.
    Clear,
    /// Report whether credentials are present and whether they look expired.
    Status,
}

impl Cli {
    fn parse_args() -> Self {
        Self::parse()
    }
}

fn log_dir() -> Result<std::path::PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "ridgetopai", "swarm-re")
        .context("could not determine a home directory for log storage")?;
    let dir = proj_dirs.data_dir().join("logs");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Daily-rotating, non-blocking file logger (§4.14). The returned guard must
/// be held for the life of the process or buffered log lines are dropped.
fn init_logging(log_level: &str) -> Result<WorkerGuard> {
    let log_path = log_dir()?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_path, "swarm-re.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(true))
        .init();

    Ok(guard)
}

fn handle_auth_command(action: AuthAction, state_dir: &std::path::Path) -> Result<()> {
    let store = CredentialStore::new(state_dir);
    match action {
        AuthAction::Set { access_token, refresh_token, expires_at } => {
            store
                .store(&OAuthCredentials { access_token, refresh_token, expires_at })
                .context("failed to store credentials")?;
            println!("credentials stored");
        }
        AuthAction::Clear => {
            store.delete().context("failed to clear credentials")?;
            println!("credentials cleared");
        }
        AuthAction::Status => match store.load() {
            Ok(creds) => {
                let now = chrono::Utc::now().timestamp();
                println!(
                    "credentials present, {}",
                    if creds.is_expired(now) { "expired" } else { "valid" }
                );
            }
            Err(_) => println!("no credentials stored"),
        },
    }
    Ok(())
}

/// Builds one agent's dependency bundle, sharing every process-wide
/// collaborator and giving each agent its own id, task queue, and (when
/// coordinating) coordination client.
async fn build_driver_deps(
    index: u32,
    binary_id: &str,
    task: &str,
    config: &RuntimeConfig,
    event_bus: Arc<EventBus>,
    conflict_detector: Arc<ConflictDetector>,
    credentials: Arc<CredentialStore>,
    host: Arc<dyn host::HostAnalysis>,
    memory: Arc<MemoryStore>,
    coordinate: bool,
) -> Result<(DriverDeps, Option<Arc<CoordinationClient>>)> {
    let agent_id = AgentId::new(format!("agent-{index}"));

    let patch_manager = Arc::new(PatchManager::new(host.clone()));
    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools, host, patch_manager, memory.clone());

    let refresher = Arc::new(AnthropicOAuthRefresher::new(credentials.clone()));
    let injected = Arc::new(MessageQueue::new());

    let (conflict_coordinator, conflict_router, coordination_client) = if coordinate {
        let client = Arc::new(CoordinationClient::new(agent_id.as_str()));
        let addr = format!("{}:{}", config.coordination.server_addr, config.coordination.server_port);
        client
            .connect(&addr, task)
            .await
            .with_context(|| format!("agent {agent_id} failed to join the coordination server at {addr}"))?;

        let router = ConflictEventRouter::new();
        if let Some(rx) = client.take_event_rx().await {
            router.spawn(rx, injected.clone());
        }

        let coordinator = Arc::new(ConflictCoordinator::with_timeout(
            client.clone(),
            std::time::Duration::from_secs(config.coordination.consensus_timeout_secs),
        ));

        (Some(coordinator), Some(router), Some(client))
    } else {
        (None, None, None)
    };

    let deps = DriverDeps {
        agent_id,
        binary_id: binary_id.to_string(),
        llm: Arc::new(AnthropicClient::new()),
        credentials,
        refresher,
        tools,
        conflict_detector,
        conflict_coordinator,
        conflict_router,
        event_bus,
        memory,
        injected,
        loop_config: config.loop_.clone(),
        grader_config: config.grader.clone(),
        agent_model: config.agent.clone(),
    };

    Ok((deps, coordination_client))
}

/// Spawns `agents` workers, feeds each an initial `DriverTask::NewTask`, and
/// waits for either every worker to finish or a shutdown signal, tearing
/// workers down in the order specified for graceful shutdown (§5): stop
/// flag, then wait for the worker, then close its coordination client.
async fn run_swarm(binary_id: String, task: String, agents: u32, coordinate: bool, config: RuntimeConfig) -> Result<()> {
    let event_bus = Arc::new(EventBus::new());
    let conflict_detector = Arc::new(ConflictDetector::with_path(config.credentials.state_dir.join("conflicts")));
    let credentials = Arc::new(CredentialStore::new(config.credentials.state_dir.clone()));
    let memory = Arc::new(MemoryStore::new());
    let host: Arc<dyn host::HostAnalysis> = Arc::new(FakeHost::new());

    let mut stop_handles = Vec::new();
    let mut join_handles = Vec::new();
    let mut coordination_clients = Vec::new();

    for index in 0..agents {
        let (deps, coordination_client) = build_driver_deps(
            index,
            &binary_id,
            &task,
            &config,
            event_bus.clone(),
            conflict_detector.clone(),
            credentials.clone(),
            host.clone(),
            memory.clone(),
            coordinate,
        )
        .await?;

        let driver = Arc::new(Driver::new(deps));
        stop_handles.push(driver.stop_handle());
        if let Some(client) = coordination_client {
            coordination_clients.push(client);
        }

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(agent::DriverTask::NewTask(task.clone())).await.ok();
        let worker = driver.clone();
        join_handles.push(tokio::spawn(async move {
            worker.run(rx).await;
        }));
    }

    tokio::select! {
        _ = wait_all(join_handles) => {
            tracing::info!("all agent workers finished");
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping agent workers");
            for stop in &stop_handles {
                stop.store(true, Ordering::SeqCst);
            }
        }
    }

    for client in coordination_clients {
        client.disconnect().await;
    }

    Ok(())
}

async fn wait_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    let mut config = RuntimeConfig::load_or_default();
    config.apply_env_overrides();

    if let Some(Command::Auth { action }) = &cli.command {
        return handle_auth_command(action.clone(), &config.credentials.state_dir);
    }

    let _guard = init_logging(&cli.log_level)?;

    match cli.command {
        Some(Command::Run { binary_id, task, agents, coordinate }) => {
            run_swarm(binary_id, task, agents, coordinate, config).await
        }
        Some(Command::Auth { .. }) => unreachable!("handled before logging init"),
        None => {
            tracing::warn!("no subcommand given; nothing to do (try `swarm-re run --help`)");
            Ok(())
        }
    }
}
