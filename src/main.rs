//! Concierge CLI entry point.
//!
//! Provides `start`, `migrate`, and `create-agent` subcommands for running
//! the HTTP service, preparing the database, or issuing dashboard tokens.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use concierge::api::{self, AppState};
use concierge::config::Config;
use concierge::logging;
use concierge::store::{AdminRole, Store};

/// Interval between sweeps of expired cache entries.
const CACHE_PURGE_INTERVAL_SECS: u64 = 60;

/// Concierge: WhatsApp and web customer-support assistant.
#[derive(Parser)]
#[command(name = "concierge", version, about)]
struct Cli {
    /// Path to the config file (defaults to `$CONCIERGE_CONFIG` or
    /// `concierge.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service.
    Start,
    /// Create or update the database schema and exit.
    Migrate,
    /// Create a dashboard account and print its API token once.
    CreateAgent {
        /// Display name.
        #[arg(long)]
        name: String,
        /// Login email, unique per account.
        #[arg(long)]
        email: String,
        /// Account role.
        #[arg(long, value_enum, default_value_t = RoleArg::Agent)]
        role: RoleArg,
    },
}

/// Role accepted on the command line.
#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    /// Full access, including catalogue changes.
    Admin,
    /// Handles conversations and orders.
    Agent,
}

impl From<RoleArg> for AdminRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Admin => Self::Admin,
            RoleArg::Agent => Self::Agent,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Start => handle_start(config_path).await,
        Command::Migrate => handle_migrate(config_path).await,
        Command::CreateAgent { name, email, role } => {
            handle_create_agent(config_path, &name, &email, role.into()).await
        }
    }
}

/// Run the HTTP service until Ctrl-C.
async fn handle_start(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load configuration")?;
    let _logging_guard = logging::init_production(&config.logging.dir)?;
    let secrets = config.resolve_secrets(|key| std::env::var(key).ok());
    debug!(?secrets, "secrets resolved");

    let store = Store::open(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;

    let state = AppState::from_config(&config, &secrets, store.clone());
    let cache = Arc::clone(state.chat.cache());
    let purge_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CACHE_PURGE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                debug!(removed, "purged expired cache entries");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(
        bind = %config.server.bind,
        business = %config.business.name,
        version = env!("CARGO_PKG_VERSION"),
        "concierge started"
    );

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    purge_task.abort();
    store.close().await;
    info!("concierge stopped");
    Ok(())
}

/// Apply the schema and exit.
async fn handle_migrate(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    logging::init_cli();
    let config = Config::load(config_path).context("failed to load configuration")?;
    let store = Store::open(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    store.close().await;
    println!("Database at {} is up to date.", config.database.url);
    Ok(())
}

/// Create a dashboard account and print its token.
async fn handle_create_agent(
    config_path: Option<&std::path::Path>,
    name: &str,
    email: &str,
    role: AdminRole,
) -> anyhow::Result<()> {
    logging::init_cli();
    let config = Config::load(config_path).context("failed to load configuration")?;
    let store = Store::open(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    let (agent, token) = store
        .create_admin(name, email, role)
        .await
        .context("failed to create agent")?;
    store.close().await;

    println!("Created {} {} <{}>", agent.role.as_str(), agent.name, agent.email);
    println!("API token (shown once, store it safely):");
    println!("{token}");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
