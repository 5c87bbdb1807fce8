// sphere-server main.rs
// HTTP ingestion/query service plus store check and export subcommands

use anyhow::Context;
use clap::{Parser, Subcommand};
use sphere_core::EventStore;
use sphere_server::export::write_export;
use sphere_server::{build_router, AppState, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "sphere-server")]
#[command(about = "Authenticated telemetry ingestion and query service")]
struct Args {
    /// SQLite database path (overrides SPHERE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve {
        /// Listen port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the stored event count and the most recent event
    Check,
    /// Write every stored event, newest first, to a JSON file
    Export {
        #[arg(long, default_value = "exports/run_recent.json")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env();
    if let Some(db) = args.db {
        config.db_path = db;
    }

    match args.command.unwrap_or(Command::Serve { port: None }) {
        Command::Check => check(&config),
        Command::Export { out } => export(&config, &out),
        Command::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let _guard = sphere_server::logging::init_logging(&config.log_dir);

    let store = Arc::new(
        EventStore::open(&config.db_path)
            .with_context(|| format!("opening event store {}", config.db_path.display()))?,
    );

    if config.api_key.is_empty() {
        tracing::warn!("SPHERE_API_KEY is not set; every protected request will be rejected");
    }

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(
        addr = %addr,
        db = %config.db_path.display(),
        recent_max = config.recent_max,
        "starting sphere-server"
    );

    let app = build_router(AppState::new(store.clone(), config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Ok(store) = Arc::try_unwrap(store) {
        store.close()?;
    }
    Ok(())
}

fn check(config: &ServerConfig) -> anyhow::Result<()> {
    let store = EventStore::open(&config.db_path)
        .with_context(|| format!("opening event store {}", config.db_path.display()))?;

    println!("Total events: {}", store.count()?);
    match store.recent(1)?.into_iter().next() {
        Some(latest) => println!("Latest event:\n{}", serde_json::to_string_pretty(&latest)?),
        None => println!("Latest event: none"),
    }

    store.close()?;
    Ok(())
}

fn export(config: &ServerConfig, out: &Path) -> anyhow::Result<()> {
    let store = EventStore::open(&config.db_path)
        .with_context(|| format!("opening event store {}", config.db_path.display()))?;
    let count = write_export(&store, out)?;
    store.close()?;

    println!("Exported {count} events to {}", out.display());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
