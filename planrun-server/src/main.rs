//! # Planrun Server
//!
//! Starts travel plan runs in the background and keeps pollers and
//! WebSocket subscribers in sync with their progress.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser};
use planrun_server::{
    AppState,
    infra::{
        config::{Config, ConfigLoad, ConfigLoader},
        engine,
    },
    routes,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "planrun-server")]
#[command(about = "Plan run server with polling and realtime progress updates")]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Path to a planrun.toml configuration file
    #[arg(short, long, env = "PLANRUN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Path to a dotenv file loaded instead of `./.env`
    #[arg(long, env = "PLANRUN_ENV_FILE")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_server(cli.serve).await
}

fn load_config(args: &ServeArgs) -> anyhow::Result<(Config, Vec<String>)> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }

    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    let warnings = warnings
        .iter()
        .map(|warning| match &warning.hint {
            Some(hint) => format!("{} ({hint})", warning.message),
            None => warning.message.clone(),
        })
        .collect();

    Ok((config, warnings))
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let (config, warnings) = load_config(&args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,planrun_core=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }
    for warning in &warnings {
        warn!("{warning}");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let runtime = engine::start_runtime(&config);
    let state = AppState::new(Arc::clone(&runtime), Arc::new(config));
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down plan run runtime");
    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
