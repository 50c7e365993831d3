//! certvault sync server
//!
//! Stores each user's encrypted secrets and reconciles them with the user's
//! clients over mutual TLS. The server never holds the keys the payloads are
//! encrypted with; a user's identity is the common name of the client
//! certificate the server's root issued at enrollment.

mod auth;
mod cleanup;
mod config;
mod engine;
mod error;
mod handlers;
mod server;
mod storage;
mod store;
mod tls;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use certvault_core::{issue_root, Authority};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "certvault-server", about = "certvault sync server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CERTVAULT_CONFIG", default_value = "certvault.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default)
    Serve,
    /// Generate a root CA and a server certificate signed by it
    InitCa {
        /// Directory to write ca.pem, ca.key, server.pem and server.key into
        #[arg(long, default_value = "certs")]
        out_dir: PathBuf,
        /// Host name the server certificate is issued for
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::InitCa {
            out_dir,
            host,
            force,
        }) => init_ca(&out_dir, &host, force),
        Some(Command::Serve) | None => {
            let mut cfg = if cli.config.exists() {
                config::ServerConfig::load(&cli.config)
                    .with_context(|| format!("loading {}", cli.config.display()))?
            } else {
                tracing::info!("No config file found, using defaults");
                config::ServerConfig::default()
            };

            if let Some(listen) = cli.listen {
                cfg.listen_addr = listen;
            }
            if let Some(database) = cli.database {
                cfg.database_path = database;
            }

            serve(cfg).await
        }
    }
}

fn init_ca(out_dir: &Path, host: &str, force: bool) -> anyhow::Result<()> {
    let ca_cert = out_dir.join("ca.pem");
    let ca_key = out_dir.join("ca.key");
    let server_cert = out_dir.join("server.pem");
    let server_key = out_dir.join("server.key");

    if !force {
        for path in [&ca_cert, &ca_key, &server_cert, &server_key] {
            anyhow::ensure!(
                !path.exists(),
                "{} already exists, pass --force to overwrite",
                path.display()
            );
        }
    }

    let root = issue_root()?;
    root.write_pem(&ca_cert, &ca_key)?;

    let authority = Authority::from_pem(&root.cert_pem, &root.key_pem)?;
    authority
        .issue_server_leaf(host)?
        .write_pem(&server_cert, &server_key)?;

    tracing::info!(dir = %out_dir.display(), host, "Wrote root and server certificates");
    Ok(())
}

async fn serve(cfg: config::ServerConfig) -> anyhow::Result<()> {
    let authority = Authority::load(&cfg.ca_cert_path, &cfg.ca_key_path)
        .context("loading root certificate")?;
    let tls = tls::load(&cfg)?;

    let storage =
        storage::ServerStorage::with_connections(&cfg.database_path, cfg.database_connections)
            .with_context(|| format!("opening {}", cfg.database_path.display()))?;

    let shutdown = CancellationToken::new();
    let janitor = cleanup::Janitor::new(Arc::new(storage.clone()), cfg.tombstone_retention())
        .spawn(cfg.janitor_interval(), shutdown.clone());

    let state = server::AppState::new(storage, authority);
    let app = server::build_router(state, &cfg);

    tracing::info!("Starting certvault server on {}", cfg.listen_addr);
    let server = server::Server::bind(&cfg.listen_addr, tls, app).await?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    let result = server.run(shutdown.clone()).await;
    shutdown.cancel();
    janitor.await?;
    result
}
