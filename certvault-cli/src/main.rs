//! certvault command-line client
//!
//! `register` enrolls a login and saves the issued certificate and key.
//! `shell` opens the encrypted local cache and keeps it in sync with the
//! server in the background.

mod shell;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use certvault_core::{AutoSync, CacheCipher, LocalCache, SyncClient};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::shell::Shell;

#[derive(Parser)]
#[command(name = "certvault", about = "Certificate-identity secret vault client")]
struct Cli {
    /// Server base URL
    #[arg(long, env = "CERTVAULT_URL", default_value = "https://localhost:8443")]
    url: String,

    /// Root certificate the server and client certificates chain to
    #[arg(long, env = "CERTVAULT_CA", default_value = "certs/ca.pem")]
    ca: PathBuf,

    /// Client certificate
    #[arg(long, env = "CERTVAULT_CERT", default_value = "client.pem")]
    cert: PathBuf,

    /// Client private key
    #[arg(long, env = "CERTVAULT_KEY", default_value = "client.key")]
    key: PathBuf,

    /// Encrypted local cache file
    #[arg(long, env = "CERTVAULT_STORAGE", default_value = "storage.json")]
    storage: PathBuf,

    /// Seconds between background syncs, 0 disables them
    #[arg(long, env = "CERTVAULT_SYNC_INTERVAL", default_value_t = 10)]
    sync_interval: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a login and save the issued certificate and key
    Register {
        /// Login to register, becomes the certificate common name
        login: String,
    },

    /// Interactive shell over the local cache
    Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register { ref login } => register(&cli, login).await,
        Commands::Shell => run_shell(&cli).await,
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

async fn register(cli: &Cli, login: &str) -> Result<()> {
    anyhow::ensure!(
        !cli.cert.exists() && !cli.key.exists(),
        "{} or {} already exists",
        cli.cert.display(),
        cli.key.display()
    );

    let ca_pem = read(&cli.ca)?;
    let credential = SyncClient::register(&cli.url, login, &ca_pem)
        .await
        .with_context(|| format!("registering {login}"))?;
    credential.write_pem(&cli.cert, &cli.key)?;

    tracing::info!(login, cert = %cli.cert.display(), "Registered");
    println!(
        "Registered {login}; certificate saved to {} and key to {}",
        cli.cert.display(),
        cli.key.display()
    );
    Ok(())
}

async fn run_shell(cli: &Cli) -> Result<()> {
    let ca_pem = read(&cli.ca)?;
    let cert_pem = read(&cli.cert)?;
    let key_pem = read(&cli.key)?;

    let client = SyncClient::connect(&cli.url, &cert_pem, &key_pem, &ca_pem)
        .context("building sync client")?;
    let cipher = CacheCipher::from_private_key_pem(&key_pem).context("deriving cache key")?;
    let cache = Arc::new(
        LocalCache::open(&cli.storage, cipher)
            .with_context(|| format!("opening {}", cli.storage.display()))?,
    );

    match client.login().await {
        Ok(login) => println!("Logged in as {}", login.user),
        Err(e) => tracing::warn!(error = %e, "Login failed, working from the local cache"),
    }

    let agent = AutoSync::new(Arc::new(client), cache.clone());
    let cancel = CancellationToken::new();
    let background = (cli.sync_interval > 0)
        .then(|| agent.spawn(Duration::from_secs(cli.sync_interval), cancel.clone()));

    let shell = Shell::new(cache, Some(agent));
    let result = shell
        .run(BufReader::new(tokio::io::stdin()), &mut std::io::stdout())
        .await;

    cancel.cancel();
    if let Some(handle) = background {
        handle.await?;
    }
    result
}
