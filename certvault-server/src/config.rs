//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub database_path: PathBuf,
    pub database_connections: usize,
    pub ca_cert_path: PathBuf,
    pub ca_key_path: PathBuf,
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,
    pub max_payload_size: usize,
    pub janitor_interval_secs: u64,
    pub tombstone_retention_days: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8443".to_string(),
            database_path: PathBuf::from("certvault.db"),
            database_connections: crate::storage::DEFAULT_CONNECTIONS,
            ca_cert_path: PathBuf::from("certs/ca.pem"),
            ca_key_path: PathBuf::from("certs/ca.key"),
            tls_cert_path: PathBuf::from("certs/server.pem"),
            tls_key_path: PathBuf::from("certs/server.key"),
            max_payload_size: 10 * 1024 * 1024,
            janitor_interval_secs: 3600,
            tombstone_retention_days: 30,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs.max(1))
    }

    pub fn tombstone_retention(&self) -> Duration {
        Duration::from_secs(self.tombstone_retention_days.saturating_mul(86_400))
    }
}
