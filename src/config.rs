//! Process configuration. Grounded on `internal/config/config.go`: load
//! from environment variables with defaults, then validate required
//! fields before the server starts.

use std::env;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::strategy::StrategyKind;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub shutdown_timeout: Duration,
    pub jwt_secret: String,
    pub storage_path: String,
    pub sync_strategy: StrategyKind,
    pub nats_urls: Vec<String>,
    pub region: String,
    pub server_id: String,
    pub webhook_url: Option<String>,
    pub log_format: String,
    pub log_level: String,
}

impl Config {
    /// Reads configuration from environment variables, applying defaults.
    /// Does not validate — call [`Config::validate`] before using it to
    /// build the server.
    pub fn load() -> Self {
        let port = env_var("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let shutdown_timeout_secs = env_var("SHUTDOWN_TIMEOUT_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&s| s > 0)
            .unwrap_or(30);

        let nats_urls = env_var("NATS_URL")
            .map(|v| split_trim(&v))
            .unwrap_or_default();

        let server_id = env_var("SERVER_ID").unwrap_or_else(|| {
            if nats_urls.is_empty() {
                String::new()
            } else {
                format!("sync-server-{port}")
            }
        });

        let sync_strategy = env_var("SYNC_STRATEGY")
            .and_then(|v| StrategyKind::parse(&v))
            .unwrap_or(StrategyKind::Automerge);

        Self {
            port,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
            jwt_secret: env_var("ETHERPLY_JWT_SECRET").unwrap_or_default(),
            storage_path: env_var("STORAGE_PATH").unwrap_or_else(|| "./etherply.db".to_string()),
            sync_strategy,
            nats_urls,
            region: env_var("REGION").unwrap_or_else(|| "default".to_string()),
            server_id,
            webhook_url: env_var("WEBHOOK_URL"),
            log_format: env_var("LOG_FORMAT").unwrap_or_else(|| "json".to_string()),
            log_level: env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Checks required configuration; called once at startup before any
    /// component is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.is_empty() {
            return Err(SyncError::InvalidArgument(
                "ETHERPLY_JWT_SECRET: required for secure operation".into(),
            ));
        }
        match StrategyKind::parse(self.sync_strategy.name()) {
            Some(_) => Ok(()),
            None => Err(SyncError::InvalidArgument(
                "SYNC_STRATEGY: must be one of: automerge, lww, server-auth".into(),
            )),
        }
    }

    pub fn replication_enabled(&self) -> bool {
        !self.nats_urls.is_empty()
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn split_trim(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}
