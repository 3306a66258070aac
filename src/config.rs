//! Configuration loader and validator for the NFC-e crawler service.
use crate::extract::ExtractSettings;
use crate::router::Channels;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub source: Source,
    pub queues: Queues,
}

/// Service-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub database_url: String,
    pub poll_interval_ms: u64,
}

/// Where and how receipts are looked up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    /// Consultation URL; the receipt key is appended verbatim.
    pub base_url: String,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_navigation_timeout_ms() -> u64 {
    60_000
}

fn default_ready_timeout_ms() -> u64 {
    120_000
}

fn default_user_agent() -> String {
    "nfce-crawler/0.1".into()
}

/// Inbound queue plus one outbound queue per route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Queues {
    pub consumer: String,
    #[serde(flatten)]
    pub channels: Channels,
}

impl Config {
    /// `DATABASE_URL` wins over the file so deployments can point at another store.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.app.database_url.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.app.poll_interval_ms)
    }

    pub fn extract_settings(&self) -> ExtractSettings {
        ExtractSettings {
            base_url: self.source.base_url.clone(),
            navigation_timeout: Duration::from_millis(self.source.navigation_timeout_ms),
            ready_timeout: Duration::from_millis(self.source.ready_timeout_ms),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.database_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.database_url must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    if cfg.source.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("source.base_url must be non-empty"));
    }
    if cfg.source.navigation_timeout_ms == 0 {
        return Err(ConfigError::Invalid("source.navigation_timeout_ms must be > 0"));
    }
    if cfg.source.ready_timeout_ms == 0 {
        return Err(ConfigError::Invalid("source.ready_timeout_ms must be > 0"));
    }

    let q = &cfg.queues;
    if q.consumer.trim().is_empty() {
        return Err(ConfigError::Invalid("queues.consumer must be non-empty"));
    }
    if q.channels.producer.trim().is_empty() {
        return Err(ConfigError::Invalid("queues.producer must be non-empty"));
    }
    let outbound = [
        &q.channels.producer,
        &q.channels.execution_destroyed,
        &q.channels.cannot_recover,
        &q.channels.dead_letter,
    ];
    if outbound.iter().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::Invalid("queues.* names must be non-empty"));
    }
    if outbound.iter().any(|name| *name == &q.consumer) {
        return Err(ConfigError::Invalid("queues.consumer must differ from every outbound queue"));
    }

    Ok(())
}

/// Example configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  database_url: "sqlite://./data/queues.db"
  poll_interval_ms: 500

source:
  base_url: "https://www.sefaz.rs.gov.br/NFCE/NFCE-COM.aspx?p="
  navigation_timeout_ms: 60000
  ready_timeout_ms: 120000
  user_agent: "nfce-crawler/0.1"

queues:
  consumer: "CONSULTAR_NFE_QRCODE"
  producer: "GERAR_CUPOM"
  execution_destroyed: "EXECUTION_DESTROYED"
  cannot_recover: "NAO_POSSIVEL_RECUPERAR_NFC"
  dead_letter: "DEAD_CONSULTAR_NFE_QRCODE"
"#
}
