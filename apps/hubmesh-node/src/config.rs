//! Node configuration management.
//!
//! Configuration is stored as TOML, by default at
//! `~/.config/hubmesh/node.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hubmesh_client::{ClientConfig, ReconnectConfig};
use hubmesh_protocol::{Location, Selector};

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Location this node announces to the Hub (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// WebSocket URL of the Hub.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,

    /// How long a request waits for its reply, in milliseconds.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Give up reconnecting after this many attempts. Unset retries forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_max_attempts: Option<u32>,

    /// Selectors published on start, in order.
    #[serde(default)]
    pub selectors: Vec<Selector>,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "hubmesh-node".into())
}

fn default_hub_url() -> String {
    "ws://127.0.0.1:8750".into()
}

fn default_response_timeout_ms() -> u64 {
    30_000
}

fn default_reconnect_initial_ms() -> u64 {
    250
}

fn default_reconnect_max_ms() -> u64 {
    15_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            hub_url: default_hub_url(),
            response_timeout_ms: default_response_timeout_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_max_attempts: None,
            selectors: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or creates a default there if not found.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            location: Location::new(self.name.clone()),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
        }
    }

    pub fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.reconnect_initial_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms),
            max_attempts: self.reconnect_max_attempts,
            ..ReconnectConfig::default()
        }
    }
}

/// Returns the default configuration file path.
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("hubmesh")
        .join("node.toml")
}
