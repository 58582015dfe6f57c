//! Configuration management for the content service.
//!
//! Loads configuration from TOML files and provides runtime defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable that overrides the configured site id
pub const SITE_ID_ENV: &str = "WWPDB_SITE_ID";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub definitions: DefinitionsConfig,

    /// Site id -> resource name -> connection settings
    #[serde(default)]
    pub databases: HashMap<String, HashMap<String, ResourceConfig>>,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Identifier of the site this worker runs at
    #[serde(default = "default_site_id")]
    pub site_id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionsConfig {
    /// Path to the content type definition file
    #[serde(default = "default_definitions_path")]
    pub path: PathBuf,

    /// Directory holding the named write lock
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
}

impl Default for DefinitionsConfig {
    fn default() -> Self {
        Self {
            path: default_definitions_path(),
            lock_dir: default_lock_dir(),
        }
    }
}

/// Connection settings for one relational resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// File holding the API key presented to peer sites
    #[serde(default)]
    pub api_key_path: Option<PathBuf>,

    /// Pause unit for status polling (the n-th poll waits n² units)
    #[serde(default = "default_base_pause")]
    pub base_pause_seconds: u64,

    /// Ceiling on a single polling pause
    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: u64,

    /// Timeout for each HTTP call to a peer
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            api_key_path: None,
            base_pause_seconds: 2,
            max_wait_seconds: 60,
            request_timeout_seconds: 30,
        }
    }
}

impl ProxyConfig {
    pub fn base_pause(&self) -> Duration {
        Duration::from_secs(self.base_pause_seconds)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,

    #[serde(default = "default_routing_key")]
    pub routing_key: String,

    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,

    /// Explicit socket path; derived from the queue name when unset
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            exchange_name: default_exchange_name(),
            routing_key: default_routing_key(),
            queue_prefix: default_queue_prefix(),
            socket_path: None,
        }
    }
}

impl QueueConfig {
    /// Per-site queue name, e.g. `contentws_queue_WWPDB_DEPLOY_TEST`
    pub fn queue_name(&self, site_id: &str) -> String {
        format!("{}_{}", self.queue_prefix, site_id)
    }

    /// Socket the worker consumes requests from
    pub fn socket_path(&self, site_id: &str) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/tmp/{}.sock", self.queue_name(site_id))))
    }
}

// Default value functions for serde
fn default_site_id() -> String {
    "WWPDB_DEPLOY_TEST".to_string()
}

fn default_definitions_path() -> PathBuf {
    config_root().join("ws_content_type_definitions.json")
}

fn default_lock_dir() -> PathBuf {
    config_root().join("locks")
}

fn default_base_pause() -> u64 {
    2
}

fn default_max_wait() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_exchange_name() -> String {
    "biocurationws_exchange".to_string()
}

fn default_routing_key() -> String {
    "contentws_requests".to_string()
}

fn default_queue_prefix() -> String {
    "contentws_queue".to_string()
}

fn config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("content-ws")
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        };

        if let Ok(site_id) = std::env::var(SITE_ID_ENV) {
            if !site_id.trim().is_empty() {
                config.site.site_id = site_id.trim().to_string();
            }
        }

        config
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        config_root().join("config.toml")
    }

    /// Connection settings for `resource` at `site_id`. Resource names
    /// are matched case-insensitively.
    pub fn resource(&self, site_id: &str, resource: &str) -> Option<&ResourceConfig> {
        let resources = self.databases.get(site_id)?;
        resources
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(resource))
            .map(|(_, cfg)| cfg)
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
