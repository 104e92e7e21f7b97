//! Settings file management

use serde::{Deserialize, Serialize};

use crate::filesys::file::File;
use crate::errors::ShipyardError;
use crate::logs::LogLevel;

/// Daemon settings, read from `settings.json` in the data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files under `<data_dir>/logs`
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Deployment pipeline configuration
    #[serde(default)]
    pub deploy: DeploySettings,

    /// Enable the polling scheduler
    #[serde(default = "default_true")]
    pub enable_scheduler: bool,

    /// Enable the HTTP server (webhooks, history, configuration)
    #[serde(default = "default_true")]
    pub enable_server: bool,

    /// Scheduler tick in seconds
    #[serde(default = "default_scheduler_tick")]
    pub scheduler_tick_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_scheduler_tick() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            deploy: DeploySettings::default(),
            enable_scheduler: true,
            enable_server: true,
            scheduler_tick_secs: default_scheduler_tick(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist
    pub async fn load(file: &File) -> Result<Self, ShipyardError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json().await
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    7070
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Deployment pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Platform network every project container joins
    #[serde(default = "default_shared_network")]
    pub shared_network: String,

    /// Value injected as `TZ` into every service
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Image name fragments that mark a service as stateful; empty means the
    /// built-in list
    #[serde(default)]
    pub stateful_image_patterns: Vec<String>,
}

fn default_shared_network() -> String {
    "shipyard_network".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            shared_network: default_shared_network(),
            timezone: default_timezone(),
            stateful_image_patterns: Vec::new(),
        }
    }
}
