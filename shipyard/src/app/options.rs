//! Application configuration options

use std::time::Duration;

use crate::compose::importer::ImportOptions;
use crate::deploy::git::GitTimeouts;
use crate::deploy::runtime;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::scheduler;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable local HTTP server
    pub enable_server: bool,

    /// Enable polling scheduler
    pub enable_scheduler: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Scheduler worker options
    pub scheduler: scheduler::Options,

    /// Composition import options
    pub import: ImportOptions,

    /// Image fragments marking stateful services; empty selects the built-in list
    pub stateful_image_patterns: Vec<String>,

    pub runtime: runtime::Options,
    pub git: GitTimeouts,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(StorageLayout::default(), &Settings::default())
    }
}

impl AppOptions {
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            enable_server: settings.enable_server,
            enable_scheduler: settings.enable_scheduler,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            scheduler: scheduler::Options {
                tick_interval: Duration::from_secs(settings.scheduler_tick_secs.max(1)),
                ..Default::default()
            },
            import: ImportOptions {
                shared_network: settings.deploy.shared_network.clone(),
                timezone: settings.deploy.timezone.clone(),
            },
            stateful_image_patterns: settings.deploy.stateful_image_patterns.clone(),
            runtime: runtime::Options {
                shared_network: settings.deploy.shared_network.clone(),
                ..Default::default()
            },
            git: GitTimeouts::default(),
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::settings::{DeploySettings, ServerSettings};

    #[test]
    fn test_from_settings() {
        let settings = Settings {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 9090,
            },
            deploy: DeploySettings {
                shared_network: "edge".to_string(),
                timezone: "Europe/Paris".to_string(),
                stateful_image_patterns: vec!["mysql".to_string()],
            },
            enable_scheduler: false,
            scheduler_tick_secs: 0,
            ..Default::default()
        };
        let options = AppOptions::from_settings(StorageLayout::new("/tmp/shipyard"), &settings);

        assert_eq!(options.server.port, 9090);
        assert!(!options.enable_scheduler);
        assert!(options.enable_server);
        assert_eq!(options.scheduler.tick_interval, Duration::from_secs(1));
        assert_eq!(options.import.shared_network, "edge");
        assert_eq!(options.runtime.shared_network, "edge");
        assert_eq!(options.import.timezone, "Europe/Paris");
    }
}
