//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use vizrelay_broadcaster::broadcaster::MIN_OUTBOUND_QUEUE;
use vizrelay_broadcaster::role::DEFAULT_BOT_MARKERS;
use vizrelay_broadcaster::{HubConfig, RoleClassifier};

use crate::cli::Cli;

/// Rejected configuration values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("heartbeat_interval_secs must be greater than zero")]
    ZeroHeartbeatInterval,

    #[error("stats_interval_secs must be greater than zero")]
    ZeroStatsInterval,

    #[error("outbound_queue must be at least {min}, got {0}", min = MIN_OUTBOUND_QUEUE)]
    OutboundQueueTooSmall(usize),

    #[error("bot_markers needs at least one non-empty marker")]
    NoBotMarkers,

    #[error("bind_address {0:?} is not an IP address")]
    InvalidBindAddress(String),
}

/// Relay daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// IP address to bind
    pub bind_address: String,

    pub port: u16,

    /// Viewers beyond this are closed with 1008 "Server full"
    pub max_viewers: usize,

    /// Seconds between liveness probes
    pub heartbeat_interval_secs: u64,

    /// Seconds between statistics reports
    pub stats_interval_secs: u64,

    /// Per-connection outbound queue depth
    pub outbound_queue: usize,

    /// `User-Agent` substrings that mark the frame source (case-sensitive)
    pub bot_markers: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let hub = HubConfig::default();
        Self {
            config_path: Self::default_config_path(),
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            max_viewers: hub.max_viewers,
            heartbeat_interval_secs: hub.heartbeat_interval.as_secs(),
            stats_interval_secs: hub.stats_interval.as_secs(),
            outbound_queue: hub.outbound_queue,
            bot_markers: DEFAULT_BOT_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl RelayConfig {
    /// Load configuration
    ///
    /// An explicit `path` must exist. Without one the default location is
    /// read when present, otherwise defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let default_path = Self::default_config_path();
                if default_path.exists() {
                    Self::load_from(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Read and parse a TOML config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: RelayConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vizrelay")
            .join("config.toml")
    }

    /// Apply command-line (and environment) overrides
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(path) = &cli.config {
            self.config_path = path.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(bind) = &cli.bind {
            self.bind_address = bind.clone();
        }
        if let Some(max_viewers) = cli.max_viewers {
            self.max_viewers = max_viewers;
        }
        if let Some(secs) = cli.heartbeat_secs {
            self.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = cli.stats_secs {
            self.stats_interval_secs = secs;
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::ZeroStatsInterval);
        }
        if self.outbound_queue < MIN_OUTBOUND_QUEUE {
            return Err(ConfigError::OutboundQueueTooSmall(self.outbound_queue));
        }
        if self.bot_markers.iter().all(|m| m.is_empty()) {
            return Err(ConfigError::NoBotMarkers);
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            max_viewers: self.max_viewers,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            stats_interval: Duration::from_secs(self.stats_interval_secs),
            outbound_queue: self.outbound_queue,
            classifier: RoleClassifier::new(self.bot_markers.iter().cloned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_viewers, 100);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.stats_interval_secs, 60);
        assert_eq!(config.bot_markers, vec!["MusicBot", "Discord-Bot"]);
        assert!(config.validate().is_ok());
        assert!(config.config_path.ends_with("vizrelay/config.toml"));
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = RelayConfig {
            port: 9000,
            max_viewers: 10,
            ..RelayConfig::default()
        };
        let cli = Cli {
            port: Some(9100),
            heartbeat_secs: Some(5),
            ..Cli::default()
        };

        config.apply_overrides(&cli);
        assert_eq!(config.port, 9100);
        assert_eq!(config.heartbeat_interval_secs, 5);
        assert_eq!(config.max_viewers, 10, "unset flags keep file values");
    }

    #[test]
    fn test_validation() {
        let bad = |edit: fn(&mut RelayConfig)| {
            let mut config = RelayConfig::default();
            edit(&mut config);
            config.validate().unwrap_err()
        };

        assert_eq!(bad(|c| c.heartbeat_interval_secs = 0), ConfigError::ZeroHeartbeatInterval);
        assert_eq!(bad(|c| c.stats_interval_secs = 0), ConfigError::ZeroStatsInterval);
        assert_eq!(bad(|c| c.outbound_queue = 1), ConfigError::OutboundQueueTooSmall(1));
        assert_eq!(bad(|c| c.bot_markers = vec![String::new()]), ConfigError::NoBotMarkers);
        assert_eq!(
            bad(|c| c.bind_address = "localhost".to_string()),
            ConfigError::InvalidBindAddress("localhost".to_string())
        );
    }

    #[test]
    fn test_hub_config_conversion() {
        let config = RelayConfig {
            max_viewers: 3,
            heartbeat_interval_secs: 7,
            bot_markers: vec!["Visualizer-Feed".to_string()],
            ..RelayConfig::default()
        };

        let hub = config.to_hub_config();
        assert_eq!(hub.max_viewers, 3);
        assert_eq!(hub.heartbeat_interval, Duration::from_secs(7));
        assert_eq!(hub.classifier.markers(), ["Visualizer-Feed".to_string()]);
    }

    #[test]
    fn test_socket_addr() {
        let config = RelayConfig {
            bind_address: "::1".to_string(),
            port: 8081,
            ..RelayConfig::default()
        };
        assert_eq!(config.socket_addr().unwrap(), "[::1]:8081".parse().unwrap());
    }
}
