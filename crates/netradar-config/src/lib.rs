//! Settings for the netradar daemon.
//!
//! TOML file + `NETRADAR_` environment merging, platform config-dir
//! resolution, and translation into `netradar_core::EngineConfig`.
//! Defaults match the engine's built-in cadence; a missing file is not
//! an error.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use netradar_core::store::LifecycleThresholds;
use netradar_core::EngineConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSection,
    pub capture: CaptureSection,
    pub server: ServerSection,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineSection::default(),
            capture: CaptureSection::default(),
            server: ServerSection::default(),
        }
    }
}

/// Collector cadence and lifecycle thresholds, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    pub neighbor_interval_secs: u64,
    pub socket_interval_secs: u64,
    pub bluetooth_interval_secs: u64,
    pub wifi_interval_secs: u64,
    pub route_interval_secs: u64,
    pub throughput_interval_secs: u64,
    pub tick_interval_secs: u64,
    pub stale_secs: u64,
    pub expired_secs: u64,
    pub remove_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            neighbor_interval_secs: 5,
            socket_interval_secs: 3,
            bluetooth_interval_secs: 8,
            wifi_interval_secs: 10,
            route_interval_secs: 30,
            throughput_interval_secs: 3,
            tick_interval_secs: 5,
            stale_secs: 30,
            expired_secs: 60,
            remove_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureSection {
    pub ring_capacity: usize,
    pub interface: Option<String>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            ring_capacity: 10_000,
            interface: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// WebSocket listen address, e.g. `127.0.0.1:17717`.
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:17717".to_owned(),
        }
    }
}

impl Settings {
    /// Load settings: defaults ← TOML file (if present) ← `NETRADAR_`
    /// environment (double-underscore section separator).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.map_or_else(default_config_path, Path::to_path_buf);

        let settings: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("NETRADAR_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.stale_secs >= self.engine.expired_secs
            || self.engine.expired_secs >= self.engine.remove_secs
        {
            return Err(ConfigError::Validation {
                field: "engine".into(),
                reason: "lifecycle thresholds must be ordered stale < expired < remove".into(),
            });
        }
        if self.capture.ring_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "capture.ring_capacity".into(),
                reason: "must be positive".into(),
            });
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Parsed WebSocket listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .listen
            .parse()
            .map_err(|_| ConfigError::Validation {
                field: "server.listen".into(),
                reason: format!("not a socket address: {}", self.server.listen),
            })
    }

    /// Translate into the engine's runtime configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let e = &self.engine;
        EngineConfig {
            neighbor_interval: Duration::from_secs(e.neighbor_interval_secs),
            socket_interval: Duration::from_secs(e.socket_interval_secs),
            bluetooth_interval: Duration::from_secs(e.bluetooth_interval_secs),
            wifi_interval: Duration::from_secs(e.wifi_interval_secs),
            route_interval: Duration::from_secs(e.route_interval_secs),
            throughput_interval: Duration::from_secs(e.throughput_interval_secs),
            tick_interval: Duration::from_secs(e.tick_interval_secs),
            thresholds: LifecycleThresholds {
                stale: Duration::from_secs(e.stale_secs),
                expired: Duration::from_secs(e.expired_secs),
                remove: Duration::from_secs(e.remove_secs),
            },
            ring_capacity: self.capture.ring_capacity,
            capture_interface: self.capture.interface.clone(),
        }
    }
}

/// `~/.config/netradar/netradar.toml` (platform-appropriate).
#[must_use]
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "netradar")
        .map(|dirs| dirs.config_dir().join("netradar.toml"))
        .unwrap_or_else(|| PathBuf::from("netradar.toml"))
}
