//! TOML configuration for the link client.
//!
//! Every field has a default, so the client runs without a config file and
//! with a file that sets only what it cares about:
//!
//! ```toml
//! [client]
//! log_level = "info"
//!
//! [discovery]
//! multicast_group = "239.255.42.42"
//! multicast_port = 6789
//!
//! [transport]
//! timeout_ms = 1000
//! retries = 3
//!
//! [liveness]
//! server_broadcast_interval_secs = 5
//! server_forget_client_secs = 7200
//! # poll_interval_secs = 1800
//! # forget_server_secs = 20
//! ```
//!
//! # Liveness settings (for beginners)
//!
//! The client's own timers are derived from two *server* settings, because
//! what matters is how often servers broadcast and how long they remember a
//! quiet client.  `poll_interval_secs` and `forget_server_secs` override the
//! derived values when set; the sweep interval is always half the forget
//! threshold.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use link_core::{DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::infrastructure::network::liveness::{LivenessConfig, LivenessConfigError};
use crate::infrastructure::network::transport::TransportConfig;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0} is not a multicast address")]
    NotMulticast(Ipv4Addr),

    #[error("invalid liveness settings: {0}")]
    Liveness(#[from] LivenessConfigError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub liveness: LivenessSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where server broadcasts arrive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,
    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,
}

/// Request/response timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportSettings {
    /// Wait for the first reply attempt; doubled after each miss.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Number of receive attempts per request.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LivenessSettings {
    #[serde(default = "default_server_broadcast_interval_secs")]
    pub server_broadcast_interval_secs: u64,
    #[serde(default = "default_server_forget_client_secs")]
    pub server_forget_client_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forget_server_secs: Option<u64>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_multicast_group() -> Ipv4Addr {
    DEFAULT_MULTICAST_GROUP
}
fn default_multicast_port() -> u16 {
    DEFAULT_MULTICAST_PORT
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_retries() -> u32 {
    3
}
fn default_server_broadcast_interval_secs() -> u64 {
    5
}
fn default_server_forget_client_secs() -> u64 {
    2 * 60 * 60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_group: default_multicast_group(),
            multicast_port: default_multicast_port(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
        }
    }
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            server_broadcast_interval_secs: default_server_broadcast_interval_secs(),
            server_forget_client_secs: default_server_forget_client_secs(),
            poll_interval_secs: None,
            forget_server_secs: None,
        }
    }
}

// ── Derived runtime settings ──────────────────────────────────────────────────

impl AppConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_millis(self.transport.timeout_ms),
            retries: self.transport.retries,
        }
    }

    /// Liveness timings: derived from the server settings, then overridden.
    ///
    /// # Errors
    ///
    /// Returns [`LivenessConfigError::TooLong`] when the server broadcast
    /// interval is too large to derive a forget threshold from.
    pub fn liveness(&self) -> Result<LivenessConfig, LivenessConfigError> {
        let settings = &self.liveness;
        let derived = LivenessConfig::derive(
            Duration::from_secs(settings.server_broadcast_interval_secs),
            Duration::from_secs(settings.server_forget_client_secs),
        )?;
        Ok(LivenessConfig::with_thresholds(
            settings
                .poll_interval_secs
                .map_or(derived.poll_interval, Duration::from_secs),
            settings
                .forget_server_secs
                .map_or(derived.forget_server, Duration::from_secs),
        ))
    }

    /// Checks the settings the client cannot run with.
    ///
    /// A poll interval at or above the forget threshold is allowed (the
    /// default settings produce one) but logged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotMulticast`] for a unicast group address and
    /// [`ConfigError::Liveness`] for unusable timings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let group = self.discovery.multicast_group;
        if !group.is_multicast() {
            return Err(ConfigError::NotMulticast(group));
        }

        let liveness = self.liveness()?;
        liveness.validate()?;
        if liveness.poll_interval >= liveness.forget_server {
            debug!(
                "poll interval {:?} is not below the forget threshold {:?}; \
                 servers are kept alive by their broadcasts",
                liveness.poll_interval, liveness.forget_server
            );
        }
        if self.transport.retries == 0 {
            warn!("transport retries is 0: every request will time out without waiting");
        }
        Ok(())
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no config at {}, using defaults", path.display());
            Ok(AppConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
