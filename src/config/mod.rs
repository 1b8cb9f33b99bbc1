//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`TDDEBUG_*`)
//! - CLI arguments (applied by the `tddebug` binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{DelimiterSet, DEFAULT_CANDIDATES, DEFAULT_FALLBACK};
use crate::error::{Result, TDDebugError};
use crate::protocol::{AcceptPolicy, DEFAULT_PENDING_TTL};
use crate::transport::DEFAULT_MAX_FRAME_BYTES;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Node identity and policy
    #[serde(default)]
    pub node: NodeConfig,

    /// Frame codec
    #[serde(default)]
    pub codec: CodecConfig,

    /// Correlated request tracking
    #[serde(default)]
    pub correlator: CorrelatorConfig,

    /// Heartbeats
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// TCP transport
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            TDDebugError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| TDDebugError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config dir>/tddebug/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tddebug").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Defaults, then the config file (explicit path or the default
    /// location if it exists), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(Self::from_file(p)?),
            None => match Self::default_path() {
                Some(p) if p.exists() => Some(Self::from_file(p)?),
                _ => None,
            },
        };
        let base = file.unwrap_or_default();
        Ok(base.merge(Self::from_env()))
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = var("TDDEBUG_NAME") {
            config.node.name = name;
        }
        if let Some(policy) = var("TDDEBUG_ACCEPT_POLICY") {
            match policy.parse() {
                Ok(policy) => config.node.accept_policy = policy,
                Err(e) => tracing::warn!("ignoring TDDEBUG_ACCEPT_POLICY: {}", e),
            }
        }
        if let Some(listen) = var("TDDEBUG_LISTEN") {
            config.transport.listen = listen;
        }
        if let Some(ttl) = var("TDDEBUG_PENDING_TTL_SECS") {
            if let Ok(ttl) = ttl.parse() {
                config.correlator.pending_ttl_secs = ttl;
            }
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(self, other: Self) -> Self {
        fn pick<T: PartialEq>(base: T, over: T, default: T) -> T {
            if over != default {
                over
            } else {
                base
            }
        }

        let node = NodeConfig::default();
        let codec = CodecConfig::default();
        let correlator = CorrelatorConfig::default();
        let heartbeat = HeartbeatConfig::default();
        let transport = TransportConfig::default();

        Self {
            node: NodeConfig {
                name: pick(self.node.name, other.node.name, node.name),
                accept_policy: pick(
                    self.node.accept_policy,
                    other.node.accept_policy,
                    node.accept_policy,
                ),
                enforce_roles: pick(
                    self.node.enforce_roles,
                    other.node.enforce_roles,
                    node.enforce_roles,
                ),
            },
            codec: CodecConfig {
                delimiters: pick(self.codec.delimiters, other.codec.delimiters, codec.delimiters),
                fallback_delimiter: pick(
                    self.codec.fallback_delimiter,
                    other.codec.fallback_delimiter,
                    codec.fallback_delimiter,
                ),
            },
            correlator: CorrelatorConfig {
                pending_ttl_secs: pick(
                    self.correlator.pending_ttl_secs,
                    other.correlator.pending_ttl_secs,
                    correlator.pending_ttl_secs,
                ),
                sweep_interval_secs: pick(
                    self.correlator.sweep_interval_secs,
                    other.correlator.sweep_interval_secs,
                    correlator.sweep_interval_secs,
                ),
            },
            heartbeat: HeartbeatConfig {
                app_interval_secs: pick(
                    self.heartbeat.app_interval_secs,
                    other.heartbeat.app_interval_secs,
                    heartbeat.app_interval_secs,
                ),
            },
            transport: TransportConfig {
                listen: pick(self.transport.listen, other.transport.listen, transport.listen),
                max_frame_bytes: pick(
                    self.transport.max_frame_bytes,
                    other.transport.max_frame_bytes,
                    transport.max_frame_bytes,
                ),
            },
        }
    }
}

/// Node identity and policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Display name announced to peers
    pub name: String,

    /// Whether this node is willing to act as debugger
    pub accept_policy: AcceptPolicy,

    /// Drop state reports and client commands that arrive outside the
    /// negotiated roles
    pub enforce_roles: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "tddebug".to_string(),
            accept_policy: AcceptPolicy::default(),
            enforce_roles: true,
        }
    }
}

/// Frame codec configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Delimiter candidates in priority order
    pub delimiters: Vec<char>,

    /// Delimiter used when every candidate collides
    pub fallback_delimiter: char,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            delimiters: DEFAULT_CANDIDATES.to_vec(),
            fallback_delimiter: DEFAULT_FALLBACK,
        }
    }
}

impl CodecConfig {
    /// Delimiter set for the wire codec
    pub fn delimiter_set(&self) -> DelimiterSet {
        DelimiterSet::new(self.delimiters.clone(), self.fallback_delimiter)
    }
}

/// Correlated request tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Age after which an unanswered request is abandoned
    pub pending_ttl_secs: u64,

    /// How often the node sweeps for abandoned requests
    pub sweep_interval_secs: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: DEFAULT_PENDING_TTL.as_secs(),
            sweep_interval_secs: 10,
        }
    }
}

impl CorrelatorConfig {
    /// Pending TTL as a duration
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    /// Sweep interval, never zero
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between app heartbeats to granted peers (0 disables)
    pub app_interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            app_interval_secs: 5,
        }
    }
}

impl HeartbeatConfig {
    /// Heartbeat interval, or `None` when disabled
    pub fn app_interval(&self) -> Option<Duration> {
        (self.app_interval_secs > 0).then(|| Duration::from_secs(self.app_interval_secs))
    }
}

/// TCP transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Listen address for `tddebug listen`
    pub listen: String,

    /// Largest accepted frame
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7373".to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
