// src/config.rs

//! Manages node configuration: loading, resolving size values, and validation.

use crate::core::protocol::frame::MAX_PAYLOAD_SIZE;
use crate::core::role::NodeRole;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

/// Defines this node's place in the group.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ClusterConfig {
    Head {
        /// Address the head listens on for follower links.
        #[serde(default = "default_bind")]
        bind: String,
        /// The exact number of followers the group is started with.
        #[serde(default)]
        followers: usize,
        /// How long to wait for all followers to connect.
        #[serde(default = "default_accept_timeout_secs")]
        accept_timeout_secs: u64,
    },
    Follower {
        head_address: String,
        node_index: usize,
        /// Total time spent retrying the connection to the head.
        #[serde(default = "default_connect_timeout_secs")]
        connect_timeout_secs: u64,
    },
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::Head {
            bind: default_bind(),
            followers: 0,
            accept_timeout_secs: default_accept_timeout_secs(),
        }
    }
}

impl ClusterConfig {
    pub fn role(&self) -> NodeRole {
        match self {
            ClusterConfig::Head { .. } => NodeRole::Head,
            ClusterConfig::Follower { .. } => NodeRole::Follower,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:7400".to_string()
}
fn default_accept_timeout_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    60
}

/// TLS on the links between the head and its followers.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Head only: certificate chain presented to followers.
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    /// Head only: private key for `cert_path`.
    #[serde(default = "default_key_path")]
    pub key_path: String,
    /// Extra PEM roots trusted by followers (and by the head for `tls://` resources).
    #[serde(default)]
    pub ca_path: Option<String>,
    /// Name a follower expects in the head's certificate. Defaults to the host of
    /// `head_address`.
    #[serde(default)]
    pub server_name: Option<String>,
}

fn default_cert_path() -> String {
    "lockstep.crt".to_string()
}
fn default_key_path() -> String {
    "lockstep.key".to_string()
}

/// Settings for the data path: chunking, queues, and the head's resource clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IoConfig {
    /// Upper bound on the bytes the head reads and broadcasts per chunk.
    pub chunk_size: usize,
    /// Capacity of each link's outbound and inbound frame queues.
    pub queue_capacity: usize,
    /// How many frames may arrive ahead of the expected sequence number.
    pub reorder_window: usize,
    /// Bytes each pipe records for `rewind`. `0` disables rewinding.
    pub record_limit_bytes: usize,
    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            queue_capacity: 256,
            reorder_window: 64,
            record_limit_bytes: 16 * 1024 * 1024,
            http_timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    format!("lockstep/{}", env!("CARGO_PKG_VERSION"))
}

/// Holds configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, the head starts an HTTP server exposing Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    7478
}

/// Size values accept plain bytes or a string with a unit, e.g. `"64kb"` or `"16mb"`.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum SizeConfig {
    Bytes(usize),
    String(String),
}

#[derive(Deserialize, Debug, Default)]
struct RawIoConfig {
    chunk_size: Option<SizeConfig>,
    queue_capacity: Option<usize>,
    reorder_window: Option<usize>,
    record_limit: Option<SizeConfig>,
    http_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    user_agent: Option<String>,
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    cluster: ClusterConfig,
    #[serde(default)]
    tls: TlsConfig,
    #[serde(default)]
    io: RawIoConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The fully resolved configuration of one node.
#[derive(Serialize, Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub cluster: ClusterConfig,
    pub tls: TlsConfig,
    pub io: IoConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            cluster: ClusterConfig::default(),
            tls: TlsConfig::default(),
            io: IoConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses, resolves and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let defaults = IoConfig::default();
        let raw_io = raw_config.io;
        let io = IoConfig {
            chunk_size: match raw_io.chunk_size {
                Some(size) => resolve_size("io.chunk_size", size)?,
                None => defaults.chunk_size,
            },
            queue_capacity: raw_io.queue_capacity.unwrap_or(defaults.queue_capacity),
            reorder_window: raw_io.reorder_window.unwrap_or(defaults.reorder_window),
            record_limit_bytes: match raw_io.record_limit {
                Some(size) => resolve_size("io.record_limit", size)?,
                None => defaults.record_limit_bytes,
            },
            http_timeout_secs: raw_io.http_timeout_secs.unwrap_or(defaults.http_timeout_secs),
            connect_timeout_secs: raw_io
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            user_agent: raw_io.user_agent.unwrap_or(defaults.user_agent),
        };

        let config = Config {
            log_level: raw_config.log_level,
            cluster: raw_config.cluster,
            tls: raw_config.tls,
            io,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn role(&self) -> NodeRole {
        self.cluster.role()
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        match &self.cluster {
            ClusterConfig::Head {
                bind, followers, ..
            } => {
                if bind.trim().is_empty() {
                    return Err(anyhow!("cluster.bind cannot be empty"));
                }
                if *followers > u32::MAX as usize {
                    return Err(anyhow!("cluster.followers is too large"));
                }
                if *followers == 0 {
                    info!("Configured as a single-node group (no followers).");
                }
            }
            ClusterConfig::Follower {
                head_address,
                node_index,
                ..
            } => {
                if head_address.trim().is_empty() {
                    return Err(anyhow!("cluster.head_address cannot be empty"));
                }
                if *node_index > u32::MAX as usize {
                    return Err(anyhow!("cluster.node_index is too large"));
                }
            }
        }

        if self.io.chunk_size == 0 {
            return Err(anyhow!("io.chunk_size cannot be 0"));
        }
        // Leaves room for the message envelope around each chunk.
        if self.io.chunk_size > MAX_PAYLOAD_SIZE / 2 {
            return Err(anyhow!(
                "io.chunk_size cannot exceed {} bytes",
                MAX_PAYLOAD_SIZE / 2
            ));
        }
        if self.io.queue_capacity == 0 {
            return Err(anyhow!("io.queue_capacity cannot be 0"));
        }
        if self.io.reorder_window == 0 {
            return Err(anyhow!("io.reorder_window cannot be 0"));
        }
        if self.io.record_limit_bytes == 0 {
            warn!("io.record_limit is 0: rewinding resources is disabled.");
        }

        if self.tls.enabled && self.role().is_head() {
            if self.tls.cert_path.trim().is_empty() {
                return Err(anyhow!("tls.cert_path cannot be empty when TLS is enabled"));
            }
            if self.tls.key_path.trim().is_empty() {
                return Err(anyhow!("tls.key_path cannot be empty when TLS is enabled"));
            }
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if !self.role().is_head() {
                warn!("metrics.enabled is ignored on followers.");
            }
        }
        Ok(())
    }
}

/// Resolves a `SizeConfig` into bytes.
fn resolve_size(field: &str, cfg: SizeConfig) -> Result<usize> {
    match cfg {
        SizeConfig::Bytes(b) => Ok(b),
        SizeConfig::String(s) => {
            let s_lower = s.trim().to_lowercase();
            if let Some(val_str) = s_lower.strip_suffix("gib") {
                parse_size_string(field, &s, val_str, 1024 * 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix("gb") {
                parse_size_string(field, &s, val_str, 1024 * 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix('g') {
                parse_size_string(field, &s, val_str, 1024 * 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix("mib") {
                parse_size_string(field, &s, val_str, 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix("mb") {
                parse_size_string(field, &s, val_str, 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix('m') {
                parse_size_string(field, &s, val_str, 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix("kib") {
                parse_size_string(field, &s, val_str, 1024)
            } else if let Some(val_str) = s_lower.strip_suffix("kb") {
                parse_size_string(field, &s, val_str, 1024)
            } else if let Some(val_str) = s_lower.strip_suffix('k') {
                parse_size_string(field, &s, val_str, 1024)
            } else {
                s_lower.parse().with_context(|| {
                    format!(
                        "Invalid {field} value '{s}'. Must be a number (bytes) or have a unit (e.g., '64kb')."
                    )
                })
            }
        }
    }
}

/// Parses a string number with a unit (k, kb, kib and the m/g forms) and applies a multiplier.
fn parse_size_string(
    field: &str,
    original_str: &str,
    value_str: &str,
    multiplier: u64,
) -> Result<usize> {
    let value: u64 = value_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in {field}: '{original_str}'"))?;
    let result_u64 = value.saturating_mul(multiplier);
    if result_u64 > (usize::MAX as u64) {
        return Err(anyhow!(
            "{} value '{}' is too large for this system's architecture (max is {} bytes)",
            field,
            original_str,
            usize::MAX
        ));
    }
    Ok(result_u64 as usize)
}
