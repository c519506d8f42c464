//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files, and
//! every section has defaults so a minimal file (or none) works.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::tls::TlsVersions;

/// Root configuration for the filter-chain server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ChainConfig {
    /// Listener configuration (bind address, limits, TLS).
    pub listener: ListenerConfig,

    /// Per-connection I/O loop settings.
    pub controller: ControllerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:7070").
    pub bind_address: String,

    /// Optional TLS configuration. When set, every connection is wrapped in
    /// a TLS adapter in the accept role.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// How long shutdown waits for open connections to finish.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7070".to_string(),
            tls: None,
            max_connections: 1_024,
            drain_timeout_secs: 10,
        }
    }
}

impl ListenerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Protocol versions to negotiate ("tls12", "tls13" or "all").
    pub versions: TlsVersions,

    /// Path to the certificate chain (PEM).
    pub cert_path: Option<PathBuf>,

    /// Path to the private key (PEM).
    pub key_path: Option<PathBuf>,

    /// Trust anchors for outbound sessions (PEM).
    pub ca_paths: Vec<PathBuf>,

    /// Peer name used by outbound sessions.
    pub server_name: Option<String>,

    /// ALPN protocols, in preference order.
    pub alpn: Vec<String>,
}

/// Per-connection controller settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Bytes read from the socket per readiness event.
    pub read_buffer_size: usize,

    /// Close connections with no I/O for this long. 0 disables.
    pub idle_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 64 * 1024,
            idle_timeout_ms: 0,
        }
    }
}

impl ControllerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error, or an
    /// `EnvFilter` expression). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
