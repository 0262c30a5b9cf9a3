//! Typed configuration models.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validate::{env_flag_value, parse_bind_addr};

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Environment variable naming the bind address.
pub const ENV_ADDR: &str = "NEBULA_ADDR";
/// Environment variable naming the data directory.
pub const ENV_DATA_DIR: &str = "NEBULA_DATA_DIR";
/// Environment flag enabling development mode (auth bypass).
pub const ENV_DEV: &str = "NEBULA_DEV";
/// Environment variable naming the log level.
pub const ENV_LOG_LEVEL: &str = "NEBULA_LOG_LEVEL";
/// Environment variable naming the log format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "NEBULA_LOG_FORMAT";

/// User-facing settings persisted as `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Download cap in KiB/s; zero is unlimited.
    pub max_download_speed: u64,
    /// Upload cap in KiB/s; zero is unlimited.
    pub max_upload_speed: u64,
    /// UI theme name.
    pub theme: String,
    /// Compact UI layout.
    pub compact: bool,
    /// Desktop notifications.
    pub notifications: bool,
    /// Destination used when a request names none.
    pub default_download_dir: String,
    /// Route engine traffic through a proxy.
    pub proxy_enabled: bool,
    /// Proxy protocol.
    pub proxy_type: String,
    /// Proxy host.
    pub proxy_address: String,
    /// Proxy port.
    pub proxy_port: u16,
    /// Engine connection cap; zero leaves the engine default.
    pub max_connections: u32,
    /// Outbound request timeout in seconds.
    pub request_timeout: u32,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            max_download_speed: 0,
            max_upload_speed: 0,
            theme: "auto".to_string(),
            compact: false,
            notifications: true,
            default_download_dir: default_download_dir().to_string_lossy().into_owned(),
            proxy_enabled: false,
            proxy_type: "socks5".to_string(),
            proxy_address: String::new(),
            proxy_port: 0,
            max_connections: 0,
            request_timeout: 30,
        }
    }
}

impl UserSettings {
    /// Download cap in bytes per second; `None` when unlimited.
    #[must_use]
    pub const fn download_limit_bps(&self) -> Option<u64> {
        kib_to_bps(self.max_download_speed)
    }

    /// Upload cap in bytes per second; `None` when unlimited.
    #[must_use]
    pub const fn upload_limit_bps(&self) -> Option<u64> {
        kib_to_bps(self.max_upload_speed)
    }
}

const fn kib_to_bps(kib: u64) -> Option<u64> {
    if kib == 0 {
        None
    } else {
        Some(kib.saturating_mul(1024))
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("Downloads"))
}

/// Token-bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    /// Sustained requests per second.
    pub rate_per_sec: u32,
    /// Bucket capacity.
    pub burst: u32,
}

impl RateRule {
    /// Rule allowing `rate_per_sec` with a bucket of `burst`.
    #[must_use]
    pub const fn new(rate_per_sec: u32, burst: u32) -> Self {
        Self {
            rate_per_sec,
            burst,
        }
    }
}

/// Key used for routes without a dedicated rule.
pub const DEFAULT_ROUTE_KEY: &str = "*";

/// Rate tables for the three admission layers.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Bucket shared by every request.
    pub global: RateRule,
    /// Bucket per client address.
    pub per_address: RateRule,
    /// Per-address buckets for route prefixes.
    pub routes: Vec<(String, RateRule)>,
    /// Per-address bucket for routes without a rule.
    pub default_route: RateRule,
    /// Idle time after which per-address buckets are evicted.
    pub idle_eviction: Duration,
    /// Interval between eviction sweeps.
    pub sweep_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let moderate = RateRule::new(30, 60);
        Self {
            global: RateRule::new(100, 200),
            per_address: RateRule::new(20, 50),
            routes: vec![
                ("/api/magnet/analyze".to_string(), RateRule::new(5, 10)),
                ("/api/magnet/download".to_string(), RateRule::new(10, 20)),
                ("/api/torrent/analyze-file".to_string(), RateRule::new(5, 10)),
                ("/api/download".to_string(), moderate),
                ("/api/favorites".to_string(), moderate),
                ("/api/history".to_string(), moderate),
                ("/api/config".to_string(), moderate),
                ("/api/progress".to_string(), RateRule::new(100, 200)),
            ],
            default_route: RateRule::new(20, 40),
            idle_eviction: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl AdmissionConfig {
    /// Rule and bucket key for `path`: the longest matching route prefix, or
    /// the default rule under [`DEFAULT_ROUTE_KEY`].
    #[must_use]
    pub fn route_rule(&self, path: &str) -> (&str, RateRule) {
        self.routes
            .iter()
            .filter(|(prefix, _)| {
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or((DEFAULT_ROUTE_KEY, self.default_route), |(prefix, rule)| {
                (prefix.as_str(), *rule)
            })
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP bind address.
    pub bind_addr: SocketAddr,
    /// Directory holding documents, settings, and the API secret.
    pub data_dir: PathBuf,
    /// Skip shared-secret authentication.
    pub dev_mode: bool,
    /// Log level override.
    pub log_level: Option<String>,
    /// Log format override.
    pub log_format: Option<String>,
}

impl ServerSettings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when `NEBULA_ADDR` is not a socket address.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which maps variable names to values.
    ///
    /// # Errors
    ///
    /// Returns an error when the bind address is not a socket address.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let bind_addr = parse_bind_addr(
            non_empty(ENV_ADDR)
                .as_deref()
                .unwrap_or(DEFAULT_BIND_ADDR),
        )?;
        let data_dir = non_empty(ENV_DATA_DIR).map_or_else(default_data_dir, PathBuf::from);
        Ok(Self {
            bind_addr,
            data_dir,
            dev_mode: env_flag_value(lookup(ENV_DEV).as_deref()),
            log_level: non_empty(ENV_LOG_LEVEL),
            log_format: non_empty(ENV_LOG_FORMAT),
        })
    }
}

#[cfg(windows)]
fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from("Nebula"), |dir| dir.join("Nebula"))
}

#[cfg(not(windows))]
fn default_data_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".nebula"), |home| home.join(".nebula"))
}
