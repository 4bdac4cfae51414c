use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const DEFAULT_CACHE_EXPIRATION_SECS: i64 = 300;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 30;
const DEFAULT_METRICS_PORT: u16 = 9090;
const DEFAULT_ML_THRESHOLD: f32 = 0.8;

/// Model sources and acceptance threshold for the ML module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    /// Local path or `http(s)://` URL of the TCP model.
    pub tcp_model_path: String,
    pub udp_model_path: String,
    /// Predictions less confident than this are reported as unknown.
    pub threshold: f32,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            tcp_model_path: "./models/2grams_tcp.model".to_string(),
            udp_model_path: "./models/2grams_udp.model".to_string(),
            threshold: DEFAULT_ML_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Idle time before a flow is forgotten. Zero or negative keeps flows
    /// until flushed.
    pub cache_expiration_secs: i64,
    pub cleanup_interval_secs: u64,
    pub metrics_port: u16,
    pub ml: MlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_expiration_secs: DEFAULT_CACHE_EXPIRATION_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            ml: MlConfig::default(),
        }
    }
}

/// Parses an environment variable, keeping `default` when it is unset or invalid.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_expiration_secs: env_or(
                "FLOWDPI_CACHE_EXPIRATION_SECS",
                defaults.cache_expiration_secs,
            ),
            cleanup_interval_secs: env_or(
                "FLOWDPI_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval_secs,
            ),
            metrics_port: env_or("FLOWDPI_METRICS_PORT", defaults.metrics_port),
            ml: MlConfig {
                tcp_model_path: std::env::var("FLOWDPI_TCP_MODEL")
                    .unwrap_or(defaults.ml.tcp_model_path),
                udp_model_path: std::env::var("FLOWDPI_UDP_MODEL")
                    .unwrap_or(defaults.ml.udp_model_path),
                threshold: env_or("FLOWDPI_ML_THRESHOLD", defaults.ml.threshold),
            },
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// `None` when flows never expire.
    pub fn cache_expiration(&self) -> Option<Duration> {
        u64::try_from(self.cache_expiration_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}
