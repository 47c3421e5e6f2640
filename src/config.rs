//! Runtime configuration read from the environment (and `.env`).

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(10_000);
pub const DEFAULT_STORAGE_DIR: &str = ".transit_track";
pub const DEFAULT_LOG_FILE: &str = "logs/transit_track.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub file_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// REST base, e.g. `https://host/api`.
    pub backend_url: String,
    /// Live channel base, e.g. `wss://host`.
    pub ws_url: String,
    pub reconnect_delay: Duration,
    pub broadcast_interval: Duration,
    pub storage_dir: PathBuf,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            ws_url: derive_ws_base(DEFAULT_BACKEND_URL),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            log: LogConfig {
                file_path: PathBuf::from(DEFAULT_LOG_FILE),
            },
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and reads the `TRANSIT_*` variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let backend_url = lookup("TRANSIT_BACKEND_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let ws_url = lookup("TRANSIT_WS_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| derive_ws_base(&backend_url));

        Self {
            ws_url,
            backend_url,
            reconnect_delay: millis_or(
                &lookup,
                "TRANSIT_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY,
            ),
            broadcast_interval: millis_or(
                &lookup,
                "TRANSIT_BROADCAST_INTERVAL_MS",
                DEFAULT_BROADCAST_INTERVAL,
            ),
            storage_dir: lookup("TRANSIT_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
            log: LogConfig {
                file_path: lookup("LOG_FILE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            },
        }
    }
}

fn millis_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            _ => {
                warn!(key, value = %raw, "Ignoring invalid duration, using default");
                default
            }
        },
    }
}

/// Maps a REST base onto the live-channel base: `https`→`wss`, `http`→`ws`,
/// trailing `/api` removed.
pub fn derive_ws_base(backend_url: &str) -> String {
    let trimmed = backend_url.trim_end_matches('/');
    let without_api = trimmed.strip_suffix("/api").unwrap_or(trimmed);

    if let Some(rest) = without_api.strip_prefix("https") {
        format!("wss{rest}")
    } else if let Some(rest) = without_api.strip_prefix("http") {
        format!("ws{rest}")
    } else {
        without_api.to_string()
    }
}
