use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Process settings, read once at start-up and handed to every handler
/// through `AppState`.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_json: bool,
    pub max_upload_bytes: u64,
    pub busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_json: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            workspace: lookup("SCHOOLD_WORKSPACE")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            log_json: lookup("SCHOOLD_LOG_JSON")
                .map(|v| parse_bool(&v, defaults.log_json))
                .unwrap_or(defaults.log_json),
            max_upload_bytes: lookup("SCHOOLD_MAX_UPLOAD_BYTES")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_upload_bytes),
            busy_timeout: lookup("SCHOOLD_BUSY_TIMEOUT_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
        }
    }
}

fn parse_bool(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
