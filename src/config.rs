//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for robodash, supporting:
//! - Environment variables for all configurable values
//! - Defaults matching the cadence the backend is built around
//! - Builder pattern for programmatic configuration
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ROBODASH_BACKEND_URL` | Base URL of the robot master | `http://127.0.0.1:11150` |
//! | `ROBODASH_WORKERS` | Number of numbered worker machines | `4` |
//! | `ROBODASH_STATUS_INTERVAL` | Status/settings poll interval (ms) | `2000` |
//! | `ROBODASH_RECONNECT_DELAY` | Delay before re-attaching a dropped stream (ms) | `1000` |
//! | `ROBODASH_SCREENSHOT_TICK` | Screenshot refresher tick (ms) | `1000` |
//! | `ROBODASH_MAX_RECONNECTS` | Reconnect attempts before giving up (`0` = never) | `0` |
//! | `ROBODASH_SESSION_DIR` | Base directory for capture sessions | `/tmp/robodash` |
//!
//! # Example
//!
//! ```bash
//! export ROBODASH_BACKEND_URL="http://robot.local:11150"
//! export ROBODASH_WORKERS=8
//! ```

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default backend base URL
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:11150";

/// Default number of worker machines (not counting the master)
pub const DEFAULT_WORKERS: u32 = 4;

/// Default status poll interval (milliseconds)
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 2000;

/// Default reconnect delay (milliseconds)
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Default screenshot refresher tick (milliseconds)
pub const DEFAULT_SCREENSHOT_TICK_MS: u64 = 1000;

/// Default reconnect cap (0 = unlimited)
pub const DEFAULT_MAX_RECONNECTS: u32 = 0;

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = "/tmp/robodash";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_BACKEND_URL: &str = "ROBODASH_BACKEND_URL";
pub const ENV_WORKERS: &str = "ROBODASH_WORKERS";
pub const ENV_STATUS_INTERVAL: &str = "ROBODASH_STATUS_INTERVAL";
pub const ENV_RECONNECT_DELAY: &str = "ROBODASH_RECONNECT_DELAY";
pub const ENV_SCREENSHOT_TICK: &str = "ROBODASH_SCREENSHOT_TICK";
pub const ENV_MAX_RECONNECTS: &str = "ROBODASH_MAX_RECONNECTS";
pub const ENV_SESSION_DIR: &str = "ROBODASH_SESSION_DIR";

/// Tracing filter variable read by the binary (falls back to `RUST_LOG`)
pub const ENV_LOG: &str = "ROBODASH_LOG";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for robodash
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend connection settings
    pub backend: BackendSettings,
    /// Timing of the polling, streaming and screenshot loops
    pub timing: TimingSettings,
    /// Session configuration
    pub session: SessionSettings,
}

/// Backend-related settings
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Base URL (scheme, host, port) of the master
    pub url: String,
    /// Number of numbered worker machines
    pub workers: u32,
}

/// Loop cadences
#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub status_interval: Duration,
    pub reconnect_delay: Duration,
    pub screenshot_tick: Duration,
    /// `None` retries forever
    pub max_reconnects: Option<u32>,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for session storage
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            backend: BackendSettings::from_env(),
            timing: TimingSettings::from_env(),
            session: SessionSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            backend: BackendSettings::defaults(),
            timing: TimingSettings::defaults(),
            session: SessionSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl BackendSettings {
    pub fn from_env() -> Self {
        Self {
            url: env::var(ENV_BACKEND_URL).unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string()),
            workers: parse_env(ENV_WORKERS).unwrap_or(DEFAULT_WORKERS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.to_string(),
            workers: DEFAULT_WORKERS,
        }
    }
}

impl TimingSettings {
    pub fn from_env() -> Self {
        let millis = |name: &str, default: u64| Duration::from_millis(parse_env(name).unwrap_or(default));
        Self {
            status_interval: millis(ENV_STATUS_INTERVAL, DEFAULT_STATUS_INTERVAL_MS),
            reconnect_delay: millis(ENV_RECONNECT_DELAY, DEFAULT_RECONNECT_DELAY_MS),
            screenshot_tick: millis(ENV_SCREENSHOT_TICK, DEFAULT_SCREENSHOT_TICK_MS),
            max_reconnects: reconnect_cap(parse_env(ENV_MAX_RECONNECTS).unwrap_or(DEFAULT_MAX_RECONNECTS)),
        }
    }

    pub fn defaults() -> Self {
        Self {
            status_interval: Duration::from_millis(DEFAULT_STATUS_INTERVAL_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            screenshot_tick: Duration::from_millis(DEFAULT_SCREENSHOT_TICK_MS),
            max_reconnects: reconnect_cap(DEFAULT_MAX_RECONNECTS),
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SESSION_DIR).unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Map the `0 = unlimited` convention onto an `Option`
fn reconnect_cap(raw: u32) -> Option<u32> {
    if raw == 0 { None } else { Some(raw) }
}

/// Get backend URL (convenience function)
pub fn backend_url() -> String {
    get().backend.url.clone()
}

/// Get session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().session.base_dir.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.backend.url, DEFAULT_BACKEND_URL);
        assert_eq!(config.backend.workers, DEFAULT_WORKERS);
        assert_eq!(config.timing.reconnect_delay, Duration::from_millis(1000));
        assert_eq!(config.timing.status_interval, Duration::from_millis(2000));
        assert_eq!(config.session.base_dir, DEFAULT_SESSION_DIR);
    }

    #[test]
    fn test_reconnect_cap_zero_is_unlimited() {
        assert_eq!(reconnect_cap(0), None);
        assert_eq!(reconnect_cap(5), Some(5));
        assert_eq!(Config::defaults().timing.max_reconnects, None);
    }
}
