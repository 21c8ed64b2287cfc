//! Sync configuration
//!
//! Loaded from `CARELINK_*` environment variables or a JSON document; every
//! field has a default so partial sources are accepted.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use carelink_shared::{logging, SyncError, SyncResult};
use carelink_sync_integrity::{default_week, FlatSlot, Role};

pub const DEFAULT_PROFILE_LOAD_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on one profile load, repairs included
    pub profile_load_timeout_ms: u64,
    /// Buffered change events per feed before slow listeners lag
    pub feed_capacity: usize,
    /// Role given to an account synthesized by the repair engine
    pub default_role: Role,
    /// Weekly slots written for a new practitioner
    pub default_availability: Vec<FlatSlot>,
    pub log_json: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            profile_load_timeout_ms: DEFAULT_PROFILE_LOAD_TIMEOUT_MS,
            feed_capacity: DEFAULT_FEED_CAPACITY,
            default_role: Role::Patient,
            default_availability: default_week(),
            log_json: false,
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_role(name: &str, default: Role) -> Role {
    env::var(name)
        .ok()
        .and_then(|v| Role::parse(v.trim()))
        .unwrap_or(default)
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = SyncConfig::default();
        SyncConfig {
            profile_load_timeout_ms: env_u64(
                "CARELINK_PROFILE_LOAD_TIMEOUT_MS",
                defaults.profile_load_timeout_ms,
            ),
            feed_capacity: env_usize("CARELINK_FEED_CAPACITY", defaults.feed_capacity).max(1),
            default_role: env_role("CARELINK_DEFAULT_ROLE", defaults.default_role),
            default_availability: defaults.default_availability,
            log_json: env_bool("CARELINK_LOG_JSON", defaults.log_json),
        }
    }

    pub fn from_json_str(raw: &str) -> SyncResult<Self> {
        let config: SyncConfig = serde_json::from_str(raw)
            .map_err(|e| SyncError::rejected(format!("invalid sync config: {}", e)))?;
        if config.feed_capacity == 0 {
            return Err(SyncError::rejected("feed_capacity must be at least 1"));
        }
        Ok(config)
    }

    pub fn profile_load_timeout(&self) -> Duration {
        Duration::from_millis(self.profile_load_timeout_ms)
    }

    /// Install the global `tracing` subscriber in the configured format
    pub fn init_logging(&self) -> bool {
        logging::init(self.log_json)
    }
}
