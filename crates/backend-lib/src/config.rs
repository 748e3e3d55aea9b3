// ============================
// repogate-lib/src/config.rs
// ============================
//! Configuration management.
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use repogate_common::decode_lenient;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::auth::codec::CredentialCodec;
use crate::auth::denial::DEFAULT_SLOTS;
use crate::auth::CredentialHash;
use crate::error::{AppError, AuthError};

/// Configuration file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "repogate.toml";
/// Prefix of environment overrides; `__` separates nested keys
pub const ENV_PREFIX: &str = "REPOGATE_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Unix socket path, replacing `bind_addr` when set
    pub socket: Option<PathBuf>,
    /// Log level
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Authentication engine tuning
    pub auth: AuthSettings,
    /// Hosts by name; `*` is the wildcard host
    pub hosts: BTreeMap<String, HostSettings>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Memory budget and schedules of the authentication engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Total memory budget for concurrent Argon2 runs
    pub memory_budget_bytes: u64,
    /// Part of the budget that is never handed out
    pub memory_reserve_bytes: u64,
    /// Longest wait for admission before a request fails
    pub acquire_timeout_ms: u64,
    /// Interval between coalescing map sweeps
    pub sweep_interval_secs: u64,
    /// Interval between fingerprint nonce rotations
    pub nonce_rotation_secs: u64,
    /// Denial pre-filter size, a power of two
    pub denial_cache_slots: usize,
}

/// One served host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Base64 pepper mixed into every hash of this host
    pub secret: String,
    /// Stored credentials by user name
    pub users: BTreeMap<String, CredentialHash>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            socket: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            auth: AuthSettings::default(),
            hosts: BTreeMap::new(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 256 * 1024 * 1024,
            memory_reserve_bytes: 8 * 1024 * 1024,
            acquire_timeout_ms: 30_000,
            sweep_interval_secs: 30,
            nonce_rotation_secs: 60 * 60,
            denial_cache_slots: DEFAULT_SLOTS,
        }
    }
}

impl AuthSettings {
    pub fn ceiling(&self) -> u64 {
        self.memory_budget_bytes
            .saturating_sub(self.memory_reserve_bytes)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn nonce_rotation(&self) -> Duration {
        Duration::from_secs(self.nonce_rotation_secs)
    }
}

impl HostSettings {
    pub fn decoded_secret(&self) -> Result<Zeroizing<Vec<u8>>, AppError> {
        let secret = decode_lenient(&self.secret)
            .map_err(|err| AppError::Settings(format!("host secret is not base64: {err}")))?;
        if secret.is_empty() {
            return Err(AppError::Settings("host secret is empty".to_string()));
        }
        Ok(Zeroizing::new(secret))
    }
}

impl Settings {
    /// Figment layering defaults, then `path`, then `REPOGATE_` variables
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate settings from the default configuration file
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load and validate settings from `path`. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        let settings: Settings = Self::figment(path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the engine could not run with
    pub fn validate(&self) -> Result<(), AppError> {
        let level = self.log_level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(invalid(format!("unknown log level `{}`", self.log_level)));
        }

        let auth = &self.auth;
        if auth.memory_reserve_bytes >= auth.memory_budget_bytes {
            return Err(invalid("memory reserve must be smaller than the budget"));
        }
        let needed = CredentialCodec::default().expected_cost();
        if auth.ceiling() < needed {
            return Err(invalid(format!(
                "memory ceiling of {} bytes cannot fit one verification of {needed} bytes",
                auth.ceiling()
            )));
        }
        if auth.acquire_timeout_ms == 0 {
            return Err(invalid("acquire timeout must be positive"));
        }
        if auth.sweep_interval_secs == 0 || auth.nonce_rotation_secs == 0 {
            return Err(invalid("sweep and nonce rotation intervals must be positive"));
        }
        if !auth.denial_cache_slots.is_power_of_two() {
            return Err(invalid("denial cache slots must be a power of two"));
        }

        for (name, host) in &self.hosts {
            host.decoded_secret()
                .map_err(|err| invalid(format!("host `{name}`: {err}")))?;
            for (user, hash) in &host.users {
                if user.is_empty() || user.contains(':') {
                    return Err(invalid(format!("host `{name}`: invalid user name `{user}`")));
                }
                let requested = hash
                    .decode()
                    .map_err(|err| invalid(format!("host `{name}`, user `{user}`: {err}")))?
                    .params
                    .reservation_cost();
                if requested > auth.ceiling() {
                    let err = AuthError::Capacity {
                        requested,
                        ceiling: auth.ceiling(),
                    };
                    return Err(invalid(format!("host `{name}`, user `{user}`: {err}")));
                }
            }
        }
        Ok(())
    }

    /// Number of configured users across all hosts
    pub fn user_count(&self) -> usize {
        self.hosts.values().map(|host| host.users.len()).sum()
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::Settings(message.into())
}
