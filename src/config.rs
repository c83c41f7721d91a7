//! Application-level configuration loading: timer floor, token lifetime and room defaults.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::room::{RoomSettings, default_estimate_options};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PLANNING_POKER_CONFIG_PATH";

const DEFAULT_TIMER_FLOOR_SECONDS: u64 = 30;
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);
const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    timer_floor_seconds: u64,
    dev_session_issuing: bool,
    session_ttl: Duration,
    transaction_timeout: Duration,
    estimate_options: Vec<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        timer_floor_seconds = app_config.timer_floor_seconds,
                        dev_session_issuing = app_config.dev_session_issuing,
                        options = app_config.estimate_options.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Smallest countdown a moderator may configure.
    pub fn timer_floor_seconds(&self) -> u64 {
        self.timer_floor_seconds
    }

    /// Whether `POST /rooms/{key}/sessions` hands out tokens. The endpoint trusts
    /// the requested name, so it is only meant for development setups.
    pub fn dev_session_issuing(&self) -> bool {
        self.dev_session_issuing
    }

    /// Lifetime of issued session tokens.
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Upper bound for persisting the writes of one room transaction.
    pub fn transaction_timeout(&self) -> Duration {
        self.transaction_timeout
    }

    /// Settings applied to rooms created on first access.
    pub fn default_room_settings(&self) -> RoomSettings {
        RoomSettings {
            estimate_options: self.estimate_options.clone(),
            ..RoomSettings::default()
        }
    }

    /// Enable or disable development token issuance.
    pub fn with_dev_session_issuing(mut self, enabled: bool) -> Self {
        self.dev_session_issuing = enabled;
        self
    }

    /// Override the transaction timeout.
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timer_floor_seconds: DEFAULT_TIMER_FLOOR_SECONDS,
            dev_session_issuing: false,
            session_ttl: DEFAULT_SESSION_TTL,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            estimate_options: default_estimate_options(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    timer_floor_seconds: Option<u64>,
    dev_session_issuing: Option<bool>,
    session_ttl_seconds: Option<u64>,
    transaction_timeout_ms: Option<u64>,
    estimate_options: Option<Vec<String>>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        let estimate_options = value
            .estimate_options
            .filter(|options| {
                let valid = RoomSettings {
                    estimate_options: options.clone(),
                    ..RoomSettings::default()
                }
                .validate();
                if let Err(reason) = &valid {
                    warn!(%reason, "ignoring configured estimate options");
                }
                valid.is_ok()
            })
            .unwrap_or(defaults.estimate_options);

        Self {
            timer_floor_seconds: value
                .timer_floor_seconds
                .unwrap_or(defaults.timer_floor_seconds),
            dev_session_issuing: value
                .dev_session_issuing
                .unwrap_or(defaults.dev_session_issuing),
            session_ttl: value
                .session_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_ttl),
            transaction_timeout: value
                .transaction_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.transaction_timeout),
            estimate_options,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
