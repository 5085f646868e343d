//! Shared configuration for nodelink hosts.
//!
//! TOML device profiles, credential resolution (env + keyring + plaintext),
//! translation to `nodelink_core::SessionConfig`, and the tracing
//! subscriber bootstrap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use nodelink_core::{Backoff, Credentials, DiscoveryConfig, SessionConfig, SessionId};

const KEYRING_SERVICE: &str = "nodelink";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("tracing setup failed: {0}")]
    Tracing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when the host doesn't name one.
    pub default_profile: Option<String>,

    /// Session tuning applied to every profile unless overridden.
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Named device profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listen for mDNS announcements while disconnected.
    #[serde(default = "default_true")]
    pub discovery: bool,

    #[serde(default = "default_event_domain")]
    pub event_domain: String,

    /// Upper bound on the reconnect wait, in seconds.
    #[serde(default = "default_max_retry_secs")]
    pub max_retry_secs: u64,

    #[serde(default = "default_ingest_buffer")]
    pub ingest_buffer: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            port: default_port(),
            discovery: true,
            event_domain: default_event_domain(),
            max_retry_secs: default_max_retry_secs(),
            ingest_buffer: default_ingest_buffer(),
        }
    }
}

fn default_port() -> u16 {
    6053
}
fn default_true() -> bool {
    true
}
fn default_event_domain() -> String {
    nodelink_core::config::DEFAULT_EVENT_DOMAIN.into()
}
fn default_max_retry_secs() -> u64 {
    60
}
fn default_ingest_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. "info" or
    /// "nodelink_core=debug".
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".into()
}

/// A named device profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Hostname or IP of the node.
    pub host: String,

    /// Stable session id. Defaults to the profile name.
    pub session_id: Option<String>,

    pub port: Option<u16>,

    /// API password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Base64 pre-shared key (plaintext, prefer keyring or env var).
    pub encryption_key: Option<String>,

    /// Environment variable name containing the encryption key.
    pub encryption_key_env: Option<String>,

    /// Override the discovery setting.
    pub discovery: Option<bool>,

    /// Override the accepted event domain.
    pub event_domain: Option<String>,
}

impl Config {
    /// Look up a profile by name, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .ok_or_else(|| ConfigError::Validation {
                field: "default_profile".into(),
                reason: "no profile named and no default set".into(),
            })?;
        self.profiles
            .get_key_value(name)
            .map(|(k, p)| (k.as_str(), p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }

    /// Session configs for every profile, ordered by profile name.
    pub fn session_configs(&self) -> Result<Vec<SessionConfig>, ConfigError> {
        let mut names: Vec<&String> = self.profiles.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| profile_to_session_config(&self.profiles[name], name, &self.defaults))
            .collect()
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "nodelink", "nodelink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("nodelink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` layered over defaults, with `NODELINK_*` environment
/// variables on top (`NODELINK_LOGGING_LEVEL=debug`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NODELINK_").split("_"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Walk the secret chain: named env var, system keyring, plaintext.
fn resolve_secret(
    env_name: Option<&str>,
    keyring_user: &str,
    plaintext: Option<&str>,
) -> Option<SecretString> {
    // 1. Env var named by the profile
    if let Some(val) = env_name.and_then(|name| std::env::var(name).ok()) {
        return Some(SecretString::from(val));
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, keyring_user) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    plaintext.map(|s| SecretString::from(s.to_owned()))
}

/// Resolve the API password. `None` when the node has none.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    resolve_secret(
        profile.password_env.as_deref(),
        &format!("{profile_name}/password"),
        profile.password.as_deref(),
    )
}

/// Resolve the transport encryption key. `None` means plaintext transport.
pub fn resolve_encryption_key(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<SecretString>, ConfigError> {
    let key = resolve_secret(
        profile.encryption_key_env.as_deref(),
        &format!("{profile_name}/encryption-key"),
        profile.encryption_key.as_deref(),
    );
    if let Some(ref key) = key {
        validate_encryption_key(key.expose_secret())?;
    }
    Ok(key)
}

/// A pre-shared key is 32 bytes, canonical base64 with padding.
pub fn validate_encryption_key(key: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Validation {
        field: "encryption_key".into(),
        reason,
    };
    let decoded = STANDARD
        .decode(key)
        .map_err(|e| invalid(format!("not valid base64: {e}")))?;
    if decoded.len() != 32 {
        return Err(invalid(format!(
            "expected 32 bytes, got {}",
            decoded.len()
        )));
    }
    Ok(())
}

pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Credentials, ConfigError> {
    Ok(Credentials {
        password: resolve_password(profile, profile_name),
        encryption_key: resolve_encryption_key(profile, profile_name)?,
    })
}

/// Build a `SessionConfig` from a profile layered over `defaults`.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    let host = profile.host.trim();
    if host.is_empty() {
        return Err(ConfigError::Validation {
            field: format!("profiles.{profile_name}.host"),
            reason: "must not be empty".into(),
        });
    }

    let event_domain = profile
        .event_domain
        .clone()
        .unwrap_or_else(|| defaults.event_domain.clone());
    if event_domain.is_empty() || event_domain.contains('.') {
        return Err(ConfigError::Validation {
            field: format!("profiles.{profile_name}.event_domain"),
            reason: format!("'{event_domain}' is not a bare domain name"),
        });
    }

    let id = profile
        .session_id
        .clone()
        .map_or_else(|| SessionId::from(profile_name), SessionId::from);

    Ok(SessionConfig {
        id,
        host: host.to_owned(),
        port: profile.port.unwrap_or(defaults.port),
        credentials: resolve_credentials(profile, profile_name)?,
        backoff: Backoff {
            max_delay: Duration::from_secs(defaults.max_retry_secs),
            ..Backoff::default()
        },
        discovery: DiscoveryConfig {
            enabled: profile.discovery.unwrap_or(defaults.discovery),
            ..DiscoveryConfig::default()
        },
        event_domain,
        ingest_buffer: defaults.ingest_buffer.max(1),
    })
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level.
pub fn init_tracing(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| ConfigError::Validation {
            field: "logging.level".into(),
            reason: e.to_string(),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ConfigError::Tracing(e.to_string()))
}
