//! TOML-based configuration system for megsync.
//!
//! Credentials are never stored inline: `password_env` names an environment
//! variable whose value is resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conflict::FallbackKind;
use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Acting user identity.
    pub user: UserConfig,

    /// Working copy and remote.
    pub repository: RepositoryConfig,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// The user every lock and permission check is made for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,

    /// Commit email; defaults to `<username>@localhost`.
    #[serde(default)]
    pub email: Option<String>,

    /// Environment variable holding the fetch/push password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

impl UserConfig {
    pub fn email(&self) -> String {
        self.email
            .clone()
            .unwrap_or_else(|| format!("{}@localhost", self.username))
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Working copy root.
    pub path: PathBuf,

    /// Remote to fetch from and push to (default `origin`).
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Remote URL used by `clone` and `init`.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_remote() -> String {
    "origin".into()
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Refuse three-way merges instead of resolving them.
    #[serde(default)]
    pub fail_on_conflict: bool,

    /// Resolution for conflicts no lock or permission rule decides.
    #[serde(default)]
    pub fallback: FallbackKind,

    /// Timeout the CLI applies to each repository operation.
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
}

fn default_network_timeout() -> u64 {
    120
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fail_on_conflict: false,
            fallback: FallbackKind::default(),
            network_timeout_secs: default_network_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level or filter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file. Does not resolve env vars.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Parse configuration text. Does not resolve env vars.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve `*_env` references. A missing variable leaves the value unset.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.user.password_env {
            self.user.password = resolve_optional_env(env_name, "user.password_env");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user.username.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "user.username".into(),
                detail: "username must not be empty".into(),
            });
        }
        if self.repository.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repository.path".into(),
                detail: "repository path must not be empty".into(),
            });
        }
        if self.repository.remote.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repository.remote".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        if self.sync.network_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.network_timeout_secs".into(),
                detail: "network timeout must be > 0".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// `<config_dir>/megsync/config.toml`, or `./megsync.toml` when the
    /// platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("megsync").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("megsync.toml"))
    }

    /// A commented starter configuration.
    pub fn template(username: &str, path: &Path) -> String {
        format!(
            r#"# megsync configuration

[user]
username = {username_value}
# email = "{username}@example.com"
# password_env = "MEGSYNC_PASSWORD"

[repository]
path = {path}
remote = "origin"
# url = "https://git.example.com/assets.git"

[sync]
fail_on_conflict = false
# "local" keeps our version of unclaimed conflicts, "remote" keeps theirs.
fallback = "local"
network_timeout_secs = 120

[logging]
log_level = "info"
"#,
            username_value = toml_string(username),
            path = toml_string(&path.display().to_string()),
        )
    }
}

/// `value` as a TOML string, quoted and escaped.
fn toml_string(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
