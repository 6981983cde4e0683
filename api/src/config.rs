//! Server configuration.
//!
//! Loaded from `config/keystone.yaml` (or `KEYSTONE_CONFIG`), then
//! overridden from the environment:
//!
//! | Variable                        | Overrides                     |
//! |---------------------------------|-------------------------------|
//! | `KEYSTONE_PORT`                 | `server.port`                 |
//! | `KEYSTONE_DATABASE_PATH`        | `database.path`               |
//! | `KEYSTONE_IDLE_TIMEOUT_SECONDS` | `auth.idle_timeout_seconds`   |
//! | `DATA_PATH`                     | default database directory    |

use authz::{GrantTable, Policy};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use user::auth::{AuthenticatorConfig, CredentialConfig, TouchPolicy};

use crate::error::{ApiError, ApiResult};

pub const DEFAULT_CONFIG_PATH: &str = "config/keystone.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoneConfig {
    pub server: ServerConfig,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub resources: Vec<ResourceConfig>,
    pub grants: GrantTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        let data_dir = std::env::var("DATA_PATH").unwrap_or_else(|_| "data".to_string());
        Self {
            path: PathBuf::from(data_dir).join("keystone.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub idle_timeout_seconds: i64,
    pub max_skew_seconds: i64,
    pub touch_policy: TouchPolicy,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: user::auth::credential::DEFAULT_IDLE_TIMEOUT_SECONDS,
            max_skew_seconds: 300,
            touch_policy: TouchPolicy::Explicit,
        }
    }
}

/// A record collection exposed under `/records/{path}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Record type; also the name used in grants and access-control entries.
    pub name: String,
    /// URL segment. Defaults to `name`.
    #[serde(default)]
    pub path: Option<String>,
    /// Backing table. Defaults to `records_<name>`.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub owner_column: Option<String>,
    pub policy: Policy,
}

impl ResourceConfig {
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }

    pub fn table(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| format!("records_{}", self.name))
    }
}

impl KeystoneConfig {
    pub fn from_yaml(source: &str) -> ApiResult<Self> {
        let config: Self = serde_yaml::from_str(source)
            .map_err(|e| ApiError::Configuration(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ApiResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            ApiError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        info!("Loaded configuration from {}", path.display());
        Self::from_yaml(&source)
    }

    /// Reads `.env`, loads the configuration file if it exists and applies
    /// environment overrides.
    pub fn load_from_env(explicit_path: Option<&Path>) -> ApiResult<Self> {
        dotenvy::dotenv().ok();

        let path = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("KEYSTONE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            Self::load(&path)?
        } else if explicit_path.is_some() {
            return Err(ApiError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ApiResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("KEYSTONE_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| ApiError::Configuration(format!("Invalid KEYSTONE_PORT '{}': {}", port, e)))?;
        }
        if let Some(path) = lookup("KEYSTONE_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(timeout) = lookup("KEYSTONE_IDLE_TIMEOUT_SECONDS") {
            self.auth.idle_timeout_seconds = timeout.trim().parse().map_err(|e| {
                ApiError::Configuration(format!(
                    "Invalid KEYSTONE_IDLE_TIMEOUT_SECONDS '{}': {}",
                    timeout, e
                ))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> ApiResult<()> {
        if self.auth.idle_timeout_seconds <= 0 {
            return Err(ApiError::Configuration(
                "auth.idle_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.auth.max_skew_seconds < 0 {
            return Err(ApiError::Configuration(
                "auth.max_skew_seconds must not be negative".to_string(),
            ));
        }
        if Duration::try_seconds(self.auth.idle_timeout_seconds).is_none() {
            return Err(ApiError::Configuration(
                "auth.idle_timeout_seconds is out of range".to_string(),
            ));
        }
        if Duration::try_seconds(self.auth.max_skew_seconds).is_none() {
            return Err(ApiError::Configuration(
                "auth.max_skew_seconds is out of range".to_string(),
            ));
        }
        Ok(())
    }

    /// Out-of-range values, which `validate` rejects, fall back to defaults.
    pub fn credential_config(&self) -> CredentialConfig {
        let defaults = CredentialConfig::default();
        match Duration::try_seconds(self.auth.idle_timeout_seconds) {
            Some(idle_timeout) => defaults.with_idle_timeout(idle_timeout),
            None => defaults,
        }
    }

    pub fn authenticator_config(&self) -> AuthenticatorConfig {
        AuthenticatorConfig {
            max_skew: Duration::try_seconds(self.auth.max_skew_seconds)
                .unwrap_or(AuthenticatorConfig::default().max_skew),
            touch_policy: self.auth.touch_policy,
        }
    }
}
