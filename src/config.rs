//! Control plane configuration
//!
//! Configuration structs for the API listener, the document store backend
//! and agent admission. TOML is the primary format; YAML is accepted.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::eca::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::store::StoreConfig;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main control plane configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// API server settings
    pub api: ApiConfig,
    /// Document store settings
    pub store: StoreSettings,
    /// Agent admission settings
    pub admission: AdmissionConfig,
}

impl ControlConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admission.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "admission.handshake_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.admission.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "admission.max_sessions must be > 0".to_string(),
            ));
        }

        if let Some(token) = &self.api.operator_token {
            if token.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "api.operator_token must not be empty".to_string(),
                ));
            }
        }

        if self.store.backend == StoreBackend::Sqlite && self.store.path.is_none() {
            return Err(ConfigError::Invalid(
                "store.path is required for the sqlite backend".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from TOML
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(format!("TOML parse error: {}", e)))
    }

    /// Load configuration from YAML
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(format!("YAML parse error: {}", e)))
    }

    /// Load configuration from a file, picking the format by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_toml(&content),
        }
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(format!("TOML serialize error: {}", e)))
    }

    /// Store configuration for `create_store`
    pub fn store_config(&self) -> StoreConfig {
        match (&self.store.backend, &self.store.path) {
            (StoreBackend::Sqlite, Some(path)) => StoreConfig::Sqlite { path: path.clone() },
            _ => StoreConfig::Memory,
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address (default: 0.0.0.0:8000)
    pub addr: SocketAddr,
    /// Bearer token for operator endpoints; operator endpoints are disabled without one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            operator_token: None,
        }
    }
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Backend (default: sqlite)
    pub backend: StoreBackend,
    /// SQLite database path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: Some(PathBuf::from("./data/control.db")),
        }
    }
}

/// Agent admission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Time allowed for an agent to send its identity message
    pub handshake_timeout_secs: u64,
    /// Maximum concurrent agent sessions
    pub max_sessions: usize,
}

impl AdmissionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT.as_secs(),
            max_sessions: 10000,
        }
    }
}
