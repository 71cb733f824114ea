//! Configuration types for gpudra

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Allocation controller configuration
    pub controller: ControllerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::DraError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::DraError::Config(format!("Failed to read config file: {}", e))
        })?;
        Ok(toml::from_str(&content)?)
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub rest_address: String,
    /// Port for the REST API server
    pub rest_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rest_address: "0.0.0.0".to_string(),
            rest_port: 9090,
        }
    }
}

/// Allocation controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Namespace holding the node allocation state records
    pub namespace: String,
    /// Upper bound for a single durable store call, in seconds
    pub store_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "gpudra".to_string(),
            store_timeout_secs: 10,
        }
    }
}

impl ControllerConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

/// Storage backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Records kept in process memory
    Memory,
    /// One JSON file per record
    File,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: PathBuf::from("/var/lib/gpudra/state"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_daemon_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.api.rest_port, 9090);
        assert_eq!(config.controller.namespace, "gpudra");
        assert_eq!(config.controller.store_timeout(), Duration::from_secs(10));
        assert_eq!(config.storage.backend, StorageBackend::File);
    }

    #[test]
    fn test_partial_config_parse() {
        let toml_str = r#"
[controller]
namespace = "gpu-system"

[storage]
backend = "memory"

[logging]
level = "debug"
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.controller.namespace, "gpu-system");
        assert_eq!(config.controller.store_timeout_secs, 10);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.api.rest_port, 9090);
    }

    #[test]
    fn test_from_file_missing() {
        let err = DaemonConfig::from_file(std::path::Path::new("/nonexistent/gpudra.toml"))
            .unwrap_err();
        assert!(matches!(err, crate::DraError::Config(_)));
    }

    #[test]
    fn test_from_file_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpudra.toml");
        std::fs::write(&path, "[api]\nrest_port = \"not a port\"\n").unwrap();

        let err = DaemonConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, crate::DraError::Config(_)));
    }
}
