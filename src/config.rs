//! RoachPilot Configuration
//!
//! This module provides configuration structures for the RoachPilot
//! cluster bootstrap coordinator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::mode::DeploymentMode;

/// Main RoachPilot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoachPilotConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// CockroachDB daemon configuration
    #[serde(default)]
    pub cockroach: CockroachConfig,

    /// Cluster replication configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier, stable for the process lifetime
    pub id: String,

    /// Address advertised to peers (host or host:port)
    pub advertise_address: String,

    /// Data directory for local bootstrap state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory backing the shared state store
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

/// CockroachDB daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CockroachConfig {
    /// CockroachDB version to install when no binary is present
    #[serde(default = "default_version")]
    pub version: String,

    /// Directory the binary is installed into
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// Working directory for the daemon's on-disk state
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,

    /// systemd service name
    #[serde(default = "default_service")]
    pub service: String,

    /// SQL listen port
    #[serde(default = "default_sql_port")]
    pub sql_port: u16,

    /// HTTP admin port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

/// Cluster replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Replication factor for the default zone
    #[serde(default = "default_replicas")]
    pub default_zone_replicas: u32,

    /// Replication factor for system data
    #[serde(default = "default_replicas")]
    pub system_data_replicas: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/roachpilot")
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("/var/lib/roachpilot/store")
}

fn default_version() -> String {
    "v23.1.11".to_string()
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}

fn default_working_directory() -> PathBuf {
    PathBuf::from("/var/lib/cockroach")
}

fn default_service() -> String {
    "cockroachdb.service".to_string()
}

fn default_sql_port() -> u16 {
    26257
}

fn default_http_port() -> u16 {
    8080
}

fn default_replicas() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CockroachConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            install_dir: default_install_dir(),
            working_directory: default_working_directory(),
            service: default_service(),
            sql_port: default_sql_port(),
            http_port: default_http_port(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            default_zone_replicas: default_replicas(),
            system_data_replicas: default_replicas(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl CockroachConfig {
    /// Full path to the cockroach binary
    pub fn binary_path(&self) -> PathBuf {
        self.install_dir.join("cockroach")
    }
}

impl RoachPilotConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: RoachPilotConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.advertise_address.is_empty() {
            return Err(crate::Error::Config(
                "node.advertise_address cannot be empty".into(),
            ));
        }

        if self.cluster.default_zone_replicas == 0 || self.cluster.system_data_replicas == 0 {
            return Err(crate::Error::Config(
                "replication factors must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Resolve the deployment mode from the replication factors
    pub fn deployment_mode(&self) -> DeploymentMode {
        DeploymentMode::resolve(
            self.cluster.default_zone_replicas,
            self.cluster.system_data_replicas,
        )
    }

    /// Get the local state directory path
    pub fn state_dir(&self) -> PathBuf {
        self.node.data_dir.join("state")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "db-0"
advertise_address = "10.0.0.5"
data_dir = "/var/lib/roachpilot"

[cockroach]
version = "v23.1.11"

[cluster]
default_zone_replicas = 3
system_data_replicas = 3
"#;

        let config = RoachPilotConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id, "db-0");
        assert_eq!(config.cockroach.sql_port, 26257);
        assert_eq!(config.deployment_mode(), DeploymentMode::MultiNode);
    }

    #[test]
    fn test_single_node_mode_from_config() {
        let toml = r#"
[node]
id = "db-0"
advertise_address = "10.0.0.5"

[cluster]
default_zone_replicas = 1
system_data_replicas = 1
"#;

        let config = RoachPilotConfig::from_str(toml).unwrap();
        assert_eq!(config.deployment_mode(), DeploymentMode::SingleNode);
    }

    #[test]
    fn test_rejects_zero_replicas() {
        let toml = r#"
[node]
id = "db-0"
advertise_address = "10.0.0.5"

[cluster]
default_zone_replicas = 0
"#;

        assert!(RoachPilotConfig::from_str(toml).is_err());
    }
}
