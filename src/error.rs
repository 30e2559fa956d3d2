//! RoachPilot Error Types

use thiserror::Error;

/// Result type alias for RoachPilot operations
pub type Result<T> = std::result::Result<T, Error>;

/// RoachPilot error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Shared store errors
    #[error("Shared store error: {0}")]
    Store(String),

    #[error("Shared store serialization error: {0}")]
    StoreSerialization(#[from] serde_json::Error),

    // Local state errors
    #[error("Local state error: {0}")]
    State(String),

    // Daemon process control errors
    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    // Bootstrap invariant violations
    #[error("Node {0} attempted to publish cluster state without holding leadership")]
    LeadershipViolation(String),

    #[error("Tried to run the init command in single-node mode")]
    SingleNodeInit,

    // Identity resolution failures
    #[error("Cluster identity resolution failed: {0}")]
    IdentityResolution(String),

    #[error("Cluster identity resolution exhausted after {attempts} attempts")]
    ResolveExhausted { attempts: u32 },

    #[error("Resolved cluster id {resolved} differs from published id {published}")]
    ClusterIdMismatch { resolved: String, published: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error represents a bootstrap invariant violation
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Error::LeadershipViolation(_)
                | Error::SingleNodeInit
                | Error::ClusterIdMismatch { .. }
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::State(format!("SQLite error: {}", e))
    }
}
