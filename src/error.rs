//! Error types for mongo-provision

use std::time::Duration;

use thiserror::Error;

use crate::ssh::CommandResult;

/// Stage of a remote configuration mutation, used to report where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStage {
    /// Copying the file to its `.backup` sibling
    Backup,
    /// Reading the current file contents
    Read,
    /// Parsing the contents into a document
    Parse,
    /// Writing the edited document back
    Upload,
}

impl std::fmt::Display for MutationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MutationStage::Backup => "backup",
            MutationStage::Read => "read",
            MutationStage::Parse => "parse",
            MutationStage::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Main error type for provisioning operations
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// SSH transport could not be established or dropped
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication failed (key, agent or password)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A remote command exited non-zero or its channel failed
    #[error("Remote command failed:{0}")]
    Command(Box<CommandResult>),

    /// A readiness poll did not reach its target state in time
    #[error("Timed out after {waited:?} waiting for '{target}', last state '{last_state}'")]
    Timeout {
        /// Target outcome the poller was waiting for
        target: String,
        /// Last observed pending outcome
        last_state: String,
        /// Time spent polling
        waited: Duration,
    },

    /// A readiness probe returned something other than its canonical outcomes
    #[error("Unexpected state '{state}' while waiting for '{target}'")]
    UnexpectedState {
        /// Target outcome the poller was waiting for
        target: String,
        /// Output the probe returned
        state: String,
    },

    /// A remote configuration file could not be updated
    #[error("Could not update {path} ({stage}): {reason}")]
    Mutation {
        /// Remote file being edited
        path: String,
        /// Step that failed
        stage: MutationStage,
        /// Failure description
        reason: String,
    },

    /// A whole workflow phase exceeded its ceiling
    #[error("{phase} did not complete within {limit:?}")]
    PhaseTimeout {
        /// Name of the phase (create, read, ...)
        phase: String,
        /// Configured ceiling
        limit: Duration,
    },

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// First-run registration against the management console failed
    #[error("Registration failed: {0}")]
    Registration(String),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias using ProvisionError
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        ProvisionError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        ProvisionError::Authentication(msg.into())
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        ProvisionError::InvalidParams(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        ProvisionError::Config(msg.into())
    }

    /// Create a mutation error for the given file and stage
    pub fn mutation(path: impl Into<String>, stage: MutationStage, reason: impl Into<String>) -> Self {
        ProvisionError::Mutation {
            path: path.into(),
            stage,
            reason: reason.into(),
        }
    }

    /// Whether the error means the remote host could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ProvisionError::Connection(_) | ProvisionError::Authentication(_)
        )
    }
}
