//! Error taxonomy for vpn-test.
//!
//! Only fatal conditions are errors. Best-effort failures (missing labels,
//! optional tools, one public-IP endpoint down) degrade to placeholders and
//! never surface here.

use std::path::PathBuf;

/// vpn-test errors.
#[derive(Debug, thiserror::Error)]
pub enum VpnTestError {
    #[error("root privileges are required (current uid: {uid})")]
    PrivilegeRequired { uid: String },

    #[error("required tool not found in PATH: {0}")]
    MissingTool(String),

    #[error("failed to create run directory {path}: {source}")]
    RunDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run aborted: remote step {step} failed: {reason}")]
    FetchFailed { step: String, reason: String },

    #[error("http client error: {0}")]
    Http(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for vpn-test operations.
pub type Result<T> = std::result::Result<T, VpnTestError>;
