use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Remote(#[from] fieldsync_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Mutation data must be a JSON object: {0}")]
    InvalidData(String),
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Not found for id/prefix: {0}")]
    NotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync session refused: {0}")]
    Rejected(String),
    #[error("No preference changes given")]
    EmptyPreferencesPatch,
    #[error(
        "Remote endpoint is not configured. Set FIELDSYNC_API_URL (and FIELDSYNC_API_TOKEN if the service needs one)."
    )]
    RemoteNotConfigured,
}
