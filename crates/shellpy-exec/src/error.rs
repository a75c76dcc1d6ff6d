//! Error types for command execution.

use thiserror::Error;

use crate::result::ExecResult;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Command '{command}' failed with error code {}, stderr output is {}",
        .result.returncode,
        .result.stderr()
    )]
    NonZeroReturnCode { command: String, result: ExecResult },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration snapshot: {0}")]
    Config(#[source] serde_json::Error),

    #[error("No value bound for placeholder '{0}'")]
    UnboundPlaceholder(String),

    #[error("Unsupported placeholder '{{{0}}}': only plain names can be rendered")]
    UnsupportedPlaceholder(String),
}

impl Error {
    /// The return code carried by a `NonZeroReturnCode` failure.
    pub fn returncode(&self) -> Option<i32> {
        match self {
            Error::NonZeroReturnCode { result, .. } => Some(result.returncode),
            _ => None,
        }
    }
}
