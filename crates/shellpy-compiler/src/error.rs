/// Error types for the shellpy compiler

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Not a shellpy source (expected a .spy file): {0}")]
    UnsupportedSource(PathBuf),

    #[error("Source is not valid UTF-8: {0}")]
    Encoding(PathBuf),

    #[error("Fingerprint serialization error: {0}")]
    Fingerprint(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Execution configuration error: {0}")]
    Exec(#[from] shellpy_exec::Error),

    #[error("Module resolution error for {path}: {reason}")]
    ModuleResolution { path: String, reason: String },
}

impl CompileError {
    pub fn module_resolution(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CompileError::ModuleResolution {
            path: path.into().display().to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure to resolve an import through a [`crate::module::ModuleHost`].
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("No module named '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Compile(#[from] CompileError),
}
