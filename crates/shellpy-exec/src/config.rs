//! Global execution behavior, shared between a launcher and its child scripts.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Environment variable carrying the serialized [`ExecConfig`] snapshot.
pub const PARAMS_ENV: &str = "SHELLPY_PARAMS";

/// Configuration flags applied to every executed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Echo every command (`>>> cmd`) before running it.
    pub print_all_commands: bool,
    /// Print stdout of every command, as if each carried the `p` flag.
    pub print_stdout_always: bool,
    /// Print stderr of every command, as if each carried the `e` flag.
    pub print_stderr_always: bool,
    /// Raise on a non-zero return code unless the command carries `n`.
    pub throw_on_error: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            print_all_commands: false,
            print_stdout_always: false,
            print_stderr_always: false,
            throw_on_error: true,
        }
    }
}

impl ExecConfig {
    /// Serialize the snapshot for the [`PARAMS_ENV`] variable.
    pub fn to_env_value(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(Error::Config)
    }

    /// Reconstruct a snapshot produced by [`ExecConfig::to_env_value`].
    pub fn from_env_value(value: &str) -> crate::Result<Self> {
        serde_json::from_str(value).map_err(Error::Config)
    }

    /// Read the snapshot from the environment, falling back to defaults when unset.
    pub fn from_env() -> crate::Result<Self> {
        match std::env::var(PARAMS_ENV) {
            Ok(value) => Self::from_env_value(&value),
            Err(_) => Ok(Self::default()),
        }
    }
}
