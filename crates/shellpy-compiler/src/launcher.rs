/// Running a compiled root script
///
/// The script runs as a child process with the environment a shellpy child
/// expects: its own directory on `PYTHONPATH`, the execution configuration
/// snapshot, the path of this binary for import resolution, and the cache
/// root in use.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use shellpy_exec::{ExecConfig, PARAMS_ENV};

use crate::driver::Compiler;
use crate::error::{CompileError, Result};

/// Search-path variable of the host interpreter.
pub const SEARCH_PATH_ENV: &str = "PYTHONPATH";

/// Path of the `shellpy` binary, used by the runtime import hook.
pub const BIN_ENV: &str = "SHELLPY_BIN";

/// Cache root override shared with child invocations.
pub const CACHE_DIR_ENV: &str = "SHELLPY_CACHE_DIR";

/// Environment variables set for a launched script.
pub fn launch_environment(
    script: &Path,
    config: &ExecConfig,
    cache_root: Option<&Path>,
) -> Result<Vec<(&'static str, OsString)>> {
    let script_dir = std::path::absolute(script)?
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut search_path: Vec<PathBuf> = std::env::var_os(SEARCH_PATH_ENV)
        .map(|value| std::env::split_paths(&value).collect())
        .unwrap_or_default();
    if !search_path.contains(&script_dir) {
        search_path.push(script_dir);
    }
    let search_path = std::env::join_paths(search_path)
        .map_err(|e| CompileError::Io(std::io::Error::other(e)))?;

    let mut env = vec![
        (SEARCH_PATH_ENV, search_path),
        (PARAMS_ENV, OsString::from(config.to_env_value()?)),
    ];
    if let Ok(bin) = std::env::current_exe() {
        env.push((BIN_ENV, bin.into_os_string()));
    }
    if let Some(root) = cache_root {
        env.push((CACHE_DIR_ENV, std::path::absolute(root)?.into_os_string()));
    }
    Ok(env)
}

/// Compile `source` as a root script and run it, returning its exit code.
pub fn run_script(
    compiler: &Compiler,
    cache_root: Option<&Path>,
    source: &Path,
    args: &[String],
    config: &ExecConfig,
) -> Result<i32> {
    let output = compiler.preprocess_file(source, true)?;
    let mut command = script_command(&output);
    command.args(args);
    command.envs(launch_environment(source, config, cache_root)?);

    tracing::debug!("Running {}", output.display());
    let status = command.status()?;
    Ok(exit_code(status))
}

#[cfg(unix)]
fn script_command(output: &Path) -> Command {
    Command::new(output)
}

#[cfg(not(unix))]
fn script_command(output: &Path) -> Command {
    let mut command = Command::new("python");
    command.arg(output);
    command
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
