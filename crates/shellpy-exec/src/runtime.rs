//! Runtime environment for executing embedded shell commands.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::Sender;

use crate::config::ExecConfig;
use crate::error::Error;
use crate::flags::Flags;
use crate::interactive::{Echo, InteractiveResult};
use crate::result::ExecResult;

/// A sink for printed output, allowing redirection away from the console.
pub type PrintSink = Sender<String>;

/// Outcome of [`Executor::exe`].
#[derive(Debug)]
pub enum Execution {
    /// The command ran to completion and its output was captured.
    Captured(ExecResult),
    /// The command is still running; read and write its streams line by line.
    Interactive(InteractiveResult),
}

impl Execution {
    /// The captured result, if the command was not interactive.
    pub fn captured(self) -> Option<ExecResult> {
        match self {
            Execution::Captured(result) => Some(result),
            Execution::Interactive(_) => None,
        }
    }

    /// The interactive handle, if the command was interactive.
    pub fn interactive(self) -> Option<InteractiveResult> {
        match self {
            Execution::Interactive(result) => Some(result),
            Execution::Captured(_) => None,
        }
    }
}

/// Executes shell commands according to a global [`ExecConfig`].
///
/// Holds the configuration, optional print sinks, and the working directory
/// commands run in.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecConfig,
    /// Sink for stdout echoes. If None, prints go to stdout.
    stdout_sink: Option<PrintSink>,
    /// Sink for stderr echoes. If None, prints go to stderr.
    stderr_sink: Option<PrintSink>,
    /// Directory commands run in. If None, the current directory.
    working_dir: Option<PathBuf>,
}

impl Executor {
    /// Create an executor with the given configuration.
    pub fn new(config: ExecConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Create an executor from the configuration snapshot in the environment.
    pub fn from_env() -> crate::Result<Self> {
        Ok(Self::new(ExecConfig::from_env()?))
    }

    /// Redirect echoed stdout and stderr text into channels.
    pub fn with_print_sinks(mut self, stdout: PrintSink, stderr: PrintSink) -> Self {
        self.stdout_sink = Some(stdout);
        self.stderr_sink = Some(stderr);
        self
    }

    /// Run commands in `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Execute `cmd` with the flag letters in `params`.
    ///
    /// This is the entry point generated code calls for every embedded command.
    pub fn exe(&self, cmd: &str, params: &str) -> crate::Result<Execution> {
        let flags = Flags::parse(params);

        if self.config.print_all_commands {
            self.print_stdout(format!(">>> {}", cmd));
        }

        if flags.interactive {
            self.spawn_interactive(cmd, flags).map(Execution::Interactive)
        } else {
            self.run(cmd, flags).map(Execution::Captured)
        }
    }

    /// Run `cmd` to completion and capture its output.
    pub fn run(&self, cmd: &str, flags: Flags) -> crate::Result<ExecResult> {
        tracing::debug!("running command: {}", cmd);

        let output = self
            .shell_command(cmd)
            .stdin(Stdio::inherit())
            .output()
            .map_err(|source| Error::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        let result = ExecResult::from_output(
            &output.stdout,
            &output.stderr,
            exit_code(output.status),
        );

        let stdout = result.stdout();
        if self.prints_stdout(flags) && !stdout.is_empty() {
            self.print_stdout(stdout);
        }

        let stderr = result.stderr();
        if self.prints_stderr(flags) && !stderr.is_empty() {
            self.print_stderr(stderr);
        }

        if !result.is_success() && !flags.no_throw && self.config.throw_on_error {
            return Err(Error::NonZeroReturnCode {
                command: cmd.to_string(),
                result,
            });
        }

        Ok(result)
    }

    /// Start `cmd` with piped streams for line-by-line interaction.
    pub fn spawn_interactive(&self, cmd: &str, flags: Flags) -> crate::Result<InteractiveResult> {
        tracing::debug!("spawning interactive command: {}", cmd);

        let child = self
            .shell_command(cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        let stdout_echo = self
            .prints_stdout(flags)
            .then(|| Echo::new(self.stdout_sink.clone(), false));
        let stderr_echo = self
            .prints_stderr(flags)
            .then(|| Echo::new(self.stderr_sink.clone(), true));

        Ok(InteractiveResult::new(child, stdout_echo, stderr_echo))
    }

    fn prints_stdout(&self, flags: Flags) -> bool {
        flags.print_stdout || self.config.print_stdout_always
    }

    fn prints_stderr(&self, flags: Flags) -> bool {
        flags.print_stderr || self.config.print_stderr_always
    }

    fn shell_command(&self, cmd: &str) -> Command {
        #[cfg(windows)]
        let mut command = {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(cmd);
            command
        };
        #[cfg(not(windows))]
        let mut command = {
            let mut command = Command::new("sh");
            command.arg("-c").arg(cmd);
            command
        };

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Send text to the stdout sink, or stdout if no sink is configured.
    fn print_stdout(&self, text: String) {
        emit(self.stdout_sink.as_ref(), text, false);
    }

    /// Send text to the stderr sink, or stderr if no sink is configured.
    fn print_stderr(&self, text: String) {
        emit(self.stderr_sink.as_ref(), text, true);
    }
}

pub(crate) fn emit(sink: Option<&PrintSink>, text: String, to_stderr: bool) {
    match sink {
        Some(sink) => {
            // A dropped receiver only means nobody is listening any more.
            if sink.send(text).is_err() {
                tracing::debug!("print sink disconnected");
            }
        }
        None if to_stderr => eprintln!("{}", text),
        None => println!("{}", text),
    }
}

pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
