//! Interactive command handle.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout};

use crate::runtime::{emit, exit_code, PrintSink};

/// Where echoed lines of an interactive stream go.
#[derive(Debug, Clone)]
pub(crate) struct Echo {
    sink: Option<PrintSink>,
    to_stderr: bool,
}

impl Echo {
    pub(crate) fn new(sink: Option<PrintSink>, to_stderr: bool) -> Self {
        Self { sink, to_stderr }
    }

    fn line(&self, line: &str) {
        emit(self.sink.as_ref(), line.to_string(), self.to_stderr);
    }
}

/// A running command whose streams are consumed line by line.
///
/// Iterating yields stdout lines until the stream closes. Lines are echoed
/// as they are read when the command carries `p` (stdout) or `e` (stderr).
#[derive(Debug)]
pub struct InteractiveResult {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<BufReader<ChildStderr>>,
    stdout_echo: Option<Echo>,
    stderr_echo: Option<Echo>,
}

impl InteractiveResult {
    pub(crate) fn new(
        mut child: Child,
        stdout_echo: Option<Echo>,
        stderr_echo: Option<Echo>,
    ) -> Self {
        Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take().map(BufReader::new),
            stderr: child.stderr.take().map(BufReader::new),
            child,
            stdout_echo,
            stderr_echo,
        }
    }

    /// Read the next stdout line, or `None` once the stream is closed.
    pub fn read_line(&mut self) -> crate::Result<Option<String>> {
        read_echoed(self.stdout.as_mut(), self.stdout_echo.as_ref())
    }

    /// Read the next stderr line, or `None` once the stream is closed.
    pub fn read_stderr_line(&mut self) -> crate::Result<Option<String>> {
        read_echoed(self.stderr.as_mut(), self.stderr_echo.as_ref())
    }

    /// Write one line to the command's stdin and flush it.
    pub fn write_line(&mut self, text: &str) -> crate::Result<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            writeln!(stdin, "{}", text)?;
            stdin.flush()?;
        }
        Ok(())
    }

    /// Close stdin so the command sees end of input.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Wait for the command to finish and return its exit code.
    pub fn returncode(&mut self) -> crate::Result<i32> {
        self.close_stdin();
        let status = self.child.wait()?;
        Ok(exit_code(status))
    }
}

fn read_echoed<R: BufRead>(
    reader: Option<&mut R>,
    echo: Option<&Echo>,
) -> crate::Result<Option<String>> {
    let Some(reader) = reader else {
        return Ok(None);
    };

    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }

    let line = line.trim_end_matches(['\n', '\r']).to_string();
    if let Some(echo) = echo {
        echo.line(&line);
    }
    Ok(Some(line))
}

impl Iterator for InteractiveResult {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match self.read_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("stopped reading interactive output: {}", e);
                None
            }
        }
    }
}
