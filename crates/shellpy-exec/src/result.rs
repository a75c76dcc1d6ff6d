//! Captured result of a shell command.

use std::fmt;

/// Line separator used when joining captured lines back into text.
#[cfg(windows)]
const LINESEP: &str = "\r\n";
#[cfg(not(windows))]
const LINESEP: &str = "\n";

/// Result of a non-interactive command execution.
///
/// Displays as its stdout text, compares equal to strings with the same
/// stdout, and iterates over stdout lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Every line written to stdout, without line terminators.
    pub stdout_lines: Vec<String>,
    /// Every line written to stderr, without line terminators.
    pub stderr_lines: Vec<String>,
    /// Exit code of the process; negated signal number if it was killed.
    pub returncode: i32,
}

impl ExecResult {
    pub(crate) fn from_output(stdout: &[u8], stderr: &[u8], returncode: i32) -> Self {
        Self {
            stdout_lines: split_lines(stdout),
            stderr_lines: split_lines(stderr),
            returncode,
        }
    }

    /// Stdout as text.
    pub fn stdout(&self) -> String {
        self.stdout_lines.join(LINESEP)
    }

    /// Stderr as text.
    pub fn stderr(&self) -> String {
        self.stderr_lines.join(LINESEP)
    }

    pub fn is_success(&self) -> bool {
        self.returncode == 0
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stdout())
    }
}

impl PartialEq<str> for ExecResult {
    fn eq(&self, other: &str) -> bool {
        self.stdout() == other
    }
}

impl PartialEq<&str> for ExecResult {
    fn eq(&self, other: &&str) -> bool {
        self.stdout() == *other
    }
}

impl<'a> IntoIterator for &'a ExecResult {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.stdout_lines.iter()
    }
}
