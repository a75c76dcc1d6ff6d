/// Staleness check for compiled output
///
/// Every non-root compiled file carries a fingerprint line near its top
/// recording the source's modification time. The output is fresh only while
/// that record matches the source exactly.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tag of the fingerprint comment, `#shellpy-meta:{...}`.
pub const FINGERPRINT_TAG: &str = "shellpy-meta";

/// Number of leading output lines searched for the fingerprint.
pub const SCAN_WINDOW: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub mtime: String,
}

impl Fingerprint {
    pub fn for_source(source: &Path) -> Result<Self> {
        Ok(Self {
            mtime: source_mtime(source)?,
        })
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(format!("#{}:{}", FINGERPRINT_TAG, serde_json::to_string(self)?))
    }

    /// Parse a fingerprint line.
    ///
    /// `Ok(None)` when the line is not a fingerprint at all, an error when it
    /// carries the tag but the record is malformed.
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let prefix = format!("#{}:", FINGERPRINT_TAG);
        match line.trim_end().strip_prefix(&prefix) {
            Some(record) => Ok(Some(serde_json::from_str(record)?)),
            None => Ok(None),
        }
    }
}

/// Modification time of `path` as `<secs>.<nanos>`, nanoseconds zero-padded.
pub fn source_mtime(path: &Path) -> Result<String> {
    let modified = std::fs::metadata(path)?.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(format!(
        "{}.{:09}",
        since_epoch.as_secs(),
        since_epoch.subsec_nanos()
    ))
}

/// Whether `output` must be regenerated from `source`.
///
/// Any failure to read either side, or a damaged fingerprint, counts as
/// stale.
pub fn is_recompilation_needed(source: &Path, output: &Path) -> bool {
    if !output.exists() {
        tracing::debug!("No compiled output for {}", source.display());
        return true;
    }

    match stored_fingerprint(output) {
        Ok(Some(stored)) => match source_mtime(source) {
            Ok(current) if current == stored.mtime => {
                tracing::debug!("Cache hit: {}", output.display());
                false
            }
            Ok(_) => {
                tracing::debug!("Source changed since last compile: {}", source.display());
                true
            }
            Err(e) => {
                tracing::debug!("Cannot stat {}: {}", source.display(), e);
                true
            }
        },
        Ok(None) => {
            tracing::debug!("No fingerprint in {}", output.display());
            true
        }
        Err(e) => {
            tracing::warn!("Ignoring corrupt fingerprint in {}: {}", output.display(), e);
            true
        }
    }
}

fn stored_fingerprint(output: &Path) -> Result<Option<Fingerprint>> {
    let mut reader = BufReader::new(File::open(output)?);
    let mut buf = Vec::new();
    for _ in 0..SCAN_WINDOW {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if let Some(fingerprint) = Fingerprint::parse_line(&String::from_utf8_lossy(&buf))? {
            return Ok(Some(fingerprint));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    fn write_output(dir: &TempDir, source: &Path, leading_lines: &[&str]) -> std::path::PathBuf {
        let output = dir.path().join("out.py");
        let mut text = String::new();
        for line in leading_lines {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str(&Fingerprint::for_source(source).unwrap().to_line().unwrap());
        text.push_str("\nprint(1)\n");
        fs::write(&output, text).unwrap();
        output
    }

    #[test]
    fn test_fingerprint_line_format() {
        let fingerprint = Fingerprint {
            mtime: "12.000000005".to_string(),
        };
        assert_eq!(
            fingerprint.to_line().unwrap(),
            "#shellpy-meta:{\"mtime\":\"12.000000005\"}"
        );
        assert_eq!(
            Fingerprint::parse_line("#shellpy-meta:{\"mtime\":\"12.000000005\"}\n").unwrap(),
            Some(fingerprint)
        );
        assert_eq!(Fingerprint::parse_line("import os").unwrap(), None);
    }

    #[test]
    fn test_missing_output_needs_compile() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.spy");
        fs::write(&source, "x = 1\n").unwrap();
        assert!(is_recompilation_needed(&source, &dir.path().join("a.py")));
    }

    #[test]
    fn test_fresh_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.spy");
        fs::write(&source, "x = 1\n").unwrap();
        let output = write_output(&dir, &source, &["# -*- coding: utf-8 -*-"]);
        assert!(!is_recompilation_needed(&source, &output));
    }

    #[test]
    fn test_touched_source_is_stale() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.spy");
        fs::write(&source, "x = 1\n").unwrap();
        filetime::set_file_mtime(&source, FileTime::from_unix_time(1_000_000, 0)).unwrap();
        let output = write_output(&dir, &source, &[]);

        filetime::set_file_mtime(&source, FileTime::from_unix_time(2_000_000, 0)).unwrap();
        assert!(is_recompilation_needed(&source, &output));
    }

    #[test]
    fn test_fingerprint_outside_window_is_ignored() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.spy");
        fs::write(&source, "x = 1\n").unwrap();
        let output = write_output(&dir, &source, &["#!", "#", "#"]);
        assert!(is_recompilation_needed(&source, &output));
    }

    #[test]
    fn test_corrupt_fingerprint_is_stale() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.spy");
        fs::write(&source, "x = 1\n").unwrap();
        let output = dir.path().join("a.py");
        fs::write(&output, "#shellpy-meta:{not json\n").unwrap();
        assert!(is_recompilation_needed(&source, &output));
    }

    #[test]
    fn test_missing_source_is_stale() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("a.py");
        fs::write(&output, "#shellpy-meta:{\"mtime\":\"1.000000000\"}\n").unwrap();
        assert!(is_recompilation_needed(&dir.path().join("gone.spy"), &output));
    }

    #[test]
    fn test_mtime_keeps_nanoseconds() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.spy");
        fs::write(&source, "").unwrap();
        filetime::set_file_mtime(&source, FileTime::from_unix_time(1_700_000_000, 42)).unwrap();
        assert_eq!(source_mtime(&source).unwrap(), "1700000000.000000042");
    }
}
