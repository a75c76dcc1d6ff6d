/// Compiler driver that orchestrates the compilation pipeline

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::cache::{self, Fingerprint};
use crate::codegen;
use crate::error::{CompileError, Result};
use crate::layout::OutputLayout;
use crate::locator::{self, SOURCE_EXTENSION};
use crate::runtime::{self, Header, DEFAULT_HOST_VERSION};

/// Directory the host interpreter caches bytecode in.
const BYTECODE_DIR: &str = "__pycache__";

/// PEP 263 encoding declaration.
static ENCODING_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t\f]*#.*?coding[:=][ \t]*([-\w.]+)").expect("valid encoding regex")
});

/// Options for compilation
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Directory under which the per-user namespace is created (defaults to the system temp dir)
    pub cache_root: Option<PathBuf>,
    /// Interpreter version written into root shebangs (defaults to "3")
    pub host_version: Option<String>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(dir.into());
        self
    }

    pub fn host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = Some(version.into());
        self
    }
}

/// The shellpy compiler
#[derive(Debug, Clone)]
pub struct Compiler {
    options: CompileOptions,
    layout: OutputLayout,
}

impl Compiler {
    /// Create a new compiler with the given options
    pub fn new(options: CompileOptions) -> Self {
        let layout = match &options.cache_root {
            Some(root) => OutputLayout::under(root),
            None => OutputLayout::for_current_user(),
        };
        Self { options, layout }
    }

    /// Create a compiler writing into an explicit output tree
    pub fn with_layout(options: CompileOptions, layout: OutputLayout) -> Self {
        Self { options, layout }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Where the compiled form of `source` lives
    pub fn output_path(&self, source: &Path) -> Result<PathBuf> {
        self.layout.compiled_path(source)
    }

    /// Compile one source file and return the path of its output.
    ///
    /// Non-root files are skipped while their output is fresh; root scripts
    /// are always rebuilt and get a shebang, the executable bit and the
    /// runtime import hook.
    pub fn preprocess_file(&self, source: &Path, is_root: bool) -> Result<PathBuf> {
        if source.extension().is_none_or(|ext| ext != SOURCE_EXTENSION) {
            return Err(CompileError::UnsupportedSource(source.to_path_buf()));
        }
        if !source.is_file() {
            return Err(CompileError::FileNotFound(source.to_path_buf()));
        }

        let output = self.output_path(source)?;
        if !is_root && !cache::is_recompilation_needed(source, &output) {
            return Ok(output);
        }

        tracing::debug!("Compiling: {} -> {}", source.display(), output.display());

        create_private_dir(parent_dir(&output)?)?;
        runtime::install(&self.layout)?;

        // Stat before reading so an edit in between leaves the output stale.
        let fingerprint = Fingerprint::for_source(source)?.to_line()?;
        let (text, encoding) = read_source(source)?;
        let (encoding_line, body) = split_encoding_declaration(&text);
        let (prologue, body) = split_prologue(&body);

        let header = Header {
            root_script: is_root,
            host_version: self
                .options
                .host_version
                .as_deref()
                .unwrap_or(DEFAULT_HOST_VERSION),
            encoding_line,
            fingerprint: &fingerprint,
            prologue,
            runtime_dir: self.layout.root(),
        }
        .render()?;

        let mut code = header;
        code.push_str(&codegen::preprocess_code(body));

        let bytes = encoding.encode(source, code)?;
        write_atomic(&output, &bytes, source, is_root)?;
        remove_stale_bytecode(&output);
        tracing::debug!("Wrote {} bytes to {}", bytes.len(), output.display());
        Ok(output)
    }

    /// Compile every source below `module_dir` as a non-root file.
    ///
    /// Returns the output directory mirroring `module_dir`.
    pub fn preprocess_module(&self, module_dir: &Path) -> Result<PathBuf> {
        if !module_dir.is_dir() {
            return Err(CompileError::FileNotFound(module_dir.to_path_buf()));
        }

        let mut compiled = 0;
        for entry in WalkDir::new(module_dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && locator::is_source_file(entry.path()) {
                self.preprocess_file(entry.path(), false)?;
                compiled += 1;
            }
        }

        tracing::debug!("Module {}: {} source files", module_dir.display(), compiled);
        self.layout.translate(module_dir)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

/// Split a PEP 263 declaration from the first two lines of `text`.
///
/// The declaration line is returned separately and removed from the body.
pub fn split_encoding_declaration(text: &str) -> (Option<&str>, String) {
    let mut offset = 0;
    for line in text.split_inclusive('\n').take(2) {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if ENCODING_DECLARATION.is_match(trimmed) {
            let mut body = String::with_capacity(text.len() - line.len());
            body.push_str(&text[..offset]);
            body.push_str(&text[offset + line.len()..]);
            return (Some(trimmed), body);
        }
        offset += line.len();
    }
    (None, text.to_string())
}

/// Codec named by a PEP 263 declaration in the first two lines of `text`.
pub fn declared_encoding(text: &str) -> Option<&str> {
    text.lines()
        .take(2)
        .find_map(|line| ENCODING_DECLARATION.captures(line))
        .and_then(|captures| captures.get(1))
        .map(|codec| codec.as_str())
}

fn is_utf8_codec(codec: &str) -> bool {
    let codec = codec.to_ascii_lowercase().replace('_', "-");
    codec == "utf8" || codec == "utf-8" || codec.starts_with("utf-8-")
}

/// How compiled text is turned back into bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    Utf8,
    /// Source in a declared non-UTF-8 codec, carried as one char per byte.
    Declared,
}

impl TextEncoding {
    fn encode(self, source: &Path, code: String) -> Result<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Ok(code.into_bytes()),
            TextEncoding::Declared => code
                .chars()
                .map(|c| {
                    u8::try_from(c).map_err(|_| CompileError::Encoding(source.to_path_buf()))
                })
                .collect(),
        }
    }
}

/// Read a source as UTF-8, or byte for byte when it declares another codec.
///
/// The embedded shell syntax is plain ASCII, so the pipeline works on the
/// raw bytes of ASCII-compatible codecs and hands them back unchanged.
fn read_source(source: &Path) -> Result<(String, TextEncoding)> {
    let bytes = match String::from_utf8(std::fs::read(source)?) {
        Ok(text) => return Ok((text, TextEncoding::Utf8)),
        Err(e) => e.into_bytes(),
    };

    let text: String = bytes.into_iter().map(char::from).collect();
    match declared_encoding(&text) {
        Some(codec) if !is_utf8_codec(codec) => {
            tracing::debug!("Reading {} as {}", source.display(), codec);
            Ok((text, TextEncoding::Declared))
        }
        _ => Err(CompileError::Encoding(source.to_path_buf())),
    }
}

const FUTURE_IMPORT: &str = "from __future__ import";

/// Split off the statements that must open a Python module: the docstring
/// and `from __future__` imports, with the comments between them.
pub fn split_prologue(body: &str) -> (&str, &str) {
    let mut lines = body.split_inclusive('\n');
    let mut offset = 0;
    let mut end = 0;
    let mut docstring_allowed = true;

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        offset += line.len();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let closer = if trimmed.starts_with(FUTURE_IMPORT) {
            (trimmed.contains('(') && !trimmed.contains(')')).then_some(")")
        } else {
            match docstring_quote(trimmed) {
                Some((quote, rest)) if docstring_allowed => {
                    (!rest.contains(quote)).then_some(quote)
                }
                _ => break,
            }
        };
        docstring_allowed = false;

        if let Some(closer) = closer {
            let mut closed = false;
            for line in lines.by_ref() {
                offset += line.len();
                if line.contains(closer) {
                    closed = true;
                    break;
                }
            }
            if !closed {
                break;
            }
        }
        end = offset;
    }
    body.split_at(end)
}

/// Opening triple quote of a docstring line and the text after it.
fn docstring_quote(line: &str) -> Option<(&'static str, &str)> {
    let unprefixed = line.trim_start_matches(['r', 'R', 'u', 'U']);
    ["\"\"\"", "'''"]
        .into_iter()
        .find_map(|quote| unprefixed.strip_prefix(quote).map(|rest| (quote, rest)))
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent().ok_or_else(|| {
        CompileError::Io(std::io::Error::other(format!(
            "{} has no parent directory",
            path.display()
        )))
    })
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Write `code` next to `output` and rename it into place.
fn write_atomic(output: &Path, code: &[u8], source: &Path, is_root: bool) -> Result<()> {
    let mut file = tempfile::NamedTempFile::new_in(parent_dir(output)?)?;
    file.write_all(code)?;
    file.flush()?;

    let permissions = output_permissions(source, is_root)?;
    file.as_file().set_permissions(permissions)?;
    file.persist(output).map_err(|e| e.error)?;
    Ok(())
}

/// Drop bytecode the host cached for an earlier version of `output`.
fn remove_stale_bytecode(output: &Path) {
    let (Some(dir), Some(stem)) = (output.parent(), output.file_stem()) else {
        return;
    };
    let stem = stem.to_string_lossy();
    let prefix = format!("{stem}.");

    let mut stale = vec![dir.join(format!("{stem}.pyc"))];
    if let Ok(entries) = std::fs::read_dir(dir.join(BYTECODE_DIR)) {
        stale.extend(entries.flatten().map(|entry| entry.path()).filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy())
                .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".pyc"))
        }));
    }

    for path in stale {
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed stale bytecode {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove stale bytecode {}: {}", path.display(), e),
        }
    }
}

#[cfg(unix)]
fn output_permissions(source: &Path, is_root: bool) -> Result<std::fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    let mut mode = std::fs::metadata(source)?.permissions().mode() & 0o7777;
    if is_root {
        mode |= 0o100;
    }
    Ok(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn output_permissions(source: &Path, _is_root: bool) -> Result<std::fs::Permissions> {
    Ok(std::fs::metadata(source)?.permissions())
}
