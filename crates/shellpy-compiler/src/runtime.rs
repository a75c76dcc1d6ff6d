/// Runtime support code for compiled scripts
///
/// Compiled files import `exe` from a small Python module that is installed
/// once into the root of the output tree. The module mirrors the behavior of
/// `shellpy_exec` (flags, configuration snapshot, results, the non-zero
/// return code error), offers `Dir` for per-block working directories, and
/// bridges `import` of shellpy sources back to the `shellpy resolve` command.
/// Plain Python programs can use the same bridge through `init()` once the
/// runtime directory (printed by `shellpy runtime`) is on their path.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::layout::OutputLayout;

/// Module name of the runtime, importable once its directory is on `sys.path`.
pub const RUNTIME_MODULE: &str = "shellpy_runtime";

/// Host interpreter version used in root shebangs when none is given.
pub const DEFAULT_HOST_VERSION: &str = "3";

const RUNTIME_CODE: &str = r#"# shellpy runtime support, installed by the shellpy compiler
from __future__ import print_function
import json
import os
import subprocess
import sys

PARAMS_ENV = 'SHELLPY_PARAMS'
BIN_ENV = 'SHELLPY_BIN'
SOURCE_SUFFIX = '.spy'
MODULE_ENTRY = '__init__'

_PARAM_PRINT_STDOUT = 'p'
_PARAM_PRINT_STDERR = 'e'
_PARAM_INTERACTIVE = 'i'
_PARAM_NO_THROW = 'n'


class Config(object):
    def __init__(self, print_all_commands=False, print_stdout_always=False,
                 print_stderr_always=False, throw_on_error=True, **_):
        self.print_all_commands = print_all_commands
        self.print_stdout_always = print_stdout_always
        self.print_stderr_always = print_stderr_always
        self.throw_on_error = throw_on_error


def _load_config():
    value = os.environ.get(PARAMS_ENV)
    if not value:
        return Config()
    return Config(**json.loads(value))


config = _load_config()


class ShellpyError(Exception):
    pass


class NonZeroReturnCodeError(ShellpyError):
    def __init__(self, cmd, result):
        ShellpyError.__init__(self, cmd, result.returncode)
        self.cmd = cmd
        self.result = result

    def __str__(self):
        return "Command '{0}' failed with error code {1}, stderr output is {2}".format(
            self.cmd, self.result.returncode, self.result.stderr)


def _decode(data):
    return data.decode(sys.getdefaultencoding(), 'replace')


class Result(object):
    def __init__(self, stdout_lines, stderr_lines, returncode):
        self.stdout_lines = stdout_lines
        self.stderr_lines = stderr_lines
        self.returncode = returncode

    @property
    def stdout(self):
        return os.linesep.join(self.stdout_lines)

    @property
    def stderr(self):
        return os.linesep.join(self.stderr_lines)

    def __str__(self):
        return self.stdout

    def __iter__(self):
        return iter(self.stdout_lines)

    def __eq__(self, other):
        return str(self) == str(other)

    def __ne__(self, other):
        return not self == other

    __hash__ = None

    def __bool__(self):
        return self.returncode == 0

    __nonzero__ = __bool__


class _Stream(object):
    def __init__(self, file, echo=None):
        self._file = file
        self._echo = echo

    def __iter__(self):
        return self

    def __next__(self):
        line = self.sreadline()
        if line is None:
            raise StopIteration
        return line

    next = __next__

    def sreadline(self):
        line = self._file.readline()
        if not line:
            return None
        line = _decode(line).rstrip('\r\n')
        if self._echo is not None:
            print(line, file=self._echo)
        return line

    def swriteline(self, text):
        self._file.write((text + os.linesep).encode(sys.getdefaultencoding()))
        self._file.flush()


class InteractiveResult(object):
    def __init__(self, process, params):
        self._process = process
        self.stdin = _Stream(process.stdin)
        print_stdout = _PARAM_PRINT_STDOUT in params or config.print_stdout_always
        print_stderr = _PARAM_PRINT_STDERR in params or config.print_stderr_always
        self.stdout = _Stream(process.stdout, sys.stdout if print_stdout else None)
        self.stderr = _Stream(process.stderr, sys.stderr if print_stderr else None)

    def sreadline(self):
        return self.stdout.sreadline()

    def swriteline(self, text):
        self.stdin.swriteline(text)

    @property
    def returncode(self):
        if self._process.stdin and not self._process.stdin.closed:
            self._process.stdin.close()
        self._process.wait()
        return self._process.returncode

    def __iter__(self):
        return iter(self.stdout)

    def __bool__(self):
        return self.returncode == 0

    __nonzero__ = __bool__


def _lines(data):
    text = _decode(data)
    if not text:
        return []
    return [line.rstrip('\r') for line in text.rstrip('\n').split('\n')]


def _create_result(cmd, params):
    process = subprocess.Popen(cmd, shell=True, stdout=subprocess.PIPE,
                               stderr=subprocess.PIPE, env=os.environ)
    out, err = process.communicate()
    result = Result(_lines(out), _lines(err), process.returncode)

    if (_PARAM_PRINT_STDOUT in params or config.print_stdout_always) and result.stdout:
        print(result.stdout)
    if (_PARAM_PRINT_STDERR in params or config.print_stderr_always) and result.stderr:
        print(result.stderr, file=sys.stderr)

    if result.returncode != 0 and _PARAM_NO_THROW not in params and config.throw_on_error:
        raise NonZeroReturnCodeError(cmd, result)
    return result


def _create_interactive_result(cmd, params):
    process = subprocess.Popen(cmd, shell=True, stdin=subprocess.PIPE,
                               stdout=subprocess.PIPE, stderr=subprocess.PIPE,
                               env=os.environ)
    return InteractiveResult(process, params)


def exe(cmd, params):
    if config.print_all_commands:
        print('>>> ' + cmd)
    sys.stdout.flush()
    if _PARAM_INTERACTIVE in params:
        return _create_interactive_result(cmd, params)
    return _create_result(cmd, params)


class Dir(object):
    """Runs the commands of a `with` block in another working directory."""

    def __init__(self, directory):
        self.directory = directory
        self._previous = []

    def __enter__(self):
        self._previous.append(os.getcwd())
        os.chdir(self.directory)
        return self

    def __exit__(self, exc_type, exc_value, traceback):
        os.chdir(self._previous.pop())


def _search_path():
    return [entry or os.getcwd() for entry in sys.path if isinstance(entry, str)]


def _has_source(name, entries):
    for entry in entries:
        if os.path.isfile(os.path.join(entry, name + SOURCE_SUFFIX)):
            return True
        if os.path.isfile(os.path.join(entry, name, MODULE_ENTRY + SOURCE_SUFFIX)):
            return True
    return False


class _ShellpyFinder(object):
    """Compiles shellpy sources through `shellpy resolve` ahead of normal lookup."""

    def __init__(self):
        self._found = {}

    def _resolve(self, fullname):
        if '.' in fullname:
            return None
        entries = _search_path()
        if not _has_source(fullname, entries):
            return None
        command = [os.environ.get(BIN_ENV, 'shellpy'), 'resolve', fullname, '--']
        command.extend(entries)
        try:
            out = subprocess.check_output(command)
        except (OSError, subprocess.CalledProcessError):
            return None
        dirs = [entry for entry in _lines(out) if entry]
        for entry in dirs:
            if entry not in sys.path:
                sys.path.append(entry)
        return dirs or None

    def find_spec(self, fullname, path=None, target=None):
        dirs = self._resolve(fullname)
        if dirs is None:
            return None
        import importlib
        from importlib.machinery import PathFinder
        importlib.invalidate_caches()
        return PathFinder.find_spec(fullname, dirs)

    def find_module(self, fullname, path=None):
        dirs = self._resolve(fullname)
        if dirs is None:
            return None
        self._found[fullname] = dirs
        return self

    def load_module(self, fullname):
        import imp
        if fullname in sys.modules:
            return sys.modules[fullname]
        found = imp.find_module(fullname, self._found.pop(fullname, None))
        try:
            return imp.load_module(fullname, *found)
        finally:
            if found[0]:
                found[0].close()


_finder = _ShellpyFinder()


def install_import_hook():
    if _finder not in sys.meta_path:
        sys.meta_path.insert(0, _finder)


def uninstall_import_hook():
    if _finder in sys.meta_path:
        sys.meta_path.remove(_finder)


def init():
    """Make shellpy sources importable from a plain Python program."""
    install_import_hook()


def uninit():
    uninstall_import_hook()
"#;

pub fn get_runtime_code() -> &'static str {
    RUNTIME_CODE
}

/// Path of the runtime module inside `layout`.
pub fn runtime_path(layout: &OutputLayout) -> PathBuf {
    layout.root().join(format!("{RUNTIME_MODULE}.py"))
}

/// Write the runtime module into the layout root unless it is already current.
pub fn install(layout: &OutputLayout) -> Result<PathBuf> {
    let path = runtime_path(layout);
    if std::fs::read_to_string(&path).is_ok_and(|existing| existing == RUNTIME_CODE) {
        return Ok(path);
    }

    std::fs::create_dir_all(layout.root())?;
    let mut file = tempfile::NamedTempFile::new_in(layout.root())?;
    file.write_all(RUNTIME_CODE.as_bytes())?;
    file.persist(&path).map_err(|e| e.error)?;
    tracing::debug!("Installed runtime module at {}", path.display());
    Ok(path)
}

/// Leading lines of a compiled file.
#[derive(Debug, Clone)]
pub struct Header<'a> {
    pub root_script: bool,
    pub host_version: &'a str,
    /// Encoding declaration hoisted from the source, without line ending.
    pub encoding_line: Option<&'a str>,
    pub fingerprint: &'a str,
    /// Module docstring and `__future__` imports that must precede the bootstrap.
    pub prologue: &'a str,
    /// Directory holding the runtime module.
    pub runtime_dir: &'a Path,
}

impl Header<'_> {
    pub fn render(&self) -> Result<String> {
        let mut lines = Vec::new();
        if self.root_script {
            lines.push(format!("#!/usr/bin/env python{}", self.host_version));
        }
        if let Some(encoding) = self.encoding_line {
            lines.push(encoding.to_string());
        }
        lines.push(self.fingerprint.to_string());
        let prologue = self.prologue.trim_end_matches(['\n', '\r']);
        if !prologue.is_empty() {
            lines.push(prologue.to_string());
        }

        let runtime_dir = ascii_literal(&self.runtime_dir.to_string_lossy())?;
        lines.push("import sys as _shellpy_sys".to_string());
        lines.push(format!(
            "if {runtime_dir} not in _shellpy_sys.path: _shellpy_sys.path.append({runtime_dir})"
        ));
        lines.push(format!("from {RUNTIME_MODULE} import exe"));
        if self.root_script {
            lines.push(format!("import {RUNTIME_MODULE} as _shellpy_runtime"));
            lines.push("_shellpy_runtime.install_import_hook()".to_string());
        }

        let mut header = lines.join("\n");
        header.push('\n');
        Ok(header)
    }
}

/// Python string literal for `text` using only ASCII, so it reads the same
/// under any source encoding.
fn ascii_literal(text: &str) -> Result<String> {
    let json = serde_json::to_string(text)?;
    let mut literal = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            literal.push(c);
        } else {
            literal.push_str(&format!("\\U{:08x}", u32::from(c)));
        }
    }
    Ok(literal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn header(root_script: bool, encoding_line: Option<&str>) -> String {
        Header {
            root_script,
            host_version: DEFAULT_HOST_VERSION,
            encoding_line,
            fingerprint: "#shellpy-meta:{\"mtime\":\"1.000000000\"}",
            prologue: "",
            runtime_dir: Path::new("/tmp/shellpy_me"),
        }
        .render()
        .unwrap()
    }

    #[test]
    fn test_root_header() {
        let text = header(true, Some("# -*- coding: latin-1 -*-"));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#!/usr/bin/env python3");
        assert_eq!(lines[1], "# -*- coding: latin-1 -*-");
        assert!(lines[2].starts_with("#shellpy-meta:"));
        assert!(text.contains("from shellpy_runtime import exe\n"));
        assert!(text.ends_with("_shellpy_runtime.install_import_hook()\n"));
    }

    #[test]
    fn test_module_header_has_no_shebang_or_hook() {
        let text = header(false, None);
        assert!(text.starts_with("#shellpy-meta:"));
        assert!(text.contains("_shellpy_sys.path.append(\"/tmp/shellpy_me\")"));
        assert!(!text.contains("install_import_hook"));
    }

    #[test]
    fn test_prologue_precedes_bootstrap() {
        let text = Header {
            root_script: false,
            host_version: DEFAULT_HOST_VERSION,
            encoding_line: None,
            fingerprint: "#shellpy-meta:{}",
            prologue: "\"\"\"Tools.\"\"\"\nfrom __future__ import annotations\n",
            runtime_dir: Path::new("/tmp/shellpy_me"),
        }
        .render()
        .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#shellpy-meta:{}");
        assert_eq!(lines[1], "\"\"\"Tools.\"\"\"");
        assert_eq!(lines[2], "from __future__ import annotations");
        assert_eq!(lines[3], "import sys as _shellpy_sys");
    }

    #[test]
    fn test_runtime_dir_literal_is_ascii() {
        assert_eq!(
            ascii_literal("/tmp/shellpy_jos\u{e9}").unwrap(),
            "\"/tmp/shellpy_jos\\U000000e9\""
        );
        assert_eq!(ascii_literal("C:\\tmp").unwrap(), "\"C:\\\\tmp\"");
    }

    #[test]
    fn test_runtime_hook_goes_first() {
        let code = get_runtime_code();
        assert!(code.contains("sys.meta_path.insert(0, _finder)"));
        assert!(code.contains("def init():"));
        assert!(code.contains("class Dir(object):"));
    }

    #[test]
    fn test_install_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::at(dir.path().join("ns"));

        let path = install(&layout).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), get_runtime_code());
        assert_eq!(install(&layout).unwrap(), path);
    }

    #[test]
    fn test_install_replaces_stale_runtime() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::at(dir.path());
        std::fs::write(runtime_path(&layout), "old").unwrap();

        install(&layout).unwrap();
        assert_eq!(
            std::fs::read_to_string(runtime_path(&layout)).unwrap(),
            get_runtime_code()
        );
    }

    #[test]
    fn test_runtime_defines_entry_point() {
        let entry_point = format!("def {}(cmd, params):", crate::codegen::ENTRY_POINT);
        assert!(get_runtime_code().contains(&entry_point));
    }
}
