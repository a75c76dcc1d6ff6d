/// Import of uncompiled shellpy sources
///
/// `ImportHook` sits at the front of a [`ModuleHost`] chain. When normal
/// resolution fails it looks for a matching `.spy` module or file on the
/// search path, compiles it into the output tree, puts the output directory
/// on the search path and resolves again.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::driver::Compiler;
use crate::error::{CompileError, ImportError};
use crate::locator;
use crate::module::{Finder, LoadedModule, ModuleHost};

pub struct ImportHook {
    compiler: Compiler,
}

impl ImportHook {
    pub const ID: &'static str = "shellpy";

    pub fn new(compiler: Compiler) -> Self {
        Self { compiler }
    }

    /// Compile the shellpy source that `name` imports from `roots`, or
    /// confirm its output is fresh.
    ///
    /// Returns the directory holding the output, which the host must have
    /// on its search path, or `None` when no source matches.
    pub fn compile_source(
        &self,
        name: &str,
        roots: &[PathBuf],
    ) -> Result<Option<PathBuf>, CompileError> {
        let root_name = name.split('.').next().unwrap_or(name);
        if let Some(module_dir) = locator::locate_module(root_name, roots) {
            tracing::debug!("Found shellpy module {}", module_dir.display());
            let out_dir = self.compiler.preprocess_module(&module_dir)?;
            return parent_of(&out_dir).map(Some);
        }
        if let Some(file) = locator::locate_file(root_name, roots) {
            tracing::debug!("Found shellpy file {}", file.display());
            let output = self.compiler.preprocess_file(&file, false)?;
            return parent_of(&output).map(Some);
        }
        Ok(None)
    }
}

fn parent_of(path: &Path) -> Result<PathBuf, CompileError> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| {
        CompileError::module_resolution(path, "compiled output has no parent directory")
    })
}

impl Finder for ImportHook {
    fn id(&self) -> &str {
        Self::ID
    }

    fn find(
        &self,
        name: &str,
        host: &mut ModuleHost,
    ) -> Result<Option<LoadedModule>, ImportError> {
        let mut host = host.suspend(Self::ID);

        let not_found = match host.import(name) {
            Ok(module) => return Ok(Some(module)),
            Err(ImportError::NotFound(missing)) => ImportError::NotFound(missing),
            Err(e) => return Err(e),
        };

        let roots = host.search_path().to_vec();
        let Some(dir) = self.compile_source(name, &roots)? else {
            return Err(not_found);
        };

        host.add_search_path(dir);
        match host.import(name) {
            Ok(module) => Ok(Some(module)),
            Err(ImportError::NotFound(_)) => Err(not_found),
            Err(e) => Err(e),
        }
    }
}

/// Scope during which an [`ImportHook`] is installed in a host
///
/// Installing is idempotent: a session started while a hook is already in
/// the chain leaves it there on drop.
pub struct ImportSession<'h> {
    host: &'h mut ModuleHost,
    installed: bool,
}

impl<'h> ImportSession<'h> {
    pub fn install(host: &'h mut ModuleHost, hook: ImportHook) -> Self {
        let installed = !host.contains(ImportHook::ID);
        if installed {
            host.push_front(Rc::new(hook));
        }
        Self { host, installed }
    }

    pub fn import(&mut self, name: &str) -> Result<LoadedModule, ImportError> {
        self.host.import(name)
    }
}

impl Deref for ImportSession<'_> {
    type Target = ModuleHost;

    fn deref(&self) -> &ModuleHost {
        &*self.host
    }
}

impl DerefMut for ImportSession<'_> {
    fn deref_mut(&mut self) -> &mut ModuleHost {
        &mut *self.host
    }
}

impl Drop for ImportSession<'_> {
    fn drop(&mut self) {
        if self.installed {
            self.host.remove(ImportHook::ID);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::CompileOptions;
    use crate::layout::OutputLayout;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    fn hook(cache: &TempDir) -> ImportHook {
        ImportHook::new(Compiler::with_layout(
            CompileOptions::new(),
            OutputLayout::at(cache.path().join("ns")),
        ))
    }

    #[test]
    fn test_session_installs_and_removes_hook() {
        let cache = TempDir::new().unwrap();
        let mut host = ModuleHost::new([]);
        {
            let session = ImportSession::install(&mut host, hook(&cache));
            assert_eq!(session.finder_ids(), vec!["shellpy", "path"]);
        }
        assert_eq!(host.finder_ids(), vec!["path"]);
    }

    #[test]
    fn test_nested_session_keeps_outer_hook() {
        let cache = TempDir::new().unwrap();
        let mut host = ModuleHost::new([]);
        let mut outer = ImportSession::install(&mut host, hook(&cache));
        {
            let inner = ImportSession::install(&mut outer, hook(&cache));
            assert_eq!(inner.finder_ids(), vec!["shellpy", "path"]);
        }
        assert!(outer.contains("shellpy"));
    }

    #[test]
    fn test_imports_shellpy_file() {
        let cache = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("helper.spy"), "def f():\n    return `echo 1`\n").unwrap();

        let mut host = ModuleHost::new([src.path().to_path_buf()]);
        let mut session = ImportSession::install(&mut host, hook(&cache));
        let module = session.import("helper").unwrap();

        assert_eq!(module.path.file_name().unwrap(), "helper.py");
        assert!(module.path.starts_with(cache.path()));
        assert!(session.search_path().contains(&module.path.parent().unwrap().to_path_buf()));
        assert!(session.contains("shellpy"));
    }

    #[test]
    fn test_imports_shellpy_package_submodule() {
        let cache = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let pkg = src.path().join("pkg");
        fs::create_dir(&pkg).unwrap();
        fs::write(pkg.join("__init__.spy"), "").unwrap();
        fs::write(pkg.join("tools.spy"), "`ls`\n").unwrap();

        let mut host = ModuleHost::new([src.path().to_path_buf()]);
        let mut session = ImportSession::install(&mut host, hook(&cache));
        let module = session.import("pkg.tools").unwrap();

        assert!(module.path.ends_with("pkg/tools.py"));
        assert!(module.path.starts_with(cache.path()));
    }

    #[test]
    fn test_plain_module_is_not_compiled() {
        let cache = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("plain.py"), "").unwrap();
        fs::write(src.path().join("plain.spy"), "").unwrap();

        let mut host = ModuleHost::new([src.path().to_path_buf()]);
        let mut session = ImportSession::install(&mut host, hook(&cache));
        assert_eq!(session.import("plain").unwrap().path, src.path().join("plain.py"));
        assert!(!cache.path().join("ns").exists());
    }

    #[test]
    fn test_missing_module_returns_original_error() {
        let cache = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();

        let mut host = ModuleHost::new([src.path().to_path_buf()]);
        let mut session = ImportSession::install(&mut host, hook(&cache));
        let err = session.import("missing.sub").unwrap_err();

        assert!(matches!(err, ImportError::NotFound(ref n) if n == "missing.sub"));
        assert_eq!(session.finder_ids(), vec!["shellpy", "path"]);
    }

    #[test]
    fn test_compile_source_refreshes_output_already_on_path() {
        let cache = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let source = src.path().join("helper.spy");
        fs::write(&source, "def value():\n    return 'one'\n").unwrap();
        filetime::set_file_mtime(&source, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let hook = hook(&cache);
        let dir = hook.compile_source("helper", &[src.path().to_path_buf()]).unwrap().unwrap();

        fs::write(&source, "def value():\n    return 'two'\n").unwrap();
        filetime::set_file_mtime(&source, FileTime::from_unix_time(1_600_000_001, 0)).unwrap();
        let roots = vec![dir.clone(), src.path().to_path_buf()];
        assert_eq!(hook.compile_source("helper", &roots).unwrap(), Some(dir.clone()));
        assert!(fs::read_to_string(dir.join("helper.py")).unwrap().contains("return 'two'"));
    }

    #[test]
    fn test_compile_source_without_match() {
        let cache = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let roots = vec![src.path().to_path_buf()];
        assert_eq!(hook(&cache).compile_source("absent.sub", &roots).unwrap(), None);
    }

    #[test]
    fn test_compile_failure_restores_hook() {
        let cache = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("broken.spy"), [0xff, 0xfe]).unwrap();

        let mut host = ModuleHost::new([src.path().to_path_buf()]);
        let mut session = ImportSession::install(&mut host, hook(&cache));

        assert!(matches!(
            session.import("broken"),
            Err(ImportError::Compile(CompileError::Encoding(_)))
        ));
        assert_eq!(session.finder_ids(), vec!["shellpy", "path"]);
    }
}
