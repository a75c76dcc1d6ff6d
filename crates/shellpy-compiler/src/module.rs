/// Module resolution through an explicit chain of finders
///
/// `ModuleHost` models the host language's import machinery: a search path,
/// an ordered list of finders consulted front to back, and a cache of
/// resolved modules. Finders can be pushed, removed, or temporarily
/// suspended while they resolve through the rest of the chain.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::ImportError;
use crate::locator::{COMPILED_EXTENSION, MODULE_ENTRY};

/// A resolved module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    /// Dotted module name as imported
    pub name: String,
    /// File the module is loaded from
    pub path: PathBuf,
}

/// One link of the resolver chain
pub trait Finder {
    /// Identifier used to remove or suspend the finder
    fn id(&self) -> &str;

    /// Resolve `name`, or `Ok(None)` to let the next finder try.
    fn find(&self, name: &str, host: &mut ModuleHost) -> Result<Option<LoadedModule>, ImportError>;
}

/// Import machinery: search path, finder chain and module cache
pub struct ModuleHost {
    search_path: Vec<PathBuf>,
    chain: Vec<Rc<dyn Finder>>,
    modules: HashMap<String, LoadedModule>,
}

impl ModuleHost {
    /// A host whose chain holds only the normal [`PathFinder`]
    pub fn new(search_path: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            search_path: search_path.into_iter().collect(),
            chain: vec![Rc::new(PathFinder) as Rc<dyn Finder>],
            modules: HashMap::new(),
        }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Append `dir` to the search path unless already present.
    ///
    /// Returns whether it was added.
    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        if self.search_path.contains(&dir) {
            return false;
        }
        tracing::debug!("Adding {} to the search path", dir.display());
        self.search_path.push(dir);
        true
    }

    /// Install `finder` ahead of all others
    pub fn push_front(&mut self, finder: Rc<dyn Finder>) {
        self.chain.insert(0, finder);
    }

    /// Remove the finder with `id`, returning it and its position
    pub fn remove(&mut self, id: &str) -> Option<(usize, Rc<dyn Finder>)> {
        let index = self.chain.iter().position(|f| f.id() == id)?;
        Some((index, self.chain.remove(index)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.chain.iter().any(|f| f.id() == id)
    }

    /// Finder ids in chain order
    pub fn finder_ids(&self) -> Vec<String> {
        self.chain.iter().map(|f| f.id().to_string()).collect()
    }

    /// Resolve `name` through the chain.
    ///
    /// The first finder returning a module wins; an error from any finder
    /// stops the walk.
    pub fn import(&mut self, name: &str) -> Result<LoadedModule, ImportError> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }

        let chain = self.chain.clone();
        for finder in chain {
            if let Some(module) = finder.find(name, self)? {
                tracing::debug!("{} resolved {} to {}", finder.id(), name, module.path.display());
                self.modules.insert(name.to_string(), module.clone());
                return Ok(module);
            }
        }
        Err(ImportError::NotFound(name.to_string()))
    }

    /// Take the finder `id` out of the chain until the guard is dropped.
    pub fn suspend(&mut self, id: &str) -> Suspended<'_> {
        let removed = self.remove(id);
        Suspended { host: self, removed }
    }
}

/// Guard returned by [`ModuleHost::suspend`]
///
/// Puts the finder back at its old position when dropped.
pub struct Suspended<'h> {
    host: &'h mut ModuleHost,
    removed: Option<(usize, Rc<dyn Finder>)>,
}

impl Deref for Suspended<'_> {
    type Target = ModuleHost;

    fn deref(&self) -> &ModuleHost {
        &*self.host
    }
}

impl DerefMut for Suspended<'_> {
    fn deref_mut(&mut self) -> &mut ModuleHost {
        &mut *self.host
    }
}

impl Drop for Suspended<'_> {
    fn drop(&mut self) {
        if let Some((index, finder)) = self.removed.take() {
            let index = index.min(self.host.chain.len());
            self.host.chain.insert(index, finder);
        }
    }
}

/// Normal resolution of compiled modules over the search path
///
/// `a.b` resolves to `a/b.py` or `a/b/__init__.py` under the first search
/// root that has either.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathFinder;

impl PathFinder {
    pub const ID: &'static str = "path";

    fn candidates(root: &Path, name: &str) -> [PathBuf; 2] {
        let relative: PathBuf = name.split('.').collect();
        [
            root.join(&relative).with_extension(COMPILED_EXTENSION),
            root.join(&relative)
                .join(MODULE_ENTRY)
                .with_extension(COMPILED_EXTENSION),
        ]
    }
}

impl Finder for PathFinder {
    fn id(&self) -> &str {
        Self::ID
    }

    fn find(&self, name: &str, host: &mut ModuleHost) -> Result<Option<LoadedModule>, ImportError> {
        if name.is_empty() || name.split('.').any(str::is_empty) {
            return Ok(None);
        }
        let found = host
            .search_path()
            .iter()
            .flat_map(|root| Self::candidates(root, name))
            .find(|path| path.is_file());

        Ok(found.map(|path| LoadedModule {
            name: name.to_string(),
            path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;
    use tempfile::TempDir;

    struct Counting {
        id: &'static str,
        calls: Cell<usize>,
    }

    impl Finder for Counting {
        fn id(&self) -> &str {
            self.id
        }

        fn find(&self, _: &str, _: &mut ModuleHost) -> Result<Option<LoadedModule>, ImportError> {
            self.calls.set(self.calls.get() + 1);
            Ok(None)
        }
    }

    fn counting(id: &'static str) -> Rc<Counting> {
        Rc::new(Counting { id, calls: Cell::new(0) })
    }

    #[test]
    fn test_path_finder_file_and_package() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tool.py"), "").unwrap();
        fs::create_dir_all(dir.path().join("pkg").join("sub")).unwrap();
        fs::write(dir.path().join("pkg").join("__init__.py"), "").unwrap();
        fs::write(dir.path().join("pkg").join("sub").join("leaf.py"), "").unwrap();

        let mut host = ModuleHost::new([dir.path().to_path_buf()]);
        assert_eq!(host.import("tool").unwrap().path, dir.path().join("tool.py"));
        assert_eq!(
            host.import("pkg").unwrap().path,
            dir.path().join("pkg").join("__init__.py")
        );
        assert_eq!(
            host.import("pkg.sub.leaf").unwrap().path,
            dir.path().join("pkg").join("sub").join("leaf.py")
        );
        assert!(matches!(host.import("nope"), Err(ImportError::NotFound(n)) if n == "nope"));
    }

    #[test]
    fn test_add_search_path_is_idempotent() {
        let mut host = ModuleHost::new([]);
        assert!(host.add_search_path("/a"));
        assert!(!host.add_search_path("/a"));
        assert_eq!(host.search_path(), &[PathBuf::from("/a")]);
    }

    #[test]
    fn test_push_front_and_remove() {
        let mut host = ModuleHost::new([]);
        host.push_front(counting("first"));
        assert_eq!(host.finder_ids(), vec!["first", "path"]);

        let (index, _) = host.remove("first").unwrap();
        assert_eq!(index, 0);
        assert!(!host.contains("first"));
        assert!(host.remove("first").is_none());
    }

    #[test]
    fn test_suspend_restores_position() {
        let mut host = ModuleHost::new([]);
        host.push_front(counting("b"));
        host.push_front(counting("a"));

        {
            let suspended = host.suspend("b");
            assert_eq!(suspended.finder_ids(), vec!["a", "path"]);
        }
        assert_eq!(host.finder_ids(), vec!["a", "b", "path"]);
    }

    #[test]
    fn test_every_finder_consulted_once() {
        let finder = counting("counter");
        let mut host = ModuleHost::new([]);
        host.push_front(finder.clone());

        assert!(host.import("x").is_err());
        assert_eq!(finder.calls.get(), 1);
    }

    #[test]
    fn test_resolved_modules_are_cached() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("m.py"), "").unwrap();
        let mut host = ModuleHost::new([dir.path().to_path_buf()]);

        host.import("m").unwrap();
        fs::remove_file(dir.path().join("m.py")).unwrap();
        assert_eq!(host.import("m").unwrap().path, dir.path().join("m.py"));
    }
}
