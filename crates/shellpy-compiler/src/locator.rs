/// Lookup of shellpy sources on a search path

use std::path::{Path, PathBuf};

/// Extension of shellpy sources.
pub const SOURCE_EXTENSION: &str = "spy";

/// Extension of compiled output.
pub const COMPILED_EXTENSION: &str = "py";

/// Stem of the file that makes a directory a module.
pub const MODULE_ENTRY: &str = "__init__";

/// First `root/name` directory that contains `__init__.spy`.
pub fn locate_module<P: AsRef<Path>>(name: &str, roots: &[P]) -> Option<PathBuf> {
    let entry = format!("{MODULE_ENTRY}.{SOURCE_EXTENSION}");
    roots.iter().find_map(|root| {
        let dir = root.as_ref().join(name);
        (dir.is_dir() && dir.join(&entry).is_file()).then_some(dir)
    })
}

/// First `root/name.spy` that is a regular file.
pub fn locate_file<P: AsRef<Path>>(name: &str, roots: &[P]) -> Option<PathBuf> {
    let file_name = format!("{name}.{SOURCE_EXTENSION}");
    roots.iter().find_map(|root| {
        let path = root.as_ref().join(&file_name);
        path.is_file().then_some(path)
    })
}

pub fn is_source_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION)
}
