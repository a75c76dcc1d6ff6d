/// Per-user output tree for compiled files
///
/// A source at `/home/me/proj/a.spy` compiles to
/// `<temp>/shellpy_<user>/home/me/proj/a.py`. The full absolute path is kept
/// below the namespace root, so sources in different directories never
/// share an output.

use std::path::{Component, Path, PathBuf};

use crate::error::Result;
use crate::locator::{COMPILED_EXTENSION, SOURCE_EXTENSION};

/// Prefix of the per-user namespace directory.
pub const NAMESPACE: &str = "shellpy";

/// Username used when the current user cannot be determined.
pub const UNKNOWN_USER: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Namespace under the system temporary directory.
    pub fn for_current_user() -> Self {
        Self::under(std::env::temp_dir())
    }

    /// Namespace for the current user under `temp_root`.
    pub fn under(temp_root: impl AsRef<Path>) -> Self {
        Self {
            root: temp_root
                .as_ref()
                .join(format!("{}_{}", NAMESPACE, username())),
        }
    }

    /// Use `root` itself as the namespace directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mirror of `path` inside the namespace.
    pub fn translate(&self, path: &Path) -> Result<PathBuf> {
        let absolute = std::path::absolute(path)?;
        let mut translated = self.root.clone();
        let depth = translated.components().count();

        for component in absolute.components() {
            match component {
                Component::Prefix(prefix) => {
                    translated.push(sanitize(&prefix.as_os_str().to_string_lossy()))
                }
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if translated.components().count() > depth {
                        translated.pop();
                    }
                }
                Component::Normal(part) => translated.push(part),
            }
        }
        Ok(translated)
    }

    /// Where the compiled form of `source` is written.
    pub fn compiled_path(&self, source: &Path) -> Result<PathBuf> {
        let translated = self.translate(source)?;
        let is_source = translated
            .extension()
            .is_some_and(|ext| ext == SOURCE_EXTENSION);
        Ok(if is_source {
            translated.with_extension(COMPILED_EXTENSION)
        } else {
            translated
        })
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::for_current_user()
    }
}

/// Name of the current user, safe to use as a path component.
pub fn username() -> String {
    match lookup_username() {
        Some(name) if !name.is_empty() => sanitize(&name),
        _ => {
            tracing::warn!("Could not determine the current user, using '{}'", UNKNOWN_USER);
            UNKNOWN_USER.to_string()
        }
    }
}

#[cfg(unix)]
fn lookup_username() -> Option<String> {
    use nix::unistd::{Uid, User};

    match User::from_uid(Uid::current()) {
        Ok(Some(user)) => Some(user.name),
        Ok(None) => env_username(),
        Err(e) => {
            tracing::debug!("User lookup failed: {}", e);
            env_username()
        }
    }
}

#[cfg(not(unix))]
fn lookup_username() -> Option<String> {
    env_username()
}

fn env_username() -> Option<String> {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '?' | '*' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_translate_keeps_full_path() {
        let layout = OutputLayout::at("/tmp/shellpy_me");
        assert_eq!(
            layout.translate(Path::new("/home/me/proj")).unwrap(),
            PathBuf::from("/tmp/shellpy_me/home/me/proj")
        );
    }

    #[test]
    fn test_compiled_path_swaps_extension() {
        let layout = OutputLayout::at("/tmp/shellpy_me");
        assert_eq!(
            layout.compiled_path(Path::new("/a/b/run.spy")).unwrap(),
            PathBuf::from("/tmp/shellpy_me/a/b/run.py")
        );
    }

    #[test]
    fn test_parent_components_are_resolved() {
        let layout = OutputLayout::at("/tmp/ns");
        assert_eq!(
            layout.translate(Path::new("/a/b/../c.spy")).unwrap(),
            PathBuf::from("/tmp/ns/a/c.spy")
        );
        assert_eq!(
            layout.translate(Path::new("/../../x")).unwrap(),
            PathBuf::from("/tmp/ns/x")
        );
    }

    #[test]
    fn test_relative_paths_are_made_absolute() {
        let layout = OutputLayout::at("/tmp/ns");
        let cwd = std::env::current_dir().unwrap();
        let expected = layout.translate(&cwd.join("x.spy")).unwrap();
        assert_eq!(layout.translate(Path::new("x.spy")).unwrap(), expected);
    }

    #[test]
    fn test_namespace_includes_username() {
        let layout = OutputLayout::under("/tmp");
        let name = layout.root().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("shellpy_"));
        assert!(!name["shellpy_".len()..].is_empty());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("DOMAIN\\user"), "DOMAIN_user");
        assert_eq!(sanitize("C:"), "C_");
    }
}
