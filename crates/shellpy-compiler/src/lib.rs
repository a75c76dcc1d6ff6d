/// shellpy compiler
///
/// Turns `.spy` scripts, Python with embedded backtick shell commands, into
/// plain Python files that call the bundled runtime. Compiled output lives in
/// a per-user tree and is reused while the source is unchanged; uncompiled
/// sources become importable through an import hook.

pub mod cache;
pub mod codegen;
pub mod driver;
pub mod error;
pub mod import;
pub mod launcher;
pub mod layout;
pub mod lexer;
pub mod locator;
pub mod module;
pub mod preprocess;
pub mod runtime;

pub use cache::{is_recompilation_needed, Fingerprint};
pub use codegen::{finalize, preprocess_code, ExecCall};
pub use driver::{CompileOptions, Compiler};
pub use error::{CompileError, ImportError, Result};
pub use import::{ImportHook, ImportSession};
pub use layout::OutputLayout;
pub use lexer::{ShellBlock, ShellKind};
pub use locator::{locate_file, locate_module};
pub use module::{Finder, LoadedModule, ModuleHost, PathFinder};
pub use preprocess::{
    escape, preprocess_code_to_intermediate, process_both, process_long_lines, process_multilines,
    process_start,
};
