//! Shell command execution for shellpy.
//!
//! This crate runs the commands embedded in shellpy scripts. A command is
//! handed to the OS shell together with its flag letters (`p`, `e`, `i`, `n`)
//! and produces either a captured [`ExecResult`] or a live
//! [`InteractiveResult`]. Non-zero return codes surface as
//! `Error::NonZeroReturnCode` and propagate using Rust's `?` operator.

mod config;
mod error;
mod flags;
mod interactive;
mod result;
mod runtime;
mod template;

pub use config::{ExecConfig, PARAMS_ENV};
pub use error::Error;
pub use flags::Flags;
pub use interactive::InteractiveResult;
pub use result::ExecResult;
pub use runtime::{Execution, Executor, PrintSink};
pub use template::{Scope, Segment, Template};

/// Result type for execution operations.
pub type Result<T> = std::result::Result<T, Error>;
