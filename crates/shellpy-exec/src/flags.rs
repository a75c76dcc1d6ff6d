//! Flag letters attached to an embedded command.

use std::fmt;

/// Print all stdout of the executed command.
const PRINT_STDOUT: char = 'p';
/// Print all stderr of the executed command.
const PRINT_STDERR: char = 'e';
/// Run the command interactively: read its output line by line and write to its stdin.
const INTERACTIVE: char = 'i';
/// Never raise on a non-zero return code for this command.
const NO_THROW: char = 'n';

/// Per-command toggles parsed from the letters before the opening backtick.
///
/// Each letter toggles one behavior independently. Letters are order
/// insensitive and unknown letters are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub print_stdout: bool,
    pub print_stderr: bool,
    pub interactive: bool,
    pub no_throw: bool,
}

impl Flags {
    /// Parse a flag string such as `"pe"` or `"in"`.
    pub fn parse(params: &str) -> Self {
        let mut flags = Flags::default();
        for c in params.chars() {
            match c {
                PRINT_STDOUT => flags.print_stdout = true,
                PRINT_STDERR => flags.print_stderr = true,
                INTERACTIVE => flags.interactive = true,
                NO_THROW => flags.no_throw = true,
                other => tracing::debug!("ignoring unknown command flag '{}'", other),
            }
        }
        flags
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters = [
            (self.print_stdout, PRINT_STDOUT),
            (self.print_stderr, PRINT_STDERR),
            (self.interactive, INTERACTIVE),
            (self.no_throw, NO_THROW),
        ];
        for (set, letter) in letters {
            if set {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_params() {
        assert_eq!(Flags::parse(""), Flags::default());
    }

    #[test]
    fn test_each_letter() {
        let flags = Flags::parse("pein");
        assert!(flags.print_stdout);
        assert!(flags.print_stderr);
        assert!(flags.interactive);
        assert!(flags.no_throw);
    }

    #[test]
    fn test_unknown_letters_ignored() {
        let flags = Flags::parse("xpz");
        assert_eq!(
            flags,
            Flags {
                print_stdout: true,
                ..Flags::default()
            }
        );
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(Flags::parse("np").to_string(), "pn");
    }
}
