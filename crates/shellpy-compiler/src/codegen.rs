/// Code generation module
///
/// Turns escaped intermediate blocks into calls to the runtime entry point.
/// Placeholders in a command become an explicit `.format(...)` mapping built
/// at the call site, so the enclosing scope supplies their values.

use shellpy_exec::{Segment, Template};

use crate::lexer::ShellBlock;
use crate::preprocess::{self, marked_blocks};

/// Name of the runtime function compiled calls go through.
pub const ENTRY_POINT: &str = "exe";

/// One `exe(...)` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    /// Command text as it appears inside the string literal.
    pub command: String,
    pub flags: String,
    /// Variables bound through `.format(...)`, in order of first use.
    pub bindings: Vec<String>,
}

impl ExecCall {
    /// Build the call for an escaped intermediate block.
    pub fn from_block(block: &ShellBlock<'_>) -> Self {
        let template = Template::parse(&block.body);
        let bindings: Vec<String> = template
            .placeholders()
            .into_iter()
            .map(str::to_string)
            .collect();

        let formatted = template.has_placeholders();
        let mut command = String::with_capacity(block.body.len());
        for segment in template.segments() {
            match segment {
                Segment::Literal(text) if !formatted => command.push_str(text),
                Segment::Literal(text) => {
                    command.push_str(&text.replace('{', "{{").replace('}', "}}"))
                }
                Segment::Placeholder { field, .. } => {
                    command.push('{');
                    command.push_str(field);
                    command.push('}');
                }
            }
        }

        Self {
            command,
            flags: block.flags.to_string(),
            bindings,
        }
    }

    pub fn to_python(&self) -> String {
        let mut out = format!("{ENTRY_POINT}('{}'", self.command);
        if !self.bindings.is_empty() {
            let args: Vec<String> = self
                .bindings
                .iter()
                .map(|name| format!("{name}={name}"))
                .collect();
            out.push_str(&format!(".format({})", args.join(", ")));
        }
        out.push_str(&format!(", '{}')", self.flags));
        out
    }
}

/// Replace every intermediate block in `escaped` with its call.
pub fn finalize(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut last = 0;
    for (range, block) in marked_blocks(escaped) {
        out.push_str(&escaped[last..range.start]);
        out.push_str(&ExecCall::from_block(&block).to_python());
        last = range.end;
    }
    out.push_str(&escaped[last..]);
    out
}

/// The calls `finalize` would emit, in source order.
pub fn exec_calls(escaped: &str) -> Vec<ExecCall> {
    marked_blocks(escaped)
        .iter()
        .map(|(_, block)| ExecCall::from_block(block))
        .collect()
}

/// Full pipeline: mark, escape, finalize.
pub fn preprocess_code(source: &str) -> String {
    let intermediate = preprocess::preprocess_code_to_intermediate(source);
    let escaped = preprocess::escape(&intermediate);
    let code = finalize(&escaped);
    tracing::debug!(
        "Code generation successful: {} bytes -> {} bytes",
        source.len(),
        code.len()
    );
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_call() {
        assert_eq!(preprocess_code("x = `echo 1`"), "x = exe('echo 1', '')");
    }

    #[test]
    fn test_flags_are_second_argument() {
        assert_eq!(preprocess_code("x = pn`ls\n"), "x = exe('ls', 'pn')\n");
    }

    #[test]
    fn test_placeholders_become_format_call() {
        assert_eq!(
            preprocess_code("`cp {src} {dst} {src}`"),
            "exe('cp {src} {dst} {src}'.format(src=src, dst=dst), '')"
        );
    }

    #[test]
    fn test_literal_braces_doubled_with_format() {
        assert_eq!(
            preprocess_code("`awk '{print $1}' {path}`"),
            "exe('awk \\'{{print $1}}\\' {path}'.format(path=path), '')"
        );
    }

    #[test]
    fn test_escaped_braces_unescaped_without_format() {
        assert_eq!(
            preprocess_code("`echo ${HOME} {{x}}`"),
            "exe('echo ${HOME} {x}', '')"
        );
    }

    #[test]
    fn test_accessor_binds_root_name() {
        let calls = exec_calls("both_shexe(echo {cfg.name[0]})shexe(p)shexe");
        assert_eq!(
            calls,
            vec![ExecCall {
                command: "echo {cfg.name[0]}".to_string(),
                flags: "p".to_string(),
                bindings: vec!["cfg".to_string()],
            }]
        );
        assert_eq!(
            calls[0].to_python(),
            "exe('echo {cfg.name[0]}'.format(cfg=cfg), 'p')"
        );
    }

    #[test]
    fn test_multiline_call() {
        assert_eq!(
            preprocess_code("`\ncd /tmp\nls\n`\n"),
            "exe('cd /tmp; \\\nls; \\\n', '')\n"
        );
    }
}
