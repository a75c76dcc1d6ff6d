//! `{name}` placeholders inside command text.
//!
//! Grammar: `{` identifier, then any number of `.identifier` or `[index]`
//! accessors, an optional `!r`/`!s`/`!a` conversion and an optional
//! `:spec`, then `}`. `{{` and `}}` are literal braces, a `{` directly after
//! `$` is shell syntax (`${VAR}`) and stays literal, and every other brace is
//! literal too.

use std::collections::HashMap;

use crate::error::Error;

/// One piece of a parsed command template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text taken as-is. Escaped braces appear here unescaped.
    Literal(&'a str),
    /// A placeholder. `name` is the variable it reads, `field` the full text
    /// between the braces.
    Placeholder { name: &'a str, field: &'a str },
}

/// A command string split into literal text and placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template<'a> {
    segments: Vec<Segment<'a>>,
}

impl<'a> Template<'a> {
    pub fn parse(text: &'a str) -> Self {
        let bytes = text.as_bytes();
        let mut segments = Vec::new();
        let mut literal_start = 0;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                    push_literal(&mut segments, &text[literal_start..i + 1]);
                    i += 2;
                    literal_start = i;
                }
                b'{' if i == 0 || bytes[i - 1] != b'$' => match placeholder_end(bytes, i) {
                    Some((name_end, close)) => {
                        push_literal(&mut segments, &text[literal_start..i]);
                        segments.push(Segment::Placeholder {
                            name: &text[i + 1..name_end],
                            field: &text[i + 1..close],
                        });
                        i = close + 1;
                        literal_start = i;
                    }
                    None => i += 1,
                },
                _ => i += 1,
            }
        }
        push_literal(&mut segments, &text[literal_start..]);

        Self { segments }
    }

    pub fn segments(&self) -> &[Segment<'a>] {
        &self.segments
    }

    /// Distinct variable names referenced, in order of first appearance.
    pub fn placeholders(&self) -> Vec<&'a str> {
        let mut names: Vec<&'a str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder { name, .. } = segment {
                if !names.contains(name) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn has_placeholders(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder { .. }))
    }

    /// Substitute every placeholder from `scope`.
    ///
    /// Only plain `{name}` placeholders can be rendered here; accessors,
    /// conversions and format specs need the host language.
    pub fn render(&self, scope: &Scope) -> crate::Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { name, field } => {
                    if name != field {
                        return Err(Error::UnsupportedPlaceholder(field.to_string()));
                    }
                    let value = scope
                        .get(name)
                        .ok_or_else(|| Error::UnboundPlaceholder(name.to_string()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn push_literal<'a>(segments: &mut Vec<Segment<'a>>, text: &'a str) {
    if !text.is_empty() {
        segments.push(Segment::Literal(text));
    }
}

/// Scan a placeholder opening at `open`; returns the end of its name and
/// the index of its closing brace.
fn placeholder_end(bytes: &[u8], open: usize) -> Option<(usize, usize)> {
    let mut i = open + 1;
    let name_end = identifier_end(bytes, i)?;
    i = name_end;

    loop {
        match bytes.get(i) {
            Some(b'.') => i = identifier_end(bytes, i + 1)?,
            Some(b'[') => {
                let close = bytes[i + 1..].iter().position(|&b| b == b']')?;
                let index = &bytes[i + 1..i + 1 + close];
                if index.is_empty() || index.iter().any(|b| matches!(b, b'{' | b'}' | b'\n')) {
                    return None;
                }
                i += close + 2;
            }
            _ => break,
        }
    }

    if bytes.get(i) == Some(&b'!') {
        if !matches!(bytes.get(i + 1), Some(b'r' | b's' | b'a')) {
            return None;
        }
        i += 2;
    }

    if bytes.get(i) == Some(&b':') {
        i += 1;
        while let Some(&b) = bytes.get(i) {
            if matches!(b, b'{' | b'}' | b'\n') {
                break;
            }
            i += 1;
        }
    }

    (bytes.get(i) == Some(&b'}')).then_some((name_end, i))
}

fn identifier_end(bytes: &[u8], start: usize) -> Option<usize> {
    let first = *bytes.get(start)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let len = bytes[start..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    Some(start + len)
}

/// Variable bindings visible to a command, local bindings shadowing globals.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    locals: HashMap<String, String>,
    globals: HashMap<String, String>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope whose globals are the process environment.
    pub fn from_env() -> Self {
        Self {
            locals: HashMap::new(),
            globals: std::env::vars().collect(),
        }
    }

    pub fn bind_local(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.locals.insert(name.into(), value.into());
    }

    pub fn bind_global(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.globals.insert(name.into(), value.into());
    }

    /// Look a name up in locals first, then globals.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.locals
            .get(name)
            .or_else(|| self.globals.get(name))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_single_literal() {
        let template = Template::parse("echo 1");
        assert_eq!(template.segments(), &[Segment::Literal("echo 1")]);
        assert!(!template.has_placeholders());
    }

    #[test]
    fn test_placeholder_names() {
        let template = Template::parse("cp {src} {dst.path} {src}");
        assert_eq!(template.placeholders(), vec!["src", "dst"]);
    }

    #[test]
    fn test_accessors_and_spec() {
        let template = Template::parse("echo {items[0]} {obj.attr!r:>10}");
        assert_eq!(
            template.segments(),
            &[
                Segment::Literal("echo "),
                Segment::Placeholder { name: "items", field: "items[0]" },
                Segment::Literal(" "),
                Segment::Placeholder { name: "obj", field: "obj.attr!r:>10" },
            ]
        );
    }

    #[test]
    fn test_shell_braces_stay_literal() {
        let template = Template::parse("echo ${HOME} | awk '{print $1}' && echo {}");
        assert!(!template.has_placeholders());
    }

    #[test]
    fn test_escaped_braces() {
        let template = Template::parse("echo {{x}}");
        assert!(!template.has_placeholders());
        assert_eq!(template.render(&Scope::new()).unwrap(), "echo {x}");
    }

    #[test]
    fn test_locals_shadow_globals() {
        let mut scope = Scope::new();
        scope.bind_global("name", "global");
        scope.bind_global("other", "g");
        scope.bind_local("name", "local");

        let rendered = Template::parse("{name} {other}").render(&scope).unwrap();
        assert_eq!(rendered, "local g");
    }

    #[test]
    fn test_unbound_placeholder() {
        let result = Template::parse("echo {missing}").render(&Scope::new());
        assert!(matches!(result, Err(Error::UnboundPlaceholder(name)) if name == "missing"));
    }

    #[test]
    fn test_accessor_cannot_render() {
        let mut scope = Scope::new();
        scope.bind_local("x", "1");
        let result = Template::parse("{x.real}").render(&scope);
        assert!(matches!(result, Err(Error::UnsupportedPlaceholder(_))));
    }
}
