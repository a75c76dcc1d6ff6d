/// Scanner for embedded shell commands
///
/// Splits shellpy source into host code and shell blocks. At every backtick
/// the four block kinds are tried in a fixed precedence (multiline, long
/// line, both, start), so a block recognized by an earlier kind is never
/// re-read by a later one. Blocks already in intermediate form are skipped
/// as opaque host code.

use std::borrow::Cow;
use std::fmt;

/// Marker word of the intermediate form `<kind>_shexe(<body>)shexe(<flags>)shexe`.
pub const MARK: &str = "shexe";

/// Longer than any kind name.
const NAME_LIMIT: usize = 10;

/// Syntactic kind of an embedded shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellKind {
    /// Lone backtick at end of line, lines, lone backtick line.
    Multiline,
    /// Backtick command continued by trailing backslashes.
    LongLine,
    /// Backtick command closed by a backtick on the same line.
    Both,
    /// Backtick command running to end of line.
    Start,
}

impl ShellKind {
    /// All kinds, in matching precedence.
    pub const ALL: [ShellKind; 4] = [
        ShellKind::Multiline,
        ShellKind::LongLine,
        ShellKind::Both,
        ShellKind::Start,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShellKind::Multiline => "multiline",
            ShellKind::LongLine => "longline",
            ShellKind::Both => "both",
            ShellKind::Start => "start",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

/// One recognized shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellBlock<'a> {
    pub kind: ShellKind,
    /// Command text. Multiline bodies are rebuilt into one logical line.
    pub body: Cow<'a, str>,
    /// Flag letters written before the opening backtick.
    pub flags: &'a str,
}

impl fmt::Display for ShellBlock<'_> {
    /// Renders the intermediate form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{kind}_{MARK}({body}){MARK}({flags}){MARK}",
            kind = self.kind.as_str(),
            body = self.body,
            flags = self.flags,
        )
    }
}

/// A piece of scanned source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Code(&'a str),
    Shell(ShellBlock<'a>),
}

/// Scan `text`, recognizing only the given kinds.
pub fn scan<'a>(text: &'a str, kinds: &[ShellKind]) -> Vec<Segment<'a>> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some((_, end)) = marked_block_at(text, i) {
            i = end;
            continue;
        }

        if bytes[i] != b'`' {
            i += 1;
            continue;
        }

        let matched = ShellKind::ALL
            .into_iter()
            .filter(|kind| kinds.contains(kind))
            .find_map(|kind| match_kind(text, i, kind).map(|(body, end)| (kind, body, end)));

        match matched {
            Some((kind, body, end)) => {
                let flags_start = flags_start(bytes, code_start, i);
                if code_start < flags_start {
                    segments.push(Segment::Code(&text[code_start..flags_start]));
                }
                segments.push(Segment::Shell(ShellBlock {
                    kind,
                    body,
                    flags: &text[flags_start..i],
                }));
                i = end;
                code_start = end;
            }
            None => i += 1,
        }
    }

    if code_start < text.len() {
        segments.push(Segment::Code(&text[code_start..]));
    }
    segments
}

/// Parse an intermediate block starting exactly at `start`.
///
/// Returns the block and the index just past its final marker.
pub fn marked_block_at(text: &str, start: usize) -> Option<(ShellBlock<'_>, usize)> {
    let rest = &text.as_bytes()[start..];
    let name_len = rest
        .iter()
        .take(NAME_LIMIT)
        .take_while(|b| b.is_ascii_lowercase())
        .count();
    let kind = std::str::from_utf8(&rest[..name_len])
        .ok()
        .and_then(ShellKind::from_name)?;
    let opener = format!("_{MARK}(");
    if !rest[name_len..].starts_with(opener.as_bytes()) {
        return None;
    }

    let body_start = start + name_len + opener.len();
    let separator = format!("){MARK}(");
    let body_end = body_start + text[body_start..].find(&separator)?;
    let flags_start = body_end + separator.len();
    let terminator = format!("){MARK}");
    let flags_end = flags_start + text[flags_start..].find(&terminator)?;

    let flags = &text[flags_start..flags_end];
    if !flags.bytes().all(|b| b.is_ascii_lowercase()) {
        return None;
    }

    Some((
        ShellBlock {
            kind,
            body: Cow::Borrowed(&text[body_start..body_end]),
            flags,
        },
        flags_end + terminator.len(),
    ))
}

/// Start of the run of lowercase letters directly before the backtick.
fn flags_start(bytes: &[u8], floor: usize, tick: usize) -> usize {
    let mut start = tick;
    while start > floor && bytes[start - 1].is_ascii_lowercase() {
        start -= 1;
    }
    start
}

fn line_end(text: &str, from: usize) -> usize {
    text[from..].find('\n').map_or(text.len(), |offset| from + offset)
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

/// Try one kind at the backtick `tick`; returns the body and the end index.
fn match_kind(text: &str, tick: usize, kind: ShellKind) -> Option<(Cow<'_, str>, usize)> {
    let after = tick + 1;
    let eol = line_end(text, after);
    let rest = strip_cr(&text[after..eol]);

    match kind {
        ShellKind::Multiline => match_multiline(text, rest, eol),
        ShellKind::LongLine => match_long_line(text, after, rest, eol),
        ShellKind::Both => {
            let close = rest.find('`')?;
            Some((Cow::Borrowed(&rest[..close]), after + close + 1))
        }
        ShellKind::Start => {
            if rest.contains('`') || rest.trim().is_empty() {
                return None;
            }
            Some((Cow::Borrowed(rest), after + rest.len()))
        }
    }
}

fn match_multiline<'a>(text: &'a str, rest: &str, eol: usize) -> Option<(Cow<'a, str>, usize)> {
    if !rest.trim().is_empty() || eol >= text.len() {
        return None;
    }

    let mut body = String::new();
    let mut pos = eol + 1;
    while pos < text.len() {
        let end = line_end(text, pos);
        let line = strip_cr(&text[pos..end]);

        if line.trim() == "`" {
            if body.is_empty() {
                return None;
            }
            let close = pos + line.find('`')? + 1;
            return Some((Cow::Owned(body), close));
        }

        body.push_str(line);
        body.push_str("; \\\n");
        pos = end + 1;
    }
    None
}

fn match_long_line<'a>(
    text: &'a str,
    after: usize,
    rest: &str,
    eol: usize,
) -> Option<(Cow<'a, str>, usize)> {
    if rest.contains('`') || !rest.ends_with('\\') || eol >= text.len() {
        return None;
    }

    let mut pos = eol + 1;
    loop {
        let end = line_end(text, pos);
        let line = strip_cr(&text[pos..end]);

        if let Some(close) = line.find('`') {
            let body_end = pos + close;
            return Some((Cow::Borrowed(&text[after..body_end]), body_end + 1));
        }
        if !line.ends_with('\\') || end >= text.len() {
            let body_end = pos + line.len();
            return Some((Cow::Borrowed(&text[after..body_end]), body_end));
        }
        pos = end + 1;
    }
}
