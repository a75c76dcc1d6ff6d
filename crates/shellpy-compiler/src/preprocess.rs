/// Rewrite of embedded shell syntax into intermediate blocks
///
/// Each `process_*` pass recognizes a single kind; `preprocess_code_to_intermediate`
/// recognizes all of them in one scan. `escape` then quotes the block bodies.

use crate::lexer::{self, Segment, ShellBlock, ShellKind};

pub fn process_multilines(text: &str) -> String {
    rewrite(text, &[ShellKind::Multiline])
}

pub fn process_long_lines(text: &str) -> String {
    rewrite(text, &[ShellKind::LongLine])
}

pub fn process_both(text: &str) -> String {
    rewrite(text, &[ShellKind::Both])
}

pub fn process_start(text: &str) -> String {
    rewrite(text, &[ShellKind::Start])
}

/// Mark every embedded shell command in `text`.
pub fn preprocess_code_to_intermediate(text: &str) -> String {
    rewrite(text, &ShellKind::ALL)
}

fn rewrite(text: &str, kinds: &[ShellKind]) -> String {
    let mut out = String::with_capacity(text.len());
    for segment in lexer::scan(text, kinds) {
        match segment {
            Segment::Code(code) => out.push_str(code),
            Segment::Shell(block) => out.push_str(&block.to_string()),
        }
    }
    out
}

/// All intermediate blocks in `text`, with their byte ranges.
pub fn marked_blocks(text: &str) -> Vec<(std::ops::Range<usize>, ShellBlock<'_>)> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < text.len() {
        match lexer::marked_block_at(text, i) {
            Some((block, end)) => {
                blocks.push((i..end, block));
                i = end;
            }
            None => i += 1,
        }
    }
    blocks
}

/// Backslash-escape single quotes inside intermediate blocks.
///
/// Text between blocks is copied unchanged.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (range, block) in marked_blocks(text) {
        out.push_str(&text[last..range.start]);
        let escaped = ShellBlock {
            kind: block.kind,
            body: block.body.replace('\'', "\\'").into(),
            flags: block.flags,
        };
        out.push_str(&escaped.to_string());
        last = range.end;
    }
    out.push_str(&text[last..]);
    out
}
