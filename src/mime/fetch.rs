//! Splitting raw FETCH responses into per-message blocks
//!
//! Responses are scanned as bytes: literal contents are sliced out
//! exactly as the server sent them and decoded later, once their
//! charset is known.

use crate::flag::Flag;
use lazy_static::lazy_static;
use regex::bytes::Regex;

lazy_static! {
    static ref FETCH_START: Regex = Regex::new(r"(?i)^\* (\d+) FETCH\b").expect("valid regex");
    static ref TAGGED_DONE: Regex =
        Regex::new(r"(?i)^[A-Z0-9]+ (OK|NO|BAD)\b").expect("valid regex");
    static ref LITERAL_MARKER: Regex = Regex::new(r"\{(\d+)\}$").expect("valid regex");
    static ref SECTION: Regex = Regex::new(
        r#"(?i-u)(BODY\[[^\]]*\](?:<\d+>)?)\s*(?:\{(\d+)\}\r?\n|"((?:[^"\\]|\\.)*)"|(NIL))"#
    )
    .expect("valid regex");
    static ref FLAGS: Regex = Regex::new(r"(?i)FLAGS \(([^)]*)\)").expect("valid regex");
}

/// One `* n FETCH` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBlock<'a> {
    /// Sequence number from the `* n FETCH` line.
    pub number: u32,
    pub flags: Vec<Flag>,
    /// `(section name, content)` pairs, e.g. `("BODY[]", raw message)`.
    pub sections: Vec<(String, &'a [u8])>,
}

impl<'a> FetchBlock<'a> {
    /// Content of the first section whose name starts with `prefix`
    /// (case-insensitive).
    #[must_use]
    pub fn section(&self, prefix: &str) -> Option<&'a [u8]> {
        self.sections
            .iter()
            .find(|(name, _)| {
                name.len() >= prefix.len() && name[..prefix.len()].eq_ignore_ascii_case(prefix)
            })
            .map(|(_, content)| *content)
    }
}

/// Split an accumulated FETCH response into blocks, one per
/// `* n FETCH` line.
///
/// Literal contents are skipped while scanning, so message text that
/// happens to contain `* 9 FETCH` never starts a block. The tagged
/// completion line ends the last block.
#[must_use]
pub fn split_blocks(raw: &[u8]) -> Vec<FetchBlock<'_>> {
    let mut spans: Vec<(u32, usize, usize)> = Vec::new();
    let mut current: Option<(u32, usize)> = None;
    let mut pos = 0;

    while pos < raw.len() {
        let line_end = raw[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(raw.len(), |i| pos + i + 1);
        let line = trim_line_end(&raw[pos..line_end]);

        if let Some(caps) = FETCH_START.captures(line) {
            if let Some((number, start)) = current.take() {
                spans.push((number, start, pos));
            }
            current = parse_number(&caps[1]).map(|number| (number, pos));
        } else if TAGGED_DONE.is_match(line)
            && let Some((number, start)) = current.take()
        {
            spans.push((number, start, pos));
        }

        pos = line_end;
        if let Some(caps) = LITERAL_MARKER.captures(line)
            && let Some(len) = parse_number::<usize>(&caps[1])
        {
            pos = pos.saturating_add(len).min(raw.len());
        }
    }
    if let Some((number, start)) = current {
        spans.push((number, start, raw.len()));
    }

    spans
        .into_iter()
        .map(|(number, start, end)| parse_block(number, &raw[start..end]))
        .collect()
}

fn parse_block(number: u32, text: &[u8]) -> FetchBlock<'_> {
    let mut sections = Vec::new();
    let mut outside = Vec::new();
    let mut pos = 0;

    while let Some(caps) = SECTION.captures_at(text, pos) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        outside.extend_from_slice(&text[pos..whole.start()]);
        let name = String::from_utf8_lossy(name.as_bytes()).to_ascii_uppercase();

        if let Some(len) = caps.get(2).and_then(|m| parse_number::<usize>(m.as_bytes())) {
            let start = whole.end();
            let end = start.saturating_add(len).min(text.len());
            sections.push((name, &text[start..end]));
            pos = end;
        } else if let Some(quoted) = caps.get(3) {
            sections.push((name, quoted.as_bytes()));
            pos = whole.end();
        } else {
            sections.push((name, &text[whole.end()..whole.end()]));
            pos = whole.end();
        }
    }
    outside.extend_from_slice(&text[pos..]);

    let flags = FLAGS
        .captures(&outside)
        .map(|caps| {
            String::from_utf8_lossy(&caps[1])
                .split_whitespace()
                .map(Flag::from_name)
                .collect()
        })
        .unwrap_or_default();

    FetchBlock {
        number,
        flags,
        sections,
    }
}

fn parse_number<T: std::str::FromStr>(digits: &[u8]) -> Option<T> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |i| i + 1);
    &line[..end]
}
