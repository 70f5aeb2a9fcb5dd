//! RFC 5322 header parsing
//!
//! Header blocks are unfolded and kept in arrival order. Lookups are
//! case-insensitive and return the first occurrence.

use super::transfer::decode_charset_lossy;
use chrono::{DateTime, Utc};

/// Date layouts tried after RFC 2822, in order.
const DATE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M %z",
];

/// Named zones seen in `Date:` headers, as numeric offsets.
const ZONES: &[(&str, &str)] = &[
    ("GMT", "+0000"),
    ("UTC", "+0000"),
    ("UT", "+0000"),
    ("Z", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
];

/// An unfolded header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Parse a header block, stopping at the first blank line.
    ///
    /// Continuation lines (leading space or tab) are joined to the
    /// previous field with a single space. Lines without a colon are
    /// ignored.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut fields: Vec<(String, String)> = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = fields.last_mut() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                fields.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        Self { fields }
    }

    /// Parse a raw header block. Raw 8bit header bytes are read as
    /// UTF-8; encoded words are decoded per field by the caller.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(raw))
    }

    /// First value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Raw `Content-Type` value, or `text/plain` when absent.
    #[must_use]
    pub fn content_type_raw(&self) -> &str {
        self.get("Content-Type").unwrap_or("text/plain")
    }

    /// Lowercased media type without parameters.
    #[must_use]
    pub fn mime_type(&self) -> String {
        media_type(self.content_type_raw())
    }

    /// Lowercased transfer encoding, `7bit` when absent.
    #[must_use]
    pub fn transfer_encoding(&self) -> String {
        self.get("Content-Transfer-Encoding")
            .map_or_else(|| "7bit".to_string(), |v| v.trim().to_ascii_lowercase())
    }

    /// Declared charset, empty when absent.
    #[must_use]
    pub fn charset(&self) -> String {
        param(self.content_type_raw(), "charset").unwrap_or_default()
    }

    /// True when `Content-Disposition` marks the part as an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.get("Content-Disposition")
            .is_some_and(|d| d.to_ascii_lowercase().contains("attachment"))
    }

    /// Attachment file name from `Content-Disposition`, falling back to
    /// the `name` parameter of `Content-Type`.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.get("Content-Disposition")
            .and_then(|d| param(d, "filename"))
            .or_else(|| param(self.content_type_raw(), "name"))
            .filter(|name| !name.trim().is_empty())
    }
}

/// Split a message or part into header block and body at the first
/// blank line. Without a blank line the whole input is the header.
#[must_use]
pub fn split_head(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(body) = raw.strip_prefix(b"\r\n") {
        return (&raw[..0], body);
    }
    if let Some(body) = raw.strip_prefix(b"\n") {
        return (&raw[..0], body);
    }
    let crlf = find(raw, b"\r\n\r\n").map(|i| (i, 4));
    let lf = find(raw, b"\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((at, sep)) => (&raw[..at], &raw[at + sep..]),
        None => (raw, &raw[raw.len()..]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Lowercased media type of a `Content-Type` value.
#[must_use]
pub fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Value of parameter `name` in a structured header value.
///
/// Handles quoted values with backslash escapes, and RFC 2231
/// extended (`name*=charset''%XX`) and continued (`name*0=`, `name*1*=`)
/// forms. The extended form wins over a plain parameter of the same
/// name.
#[must_use]
pub fn param(value: &str, name: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;
    let mut continued: Vec<(u32, bool, String)> = Vec::new();

    for piece in split_params(value).into_iter().skip(1) {
        let Some((key, raw)) = piece.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = unquote(raw.trim());
        let Some(suffix) = key.strip_prefix(&name.to_ascii_lowercase()) else {
            continue;
        };
        match suffix {
            "" => plain = Some(raw),
            "*" => extended = Some(decode_extended(&raw)),
            _ => {
                let suffix = suffix.trim_start_matches('*');
                let (index, is_extended) = match suffix.strip_suffix('*') {
                    Some(index) => (index, true),
                    None => (suffix, false),
                };
                if let Ok(index) = index.parse() {
                    continued.push((index, is_extended, raw));
                }
            }
        }
    }

    if extended.is_some() {
        return extended;
    }
    if !continued.is_empty() {
        continued.sort_by_key(|(index, _, _)| *index);
        return Some(join_continuations(&continued));
    }
    plain
}

/// Split a header value on `;` outside quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                pieces.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&value[start..]);
    pieces
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Decode `charset'language'percent-encoded` text.
fn decode_extended(raw: &str) -> String {
    let mut parts = raw.splitn(3, '\'');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(charset), Some(_), Some(text)) => {
            decode_charset_lossy(&percent_decode(text), charset)
        }
        _ => decode_charset_lossy(&percent_decode(raw), ""),
    }
}

fn join_continuations(segments: &[(u32, bool, String)]) -> String {
    let mut charset = String::new();
    let mut bytes = Vec::new();
    for (n, (_, is_extended, raw)) in segments.iter().enumerate() {
        if !is_extended {
            bytes.extend_from_slice(raw.as_bytes());
            continue;
        }
        let mut text = raw.as_str();
        if n == 0 {
            let mut parts = raw.splitn(3, '\'');
            if let (Some(cs), Some(_), Some(rest)) = (parts.next(), parts.next(), parts.next()) {
                charset = cs.to_string();
                text = rest;
            }
        }
        bytes.extend_from_slice(&percent_decode(text));
    }
    decode_charset_lossy(&bytes, &charset)
}

fn percent_decode(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(byte) = bytes
                .get(i + 1..i + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .filter(|pair| pair.chars().all(|c| c.is_ascii_hexdigit()))
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Bare addresses from an address-list header.
///
/// Commas inside quoted display names or angle brackets do not split,
/// and `Name <addr>` is reduced to `addr`. Order and duplicates are
/// kept.
#[must_use]
pub fn split_addresses(value: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut angle = false;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '<' if !quoted => angle = true,
            '>' if !quoted => angle = false,
            ',' if !quoted && !angle => {
                entries.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&value[start..]);

    entries.into_iter().filter_map(bare_address).collect()
}

fn bare_address(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    let address = match (entry.rfind('<'), entry.rfind('>')) {
        (Some(open), Some(close)) if open < close => entry[open + 1..close].trim(),
        _ => entry,
    };
    (!address.is_empty()).then(|| address.to_string())
}

/// Parse a `Date:` header value.
///
/// RFC 2822 is tried first, then the layouts in [`DATE_FORMATS`] with
/// named zones replaced by their offsets. A trailing `(comment)` is
/// ignored.
#[must_use]
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let cleaned = strip_comment(value).split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(&cleaned) {
        return Some(date.with_timezone(&Utc));
    }
    let numeric = replace_zone_name(&cleaned);
    DATE_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(&numeric, format).ok())
        .map(|date| date.with_timezone(&Utc))
}

fn strip_comment(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.ends_with(')')
        && let Some(open) = trimmed.rfind('(')
    {
        return trimmed[..open].trim_end();
    }
    trimmed
}

fn replace_zone_name(value: &str) -> String {
    let Some((head, zone)) = value.rsplit_once(' ') else {
        return value.to_string();
    };
    ZONES
        .iter()
        .find(|(name, _)| zone.eq_ignore_ascii_case(name))
        .map_or_else(|| value.to_string(), |(_, offset)| format!("{head} {offset}"))
}
