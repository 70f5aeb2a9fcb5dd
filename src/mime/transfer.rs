//! Content-Transfer-Encoding and charset handling
//!
//! Everything here is lenient: malformed input yields an empty or
//! pass-through result, never an error.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SOFT_BREAK: regex::bytes::Regex =
        regex::bytes::Regex::new(r"=\r?\n[ \t]*").expect("valid regex");
    static ref SPACE_RUN: Regex = Regex::new(r"[ \t\u{a0}]+").expect("valid regex");
    static ref BLANK_RUN: Regex = Regex::new(r"\n{3,}").expect("valid regex");
}

/// Base64 signature of a ZIP archive (`PK\x03\x04`).
const ZIP_BASE64_PREFIX: &str = "UEs";

/// Share of Base64-alphabet characters above which content is treated
/// as Base64 regardless of its declared encoding.
const BASE64_RATIO: f64 = 0.95;

/// Map charset aliases to canonical names. Empty means UTF-8.
#[must_use]
pub fn normalize_charset(charset: &str) -> String {
    let cleaned = charset.trim().trim_matches(|c| c == '"' || c == '\'');
    match cleaned.to_ascii_uppercase().as_str() {
        "" | "UTF8" | "UTF-8" => "UTF-8".to_string(),
        "ISO8859-1" | "ISO-8859-1" | "ISO_8859-1" | "LATIN1" | "LATIN-1" => {
            "ISO-8859-1".to_string()
        }
        "ASCII" | "US-ASCII" => "US-ASCII".to_string(),
        _ => cleaned.to_string(),
    }
}

/// Decode `bytes` in `charset`. `None` if the charset is unknown.
#[must_use]
pub fn decode_charset(bytes: &[u8], charset: &str) -> Option<String> {
    let name = normalize_charset(charset);
    let encoding = encoding_rs::Encoding::for_label(name.as_bytes())?;
    let (text, _, _) = encoding.decode(bytes);
    Some(text.into_owned())
}

/// Decode `bytes` in `charset`, falling back to lossy UTF-8 when the
/// charset is unknown.
#[must_use]
pub fn decode_charset_lossy(bytes: &[u8], charset: &str) -> String {
    decode_charset(bytes, charset).unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

/// Strict-ish Base64: strips characters outside the alphabet, repairs
/// missing padding, and returns `None` if the result still does not
/// decode.
#[must_use]
pub fn decode_base64(text: &[u8]) -> Option<Vec<u8>> {
    let mut cleaned: Vec<u8> = text
        .iter()
        .copied()
        .filter(|&b| is_base64_byte(b))
        .collect();
    while cleaned.last() == Some(&b'=') {
        cleaned.pop();
    }
    if cleaned.len() % 4 == 1 {
        return None;
    }
    while cleaned.len() % 4 != 0 {
        cleaned.push(b'=');
    }
    BASE64.decode(&cleaned).ok()
}

const fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')
}

/// Body Base64: like [`decode_base64`] but yields an empty buffer on
/// failure.
#[must_use]
pub fn decode_base64_lenient(text: &[u8]) -> Vec<u8> {
    decode_base64(text).unwrap_or_default()
}

/// Decode quoted-printable to raw bytes.
///
/// A soft line break (`=` at end of line) is removed together with any
/// indentation a re-folding relay put in front of the next line. Each
/// `=XX` escape becomes its byte; a malformed escape is kept literally.
#[must_use]
pub fn decode_quoted_printable_bytes(text: &[u8]) -> Vec<u8> {
    let joined = SOFT_BREAK.replace_all(text, &b""[..]);
    let bytes = &joined[..];
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'='
            && let Some(byte) = bytes.get(i + 1..i + 3).and_then(hex_pair)
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

fn hex_pair(pair: &[u8]) -> Option<u8> {
    if !pair.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let s = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(s, 16).ok()
}

/// Encode text as quoted-printable with 76-column soft breaks.
///
/// Whitespace that would start a continuation line or end a hard line
/// is escaped, so decoding never loses it.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    const MAX: usize = 75;
    let normalized = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len());

    for (n, line) in normalized.split('\n').enumerate() {
        if n > 0 {
            out.push_str("\r\n");
        }
        let bytes = line.as_bytes();
        let mut col = 0;
        for (i, &b) in bytes.iter().enumerate() {
            let is_ws = b == b' ' || b == b'\t';
            let last = i + 1 == bytes.len();
            let literal = (b.is_ascii_graphic() && b != b'=') || (is_ws && !last);
            let mut token = if literal {
                (b as char).to_string()
            } else {
                format!("={b:02X}")
            };
            if col + token.len() > MAX {
                out.push_str("=\r\n");
                col = 0;
                if is_ws {
                    token = format!("={b:02X}");
                }
            }
            col += token.len();
            out.push_str(&token);
        }
    }
    out
}

/// Collapse runs of spaces and tabs, trim line ends, and limit blank
/// runs to one empty line. Line breaks are kept.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = unified
        .split('\n')
        .map(|line| SPACE_RUN.replace_all(line, " ").trim().to_string())
        .collect();
    let joined = lines.join("\n");
    BLANK_RUN.replace_all(joined.trim(), "\n\n").into_owned()
}

/// True when at least 95% of the sampled non-whitespace bytes are in
/// the Base64 alphabet.
#[must_use]
pub fn looks_like_base64(text: &[u8]) -> bool {
    let sample: Vec<u8> = text
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .take(4096)
        .collect();
    if sample.is_empty() {
        return false;
    }
    let in_alphabet = sample.iter().filter(|&&b| is_base64_byte(b)).count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = in_alphabet as f64 / sample.len() as f64;
    ratio >= BASE64_RATIO
}

/// Base64 content mislabeled as 7bit/8bit: a ZIP archive signature in
/// pure Base64 alphabet.
#[must_use]
pub fn looks_like_mislabeled_zip(text: &[u8]) -> bool {
    let trimmed = text.trim_ascii_start();
    trimmed.starts_with(ZIP_BASE64_PREFIX.as_bytes())
        && trimmed
            .iter()
            .all(|&b| is_base64_byte(b) || b.is_ascii_whitespace())
}

/// Decode a part body to bytes according to its transfer encoding.
///
/// `7bit`, `8bit`, `binary` and unknown encodings pass through, except
/// for Base64 ZIP payloads that were labeled as plain text.
#[must_use]
pub fn decode_transfer(body: &[u8], encoding: &str) -> Vec<u8> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "base64" => decode_base64_lenient(body),
        "quoted-printable" => decode_quoted_printable_bytes(body),
        _ if looks_like_mislabeled_zip(body) => decode_base64_lenient(body),
        _ => body.to_vec(),
    }
}

/// Decode a text part body to normalized text in its charset.
///
/// Pass-through encodings keep their raw bytes, so an 8bit part is
/// read in its declared charset like an encoded one.
#[must_use]
pub fn decode_text(body: &[u8], encoding: &str, charset: &str) -> String {
    let bytes = decode_transfer(body, encoding);
    normalize_whitespace(&decode_charset_lossy(&bytes, charset))
}
