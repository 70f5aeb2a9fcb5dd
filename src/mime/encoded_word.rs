//! RFC 2047 encoded-word decoding (`=?charset?B|Q?text?=`)
//!
//! Real-world subjects arrive folded, re-wrapped and sometimes with
//! whitespace injected into the charset token. The input is normalized
//! before matching, and each encoded word that fails to decode is kept
//! verbatim so one bad word never loses the rest of the header.

use super::transfer::{
    decode_base64, decode_charset, decode_quoted_printable_bytes, normalize_charset,
};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

/// Passes of the charset-whitespace repair.
const CHARSET_REPAIR_PASSES: usize = 5;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid regex");
    static ref OPEN_SPACE: Regex = Regex::new(r"=\?\s+").expect("valid regex");
    static ref CLOSE_SPACE: Regex = Regex::new(r"\s+\?=").expect("valid regex");
    static ref CHARSET_SPACE: Regex =
        Regex::new(r"=\?([^?\s]+)\s+([^?]+)\?([BbQq])\?").expect("valid regex");
    static ref ADJACENT: Regex = Regex::new(r"\?=\s+=\?").expect("valid regex");
    static ref STRICT: Regex =
        Regex::new(r"=\?([^?\s]+)\?([BbQq])\?([^?]*)\?=").expect("valid regex");
    static ref LENIENT: Regex =
        Regex::new(r"=\?([^?]+?)\?\s*([BbQq])\s*\?([^?]*)\?=").expect("valid regex");
}

/// Decode every encoded word in a header value.
///
/// Text without `=?` is returned unchanged.
///
/// ```
/// use mailwire::decode_encoded_words;
///
/// assert_eq!(decode_encoded_words("=?UTF-8?Q?Hello_World?="), "Hello World");
/// assert_eq!(
///     decode_encoded_words("=?UTF-8?B?SGVsbG8=?= =?UTF-8?B?IFdvcmxk?="),
///     "Hello World"
/// );
/// ```
#[must_use]
pub fn decode_encoded_words(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }

    let normalized = normalize(input);
    if STRICT.is_match(&normalized) {
        return decode_matches(&normalized, &STRICT);
    }
    if normalized.contains("=?") && LENIENT.is_match(&normalized) {
        debug!("Falling back to lenient encoded-word match");
        return decode_matches(&normalized, &LENIENT);
    }
    normalized
}

/// Repair the malformations seen in the wild before matching.
fn normalize(input: &str) -> String {
    let mut s = WHITESPACE.replace_all(input.trim(), " ").into_owned();
    s = OPEN_SPACE.replace_all(&s, "=?").into_owned();
    s = CLOSE_SPACE.replace_all(&s, "?=").into_owned();

    for _ in 0..CHARSET_REPAIR_PASSES {
        let repaired = CHARSET_SPACE.replace_all(&s, "=?$1$2?$3?").into_owned();
        if repaired == s {
            break;
        }
        s = repaired;
    }

    ADJACENT.replace_all(&s, "?==?").into_owned()
}

/// A run of directly adjacent encoded words sharing one charset.
struct Run {
    charset: String,
    bytes: Vec<u8>,
    /// Original text of the run, used when the charset is unknown.
    source: String,
}

fn decode_matches(text: &str, pattern: &Regex) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run: Option<Run> = None;
    let mut last = 0;

    for caps in pattern.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            flush(&mut out, run.take());
            out.push_str(&text[last..whole.start()]);
        }
        last = whole.end();

        let charset = normalize_charset(&caps[1].split_whitespace().collect::<String>());
        let Some(bytes) = decode_word(&caps) else {
            flush(&mut out, run.take());
            out.push_str(whole.as_str());
            continue;
        };

        match run.as_mut() {
            Some(current) if current.charset.eq_ignore_ascii_case(&charset) => {
                current.bytes.extend_from_slice(&bytes);
                current.source.push_str(whole.as_str());
            }
            _ => {
                flush(&mut out, run.take());
                run = Some(Run {
                    charset,
                    bytes,
                    source: whole.as_str().to_string(),
                });
            }
        }
    }

    flush(&mut out, run);
    out.push_str(&text[last..]);
    out
}

fn decode_word(caps: &Captures<'_>) -> Option<Vec<u8>> {
    let payload = &caps[3];
    match caps[2].trim() {
        "B" | "b" => decode_base64(payload.as_bytes()),
        _ => Some(decode_quoted_printable_bytes(payload.replace('_', " ").as_bytes())),
    }
}

fn flush(out: &mut String, run: Option<Run>) {
    let Some(run) = run else { return };
    match decode_charset(&run.bytes, &run.charset) {
        Some(text) => out.push_str(&text),
        None => {
            debug!("Unknown charset {} in encoded word", run.charset);
            out.push_str(&run.source);
        }
    }
}
