//! HTML to plain-text downgrade for HTML-only messages

use super::transfer::normalize_whitespace;
use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref SCRIPT: Regex = Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid regex");
    static ref STYLE: Regex = Regex::new(r"(?is)<style\b.*?</style\s*>").expect("valid regex");
    static ref COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").expect("valid regex");
    static ref LINE_BREAK: Regex = Regex::new(r"(?i)<br\s*/?>").expect("valid regex");
    static ref BLOCK_END: Regex =
        Regex::new(r"(?i)</(p|div|tr|li|h[1-6]|table|blockquote|pre)\s*>").expect("valid regex");
    static ref TAG: Regex = Regex::new(r"<[^>]*>").expect("valid regex");
    static ref ENTITY: Regex =
        Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").expect("valid regex");
}

/// Plain-text view of an HTML document.
///
/// Script and style blocks are dropped, `<br>` and closing block tags
/// become line breaks, remaining tags are stripped and entities
/// decoded. Whitespace is normalized as for text bodies.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT.replace_all(html, "");
    let text = STYLE.replace_all(&text, "");
    let text = COMMENT.replace_all(&text, "");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = BLOCK_END.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = ENTITY.replace_all(&text, |caps: &Captures<'_>| decode_entity(&caps[1], &caps[0]));
    normalize_whitespace(&text)
}

fn decode_entity(name: &str, original: &str) -> String {
    let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
    } else if let Some(dec) = name.strip_prefix('#') {
        dec.parse().ok().and_then(char::from_u32)
    } else {
        named_entity(name)
    };
    decoded.map_or_else(|| original.to_string(), String::from)
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        _ => return None,
    })
}
