//! Multipart body walking and attachment extraction

use super::MimeBody;
use super::encoded_word::decode_encoded_words;
use super::header::{Headers, param, split_head};
use super::transfer::{
    decode_base64, decode_charset_lossy, decode_text, decode_transfer, looks_like_base64,
};
use crate::email::Attachment;
use tracing::{debug, warn};

/// Nesting limit for multipart recursion.
const MAX_DEPTH: usize = 16;

/// Decode a complete RFC 5322 message (headers and body).
#[must_use]
pub fn decode_message(raw: &[u8]) -> MimeBody {
    let (head, body) = split_head(raw);
    let mut out = MimeBody::default();
    decode_entity(&Headers::from_bytes(head), body, 0, &mut out);
    out
}

/// Decode the parts of a multipart body whose boundary is already
/// known.
pub fn decode_parts(body: &[u8], boundary: &str, depth: usize, out: &mut MimeBody) {
    if depth >= MAX_DEPTH {
        warn!("Multipart nesting deeper than {MAX_DEPTH}, skipping");
        return;
    }
    for part in split_parts(body, boundary) {
        let (head, part_body) = split_head(part);
        decode_entity(&Headers::from_bytes(head), part_body, depth + 1, out);
    }
}

/// First `--boundary` delimiter line of a body, if any.
#[must_use]
pub fn detect_boundary(body: &[u8]) -> Option<String> {
    body.split(|&b| b == b'\n')
        .map(<[u8]>::trim_ascii_end)
        .find(|line| line.len() > 2 && line.starts_with(b"--"))
        .map(|line| String::from_utf8_lossy(&line[2..]).trim_end_matches("--").to_string())
        .filter(|boundary| !boundary.is_empty())
}

fn decode_entity(headers: &Headers, body: &[u8], depth: usize, out: &mut MimeBody) {
    if let Some(boundary) = param(headers.content_type_raw(), "boundary") {
        decode_parts(body, &boundary, depth, out);
        return;
    }

    if headers.is_attachment() {
        out.attachments.push(extract_attachment(headers, body));
        return;
    }

    let mime_type = headers.mime_type();
    match mime_type.as_str() {
        "text/plain" => append(
            &mut out.plain_text,
            &decode_text(body, &headers.transfer_encoding(), &headers.charset()),
        ),
        "text/html" => {
            let bytes = decode_transfer(body, &headers.transfer_encoding());
            append(&mut out.html, decode_charset_lossy(&bytes, &headers.charset()).trim());
        }
        _ if headers.filename().is_some() => {
            out.attachments.push(extract_attachment(headers, body));
        }
        _ => debug!("Skipping inline {mime_type} part"),
    }
}

fn append(target: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push_str("\n\n");
    }
    target.push_str(text);
}

fn extract_attachment(headers: &Headers, body: &[u8]) -> Attachment {
    let filename = headers
        .filename()
        .map_or_else(|| "attachment".to_string(), |name| decode_encoded_words(&name));
    let content_type = headers.mime_type();
    let data = match headers.get("Content-Transfer-Encoding") {
        Some(encoding) => decode_transfer(body, encoding),
        None if !content_type.starts_with("text/") && looks_like_base64(body) => {
            decode_base64(body).unwrap_or_else(|| body.to_vec())
        }
        None => body.to_vec(),
    };
    debug!("Extracted attachment {} ({} bytes)", filename, data.len());
    Attachment {
        filename,
        content_type,
        data,
    }
}

/// Bodies between `--boundary` delimiter lines.
///
/// The preamble and anything after the closing `--boundary--` are
/// dropped. The line break before each delimiter belongs to the
/// delimiter. A missing closing delimiter ends the last part at the
/// end of input.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;

    for line in body.split_inclusive(|&b| b == b'\n') {
        let trimmed = line.trim_ascii_end();
        if let Some(rest) = trimmed.strip_prefix(delimiter.as_bytes())
            && (rest.is_empty() || rest == b"--")
        {
            if let Some(from) = start.take() {
                parts.push(strip_line_break(&body[from..offset]));
            }
            if rest == b"--" {
                return parts;
            }
            start = Some(offset + line.len());
        }
        offset += line.len();
    }

    if let Some(from) = start {
        parts.push(&body[from..]);
    }
    parts
}

fn strip_line_break(s: &[u8]) -> &[u8] {
    s.strip_suffix(b"\r\n")
        .or_else(|| s.strip_suffix(b"\n"))
        .unwrap_or(s)
}
