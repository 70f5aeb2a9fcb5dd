//! MIME decoding of raw IMAP FETCH responses
//!
//! Pure functions with no connection state. Decoding never fails: a
//! malformed header or part falls back to its raw text or an empty
//! value and processing continues with the next one.

pub mod encoded_word;
pub mod fetch;
pub mod header;
pub mod html;
pub mod multipart;
pub mod transfer;

use crate::email::{Attachment, Email};
use chrono::Utc;
use fetch::FetchBlock;
use header::{Headers, split_head};
use transfer::decode_charset_lossy;
use tracing::debug;

pub use encoded_word::decode_encoded_words;
pub use html::html_to_text;
pub use multipart::decode_message;

/// Text, HTML and attachments decoded from one message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeBody {
    pub plain_text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

impl MimeBody {
    /// Plain text, or a text view of the HTML when there is none.
    #[must_use]
    pub fn text(&self) -> String {
        if self.plain_text.is_empty() && !self.html.is_empty() {
            html_to_text(&self.html)
        } else {
            self.plain_text.clone()
        }
    }
}

/// Decode every `* n FETCH` block of a response into an [`Email`].
#[must_use]
pub fn parse_fetch_response(raw: &[u8]) -> Vec<Email> {
    fetch::split_blocks(raw).iter().map(parse_fetch_block).collect()
}

/// Decode one FETCH block.
///
/// Header fields come from the `BODY[HEADER...]` section; fields it
/// lacks are taken from the headers of `BODY[]`, which also supplies
/// the body, attachments and size.
#[must_use]
pub fn parse_fetch_block(block: &FetchBlock<'_>) -> Email {
    let mut email = Email::new(block.number);
    for flag in &block.flags {
        email.add_flag(flag.clone());
    }

    let fields = block
        .section("BODY[HEADER")
        .map(|raw| Headers::from_bytes(split_head(raw).0))
        .unwrap_or_default();
    let full = block.section("BODY[]");
    let full_headers = full
        .map(|raw| Headers::from_bytes(split_head(raw).0))
        .unwrap_or_default();
    apply_headers(&mut email, &fields, &full_headers);

    if let Some(raw) = full {
        email.size = raw.len();
        apply_body(&mut email, decode_message(raw));
    }
    email
}

/// Decode a `BODY[TEXT]` section, whose own headers are not part of
/// the content. A multipart body is recognized by its first delimiter
/// line; anything else is read as UTF-8.
#[must_use]
pub fn decode_body_text(raw: &[u8]) -> MimeBody {
    if let Some(boundary) = multipart::detect_boundary(raw) {
        let mut body = MimeBody::default();
        multipart::decode_parts(raw, &boundary, 0, &mut body);
        if !body.plain_text.is_empty() || !body.html.is_empty() || !body.attachments.is_empty() {
            return body;
        }
        debug!("No parts found for detected boundary, decoding as plain text");
    }
    MimeBody {
        plain_text: transfer::normalize_whitespace(&decode_charset_lossy(raw, "")),
        ..MimeBody::default()
    }
}

fn apply_headers(email: &mut Email, fields: &Headers, full: &Headers) {
    let lookup = |name: &str| fields.get(name).or_else(|| full.get(name));

    if let Some(from) = lookup("From") {
        email.from = header::split_addresses(from).join(", ");
    }
    if let Some(to) = lookup("To") {
        email.to = header::split_addresses(to);
    }
    if let Some(cc) = lookup("Cc") {
        email.cc = header::split_addresses(cc);
    }
    if let Some(subject) = lookup("Subject") {
        email.subject = decode_encoded_words(subject);
    }
    if let Some(message_id) = lookup("Message-ID") {
        email.message_id = message_id.to_string();
    }
    if let Some(date) = lookup("Date") {
        email.date = header::parse_date(date).unwrap_or_else(|| {
            debug!("Unparsable date {:?}, using current time", date);
            Utc::now()
        });
    }
}

fn apply_body(email: &mut Email, body: MimeBody) {
    email.body = body.text();
    email.is_html = !body.html.is_empty();
    email.body_html = body.html;
    email.attachments = body.attachments;
}
