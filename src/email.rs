//! Message value types
//!
//! An [`Email`] is built empty for each `* n FETCH` block and filled
//! in as headers, flags and body parts are decoded. It is handed to
//! the caller as a plain value.

use crate::flag::Flag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// IMAP sequence number (1-based, folder-relative). Invalidated by
    /// EXPUNGE, including one issued by another session.
    pub message_number: u32,
    /// IMAP UID. Not populated by sequence-number fetches.
    pub uid: u64,
    pub message_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    /// Plain-text body, synthesized from HTML when the message has no
    /// text part.
    pub body: String,
    pub body_html: String,
    pub is_html: bool,
    pub date: DateTime<Utc>,
    flags: Vec<Flag>,
    /// Size of the raw message in bytes.
    pub size: usize,
    pub attachments: Vec<Attachment>,
}

/// A decoded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Email {
    /// An empty message for sequence number `message_number`.
    #[must_use]
    pub fn new(message_number: u32) -> Self {
        Self {
            message_number,
            uid: 0,
            message_id: String::new(),
            from: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            subject: String::new(),
            body: String::new(),
            body_html: String::new(),
            is_html: false,
            date: Utc::now(),
            flags: Vec::new(),
            size: 0,
            attachments: Vec::new(),
        }
    }

    /// Add a flag; returns `false` if it was already present.
    pub fn add_flag(&mut self, flag: Flag) -> bool {
        if self.flags.contains(&flag) {
            return false;
        }
        self.flags.push(flag);
        true
    }

    /// Remove a flag; returns `false` if it was not present.
    pub fn remove_flag(&mut self, flag: &Flag) -> bool {
        let before = self.flags.len();
        self.flags.retain(|f| f != flag);
        self.flags.len() != before
    }

    #[must_use]
    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    #[must_use]
    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    #[must_use]
    pub fn is_seen(&self) -> bool {
        self.has_flag(&Flag::Seen)
    }

    /// The plain body, or the HTML body when no plain text exists.
    #[must_use]
    pub fn best_text(&self) -> &str {
        if self.body.trim().is_empty() {
            &self.body_html
        } else {
            &self.body
        }
    }
}
