//! IMAP folder listing
//!
//! One [`Folder`] is built per `* LIST` line. The folder path is the
//! last quoted token on the line; a folder name that itself contains
//! a `"` is therefore not recovered correctly.

use serde::{Deserialize, Serialize};

/// A mailbox as reported by `LIST`.
///
/// # Examples
///
/// ```
/// use mailwire::Folder;
///
/// let f = Folder::from_list_line(r#"* LIST (\HasNoChildren) "/" "Work/Projects""#).unwrap();
/// assert_eq!(f.full_path, "Work/Projects");
/// assert_eq!(f.name, "Projects");
/// assert!(f.selectable);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Leaf name (last hierarchy segment).
    pub name: String,
    /// Full mailbox path, as passed to SELECT.
    pub full_path: String,
    /// Hierarchy delimiter, if the server reported one.
    pub delimiter: Option<String>,
    pub message_count: u32,
    pub unread_count: u32,
    /// False for `\Noselect` / `\NonExistent` entries.
    pub selectable: bool,
}

/// Message counters returned by `STATUS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStatus {
    pub messages: u32,
    pub unseen: u32,
}

impl Folder {
    /// A selectable folder with no hierarchy and zero counts.
    #[must_use]
    pub fn new(full_path: impl Into<String>) -> Self {
        let full_path = full_path.into();
        Self {
            name: full_path.clone(),
            full_path,
            delimiter: None,
            message_count: 0,
            unread_count: 0,
            selectable: true,
        }
    }

    /// Parse one untagged `LIST` response line.
    ///
    /// Returns `None` for lines that are not `* LIST` responses or
    /// carry no mailbox name.
    #[must_use]
    pub fn from_list_line(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("* LIST ").or_else(|| line.strip_prefix("* LSUB "))?;

        let (attributes, rest) = match rest.strip_prefix('(') {
            Some(inner) => {
                let end = inner.find(')')?;
                (&inner[..end], inner[end + 1..].trim_start())
            }
            None => ("", rest),
        };

        let quoted = quoted_tokens(rest);
        let name_is_quoted = rest.trim_end().ends_with('"');
        let full_path = if name_is_quoted {
            (*quoted.last()?).to_string()
        } else {
            rest.split_whitespace().last()?.to_string()
        };
        if full_path.is_empty() {
            return None;
        }

        let delimiter = if rest.starts_with('"') && (quoted.len() > 1 || !name_is_quoted) {
            quoted.first().map(|d| (*d).to_string())
        } else {
            None
        };

        let name = delimiter
            .as_deref()
            .filter(|d| !d.is_empty())
            .and_then(|d| full_path.rsplit(d).next())
            .unwrap_or(&full_path)
            .to_string();

        let selectable = !attributes.split_whitespace().any(|attr| {
            attr.eq_ignore_ascii_case("\\Noselect") || attr.eq_ignore_ascii_case("\\NonExistent")
        });

        Some(Self {
            name,
            full_path,
            delimiter,
            message_count: 0,
            unread_count: 0,
            selectable,
        })
    }

    /// Copy counters from a `STATUS` response.
    pub const fn apply_status(&mut self, status: FolderStatus) {
        self.message_count = status.messages;
        self.unread_count = status.unseen;
    }
}

/// Contents of every `"..."` token on the line, in order.
fn quoted_tokens(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (c, start) {
            ('\\', Some(_)) => escaped = true,
            ('"', None) => start = Some(i + 1),
            ('"', Some(from)) => {
                tokens.push(&s[from..i]);
                start = None;
            }
            _ => {}
        }
    }
    tokens
}
