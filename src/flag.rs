//! IMAP message flags
//!
//! FETCH responses carry flags as `\Seen`, `\Flagged`, and so on. The
//! decoder strips the backslash; [`Flag::from_name`] maps the bare
//! name back to a typed flag and [`Flag::as_imap_str`] restores the
//! wire form for STORE.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An IMAP message flag.
///
/// System flags (prefixed with `\` in the IMAP protocol) have
/// dedicated variants. User-defined keyword flags use [`Flag::Keyword`].
///
/// # Examples
///
/// ```
/// use mailwire::Flag;
///
/// assert_eq!(Flag::from_name("Seen"), Flag::Seen);
/// assert_eq!(Flag::Seen.as_imap_str(), "\\Seen");
///
/// let kw = Flag::from_name("$Important");
/// assert_eq!(kw.as_imap_str(), "$Important");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    /// Message has been read (`\Seen`).
    Seen,
    /// Message has been answered (`\Answered`).
    Answered,
    /// Message is flagged for attention (`\Flagged`).
    Flagged,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
    /// Message is a draft (`\Draft`).
    Draft,
    /// Message arrived in this session (`\Recent`, read-only).
    Recent,
    /// A user-defined keyword flag (no `\` prefix).
    Keyword(String),
}

impl Flag {
    /// Parse a flag name as it appears in a FETCH response, with or
    /// without the leading backslash. System flag names are matched
    /// case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let bare = name.trim_start_matches('\\');
        match bare.to_ascii_lowercase().as_str() {
            "seen" => Self::Seen,
            "answered" => Self::Answered,
            "flagged" => Self::Flagged,
            "deleted" => Self::Deleted,
            "draft" => Self::Draft,
            "recent" => Self::Recent,
            _ => Self::Keyword(bare.to_string()),
        }
    }

    /// The IMAP wire representation of this flag.
    ///
    /// System flags include the leading backslash (e.g. `\Seen`).
    /// Keyword flags are returned as-is.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(kw) => kw,
        }
    }

    /// The flag name without the backslash, as shown to users.
    #[must_use]
    pub fn name(&self) -> &str {
        self.as_imap_str().trim_start_matches('\\')
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

/// Render a parenthesized flag list for STORE, e.g. `(\Seen \Flagged)`.
pub(crate) fn flag_list(flags: &[Flag]) -> String {
    let names: Vec<&str> = flags.iter().map(Flag::as_imap_str).collect();
    format!("({})", names.join(" "))
}
