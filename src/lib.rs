//! IMAP and SMTP mail client over TLS
//!
//! [`ImapClient`] and [`SmtpClient`] speak the wire protocols
//! directly, one command at a time, over a [`Connection`] that
//! supports implicit TLS and STARTTLS. Raw FETCH responses are turned
//! into [`Email`] values by the tolerant decoder in [`mime`], which
//! survives folded, mislabeled and malformed real-world messages.
//!
//! Server certificates are not verified. Only connect to servers you
//! trust at the network level (local bridges, test servers).
//!
//! [`MailClient`] wraps both clients in connect-per-call operations
//! configured from the environment.

mod client;
mod config;
mod email;
mod error;
mod flag;
mod folder;
pub mod imap;
pub mod mime;
mod sequence;
pub mod smtp;
pub mod transport;

pub use client::{MailClient, recent_range};
pub use config::{ImapConfig, SmtpConfig};
pub use email::{Attachment, Email};
pub use error::{Error, Protocol, Result};
pub use flag::Flag;
pub use folder::{Folder, FolderStatus};
pub use imap::{ImapClient, ImapState};
pub use mime::{MimeBody, decode_encoded_words, parse_fetch_response};
pub use sequence::build_sequence_set;
pub use smtp::{SmtpClient, SmtpReply, SmtpState};
pub use transport::Connection;
