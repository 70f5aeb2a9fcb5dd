//! Error types for mailwire

use std::fmt;
use thiserror::Error;

/// Which wire protocol rejected a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Imap,
    Smtp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap => f.write_str("IMAP"),
            Self::Smtp => f.write_str("SMTP"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The server answered a command with `NO`/`BAD` (IMAP) or an
    /// unexpected status code (SMTP).
    #[error("{protocol} command `{command}` failed: {message}")]
    Protocol {
        protocol: Protocol,
        command: String,
        response: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn imap(
        command: impl Into<String>,
        response: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            protocol: Protocol::Imap,
            command: command.into(),
            response: response.into(),
            message: message.into(),
        }
    }

    pub(crate) fn smtp(
        command: impl Into<String>,
        response: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            protocol: Protocol::Smtp,
            command: command.into(),
            response: response.into(),
            message: message.into(),
        }
    }

    /// Socket, TLS, timeout or EOF failure, as opposed to a server
    /// rejecting a command.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Tls(_) | Self::ConnectionClosed)
    }

    /// The raw server response attached to a protocol error.
    #[must_use]
    pub fn response(&self) -> Option<&str> {
        match self {
            Self::Protocol { response, .. } => Some(response),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
