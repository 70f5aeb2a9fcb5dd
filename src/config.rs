//! Connection configuration

use crate::error::{Error, Result};
use std::env;

/// IMAP account configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_HOST`
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_PORT` (default: `993`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: required("IMAP_HOST")?,
            port: port_var("IMAP_PORT", crate::imap::IMAPS_PORT)?,
            username: required("IMAP_USERNAME")?,
            password: required("IMAP_PASSWORD")?,
        })
    }
}

/// SMTP account configuration
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Negotiate TLS (STARTTLS on the submission port).
    pub use_tls: bool,
}

impl SmtpConfig {
    /// Load SMTP configuration from environment variables
    ///
    /// Required:
    /// - `SMTP_HOST`
    ///
    /// Optional (with defaults):
    /// - `SMTP_PORT` (default: `587`)
    /// - `SMTP_USERNAME` / `SMTP_PASSWORD` (default: the IMAP ones)
    /// - `SMTP_STARTTLS` (default: `true`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let username = env::var("SMTP_USERNAME")
            .or_else(|_| env::var("IMAP_USERNAME"))
            .map_err(|_| Error::Config("SMTP_USERNAME not set".into()))?;
        let password = env::var("SMTP_PASSWORD")
            .or_else(|_| env::var("IMAP_PASSWORD"))
            .map_err(|_| Error::Config("SMTP_PASSWORD not set".into()))?;

        Ok(Self {
            host: required("SMTP_HOST")?,
            port: port_var("SMTP_PORT", crate::smtp::SUBMISSION_PORT)?,
            username,
            password,
            use_tls: bool_var("SMTP_STARTTLS", true)?,
        })
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("{name} not set")))
}

fn port_var(name: &str, default: u16) -> Result<u16> {
    env::var(name).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}")))
    })
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("Invalid {name}: {other}"))),
    }
}
