//! Connect-per-call mail service
//!
//! Each operation opens a fresh session, does its work and logs out,
//! so callers never hold stale sequence numbers across sessions.

use crate::config::{ImapConfig, SmtpConfig};
use crate::email::Email;
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::folder::Folder;
use crate::imap::ImapClient;
use crate::smtp::SmtpClient;
use tracing::{debug, info, warn};

/// Mail service over one IMAP account and an optional SMTP server.
pub struct MailClient {
    imap: ImapConfig,
    smtp: Option<SmtpConfig>,
}

impl MailClient {
    #[must_use]
    pub const fn new(imap: ImapConfig) -> Self {
        Self { imap, smtp: None }
    }

    /// Enable [`MailClient::send`].
    #[must_use]
    pub fn with_smtp(mut self, smtp: SmtpConfig) -> Self {
        self.smtp = Some(smtp);
        self
    }

    /// List all folders.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login or LIST fails.
    pub async fn list_folders(&self) -> Result<Vec<Folder>> {
        let mut imap = self.connect_imap().await?;
        let result = imap.list_folders().await;
        imap.logout().await;
        result
    }

    /// List all folders with message and unread counts.
    ///
    /// Folders whose STATUS fails keep zero counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login or LIST fails.
    pub async fn list_folders_with_counts(&self) -> Result<Vec<Folder>> {
        let mut imap = self.connect_imap().await?;
        let mut folders = match imap.list_folders().await {
            Ok(folders) => folders,
            Err(e) => {
                imap.logout().await;
                return Err(e);
            }
        };

        for folder in folders.iter_mut().filter(|f| f.selectable) {
            match imap.folder_status(&folder.full_path).await {
                Ok(status) => folder.apply_status(status),
                Err(e) if e.is_transport() => {
                    imap.close().await;
                    return Err(e);
                }
                Err(e) => warn!("STATUS {} failed: {}", folder.full_path, e),
            }
        }

        imap.logout().await;
        Ok(folders)
    }

    /// Fetch the `n` most recent messages of a folder, newest first.
    ///
    /// An empty folder returns an empty list without issuing FETCH.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login, SELECT or FETCH
    /// fails.
    pub async fn fetch_recent(&self, folder: &str, n: u32) -> Result<Vec<Email>> {
        let mut imap = self.connect_imap().await?;
        let result = Self::recent(&mut imap, folder, n).await;
        imap.logout().await;
        result
    }

    /// Fetch one message by sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login, SELECT or FETCH
    /// fails, or `Error::InvalidArgument` if the server returns no
    /// such message.
    pub async fn fetch_email(&self, folder: &str, message_number: u32) -> Result<Email> {
        let mut imap = self.connect_imap().await?;
        let result = async {
            imap.select_folder(folder).await?;
            imap.fetch_emails(message_number, message_number)
                .await?
                .into_iter()
                .find(|email| email.message_number == message_number)
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("no message {message_number} in {folder}"))
                })
        }
        .await;
        imap.logout().await;
        result
    }

    /// Fetch the decoded body text of one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login, SELECT or FETCH
    /// fails.
    pub async fn fetch_body(&self, folder: &str, message_number: u32) -> Result<String> {
        let mut imap = self.connect_imap().await?;
        let result = async {
            imap.select_folder(folder).await?;
            imap.fetch_email_body(message_number).await
        }
        .await;
        imap.logout().await;
        result
    }

    /// Move one message to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login, SELECT or move
    /// fails.
    pub async fn move_email(&self, folder: &str, message_number: u32, target: &str) -> Result<()> {
        let mut imap = self.connect_imap().await?;
        let result = async {
            imap.select_folder(folder).await?;
            imap.move_email(message_number, target).await
        }
        .await;
        imap.logout().await;
        result
    }

    /// Delete and expunge one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login, SELECT, STORE or
    /// EXPUNGE fails.
    pub async fn delete_email(&self, folder: &str, message_number: u32) -> Result<()> {
        let mut imap = self.connect_imap().await?;
        let result = async {
            imap.select_folder(folder).await?;
            imap.delete_email(message_number).await
        }
        .await;
        imap.logout().await;
        result
    }

    /// Add or remove flags on messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login, SELECT or STORE
    /// fails.
    pub async fn set_flags(
        &self,
        folder: &str,
        numbers: &[u32],
        flags: &[Flag],
        add: bool,
    ) -> Result<()> {
        let mut imap = self.connect_imap().await?;
        let result = async {
            imap.select_folder(folder).await?;
            if add {
                imap.add_flags(numbers, flags).await
            } else {
                imap.remove_flags(numbers, flags).await
            }
        }
        .await;
        imap.logout().await;
        result
    }

    /// Send a message through the configured SMTP server.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` without SMTP configuration, and an
    /// error if the connection, authentication or submission fails.
    pub async fn send(&self, email: &Email) -> Result<()> {
        let config = self
            .smtp
            .as_ref()
            .ok_or_else(|| Error::Config("SMTP is not configured".into()))?;

        let mut smtp = SmtpClient::new();
        smtp.connect(&config.host, config.port, config.use_tls).await?;
        let result = async {
            smtp.authenticate(&config.username, &config.password).await?;
            smtp.send(email).await
        }
        .await;

        if result.is_ok() {
            smtp.quit().await;
        } else {
            smtp.close().await;
        }
        result
    }

    // -- private helpers --

    async fn connect_imap(&self) -> Result<ImapClient> {
        let mut imap = ImapClient::new();
        imap.connect(&self.imap.host, self.imap.port).await?;
        if let Err(e) = imap.login(&self.imap.username, &self.imap.password).await {
            imap.close().await;
            return Err(e);
        }
        Ok(imap)
    }

    async fn recent(imap: &mut ImapClient, folder: &str, n: u32) -> Result<Vec<Email>> {
        let count = imap.select_folder(folder).await?;
        let Some((start, end)) = recent_range(count, n) else {
            debug!("Nothing to fetch from {} ({} messages)", folder, count);
            return Ok(Vec::new());
        };

        info!("Fetching messages {}:{} from {}", start, end, folder);
        let mut emails = imap.fetch_emails(start, end).await?;
        emails.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(emails)
    }
}

/// Sequence range of the last `n` of `count` messages.
#[must_use]
pub const fn recent_range(count: u32, n: u32) -> Option<(u32, u32)> {
    if count == 0 || n == 0 {
        return None;
    }
    let start = count.saturating_sub(n - 1);
    Some((if start == 0 { 1 } else { start }, count))
}
