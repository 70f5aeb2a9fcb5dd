//! IMAP protocol client (RFC 3501 subset)
//!
//! One command is in flight at a time: every operation writes a
//! tagged command, then reads until the line starting with that tag.
//! Messages are addressed by sequence number, so numbers read before
//! an EXPUNGE must not be reused after it.

use crate::email::Email;
use crate::error::{Error, Result};
use crate::flag::{Flag, flag_list};
use crate::folder::{Folder, FolderStatus};
use crate::mime;
use crate::sequence::build_sequence_set;
use crate::transport::Connection;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use tracing::{debug, info, trace, warn};

/// Implicit-TLS IMAP port.
pub const IMAPS_PORT: u16 = 993;

/// Items requested for every message by [`ImapClient::fetch_emails`].
const FETCH_ITEMS: &str =
    "(FLAGS BODY[HEADER.FIELDS (FROM TO SUBJECT DATE MESSAGE-ID)] BODY.PEEK[])";

/// Largest literal accepted from the server.
pub const MAX_LITERAL_LEN: usize = 64 * 1024 * 1024;

lazy_static! {
    static ref LITERAL: Regex = Regex::new(r"\{(\d+)\}$").expect("valid regex");
    static ref EXISTS: Regex = Regex::new(r"(?im)^\* (\d+) EXISTS\s*$").expect("valid regex");
    static ref EXPUNGED: Regex = Regex::new(r"(?im)^\* (\d+) EXPUNGE\s*$").expect("valid regex");
    static ref CAPABILITY_CODE: Regex =
        Regex::new(r"(?i)\[CAPABILITY ([^\]]*)\]").expect("valid regex");
    static ref STATUS_MESSAGES: Regex = Regex::new(r"(?i)\bMESSAGES (\d+)").expect("valid regex");
    static ref STATUS_UNSEEN: Regex = Regex::new(r"(?i)\bUNSEEN (\d+)").expect("valid regex");
}

/// Connection state. Operations are only accepted in the states that
/// allow them; anything else fails with [`Error::InvalidState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImapState {
    Disconnected,
    /// Greeted, not logged in.
    Connected,
    Authenticated,
    /// A folder is selected; `exists` is its current message count.
    Selected { folder: String, exists: u32 },
}

impl fmt::Display for ImapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connected => f.write_str("connected"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Selected { folder, .. } => write!(f, "folder {folder} is selected"),
        }
    }
}

/// IMAP client owning one TLS connection.
pub struct ImapClient {
    conn: Option<Connection>,
    state: ImapState,
    tag_counter: u32,
    capabilities: Vec<String>,
}

impl Default for ImapClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ImapClient {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            conn: None,
            state: ImapState::Disconnected,
            tag_counter: 0,
            capabilities: Vec::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> &ImapState {
        &self.state
    }

    /// Name of the selected folder, if any.
    #[must_use]
    pub fn selected_folder(&self) -> Option<&str> {
        match &self.state {
            ImapState::Selected { folder, .. } => Some(folder),
            _ => None,
        }
    }

    /// Message count of the selected folder, if any.
    #[must_use]
    pub const fn message_count(&self) -> Option<u32> {
        match &self.state {
            ImapState::Selected { exists, .. } => Some(*exists),
            _ => None,
        }
    }

    /// Capabilities advertised in the greeting or after LOGIN.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Open a TLS connection and read the server greeting.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` unless disconnected, a transport
    /// error if the connection fails, and `Error::Protocol` if the
    /// greeting does not start with `* OK`. The client stays
    /// disconnected on failure.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.state != ImapState::Disconnected {
            return Err(self.invalid_state("connect"));
        }
        debug!("Connecting to IMAP server at {}:{}", host, port);

        let mut conn = Connection::open_tls(host, port).await?;
        let Some(greeting) = conn.read_line().await? else {
            return Err(Error::ConnectionClosed);
        };
        trace!("S: {}", greeting);
        if !greeting.starts_with("* OK") {
            conn.shutdown().await;
            return Err(Error::imap("(greeting)", greeting, "server did not greet with * OK"));
        }

        self.capabilities = parse_capabilities(&greeting).unwrap_or_default();
        self.tag_counter = 0;
        self.conn = Some(conn);
        self.state = ImapState::Connected;
        info!("Connected to IMAP server {}", host);
        Ok(())
    }

    /// Authenticate with `LOGIN`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` unless connected and not yet
    /// logged in, and `Error::Protocol` if the server rejects the
    /// credentials.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        if self.state != ImapState::Connected {
            return Err(self.invalid_state("log in"));
        }
        let response = self
            .command(&format!("LOGIN {} {}", quote(username), quote(password)))
            .await?;

        if let Some(caps) = response
            .lines()
            .find_map(|line| {
                line.strip_prefix("* CAPABILITY ")
                    .map(|rest| rest.split_whitespace().map(str::to_string).collect())
            })
            .or_else(|| response.lines().last().and_then(parse_capabilities))
        {
            self.capabilities = caps;
        }
        self.state = ImapState::Authenticated;
        info!("Logged in as {}", username);
        Ok(())
    }

    /// `SELECT` a folder and return its message count.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` before login and `Error::Protocol`
    /// if the folder cannot be selected. A failed SELECT leaves no
    /// folder selected.
    pub async fn select_folder(&mut self, name: &str) -> Result<u32> {
        self.require_authenticated("select a folder")?;
        let response = match self.command(&format!("SELECT {}", quote(name))).await {
            Ok(response) => response,
            Err(e) => {
                if self.conn.is_some() {
                    self.state = ImapState::Authenticated;
                }
                return Err(e);
            }
        };

        let exists = EXISTS
            .captures_iter(&response)
            .filter_map(|caps| caps[1].parse().ok())
            .last()
            .unwrap_or(0);
        debug!("Selected {} with {} messages", name, exists);
        self.state = ImapState::Selected {
            folder: name.to_string(),
            exists,
        };
        Ok(exists)
    }

    /// Fetch messages `start..=end` (1-based sequence numbers) of the
    /// selected folder.
    ///
    /// Returns one [`Email`] per `* n FETCH` block, in server order.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` without a selected folder,
    /// `Error::InvalidArgument` for a zero or inverted range, and
    /// `Error::Protocol` if the server rejects the FETCH.
    pub async fn fetch_emails(&mut self, start: u32, end: u32) -> Result<Vec<Email>> {
        self.require_selected("fetch emails")?;
        if start == 0 || end < start {
            return Err(Error::InvalidArgument(format!(
                "invalid message range {start}:{end}"
            )));
        }
        let response = self
            .command_bytes(&format!("FETCH {start}:{end} {FETCH_ITEMS}"))
            .await?;
        let emails = mime::parse_fetch_response(&response);
        debug!("Fetched {} messages in range {}:{}", emails.len(), start, end);
        Ok(emails)
    }

    /// Fetch and decode the body text of one message.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` without a selected folder,
    /// `Error::InvalidArgument` for message number 0, and
    /// `Error::Protocol` if the server rejects the FETCH or returns
    /// no `BODY[TEXT]`.
    pub async fn fetch_email_body(&mut self, message_number: u32) -> Result<String> {
        self.require_selected("fetch a message body")?;
        if message_number == 0 {
            return Err(Error::InvalidArgument("message number 0".into()));
        }
        let command = format!("FETCH {message_number} BODY[TEXT]");
        let response = self.command_bytes(&command).await?;

        let text = mime::fetch::split_blocks(&response)
            .iter()
            .filter(|block| block.number == message_number)
            .find_map(|block| block.section("BODY[TEXT]"))
            .map(|raw| mime::decode_body_text(raw).text());
        text.ok_or_else(|| {
            let response = String::from_utf8_lossy(&response).into_owned();
            Error::imap(command, response, "no BODY[TEXT] in response")
        })
    }

    /// `LIST "" "*"`: every folder on the server.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` before login and `Error::Protocol`
    /// if the server rejects the LIST.
    pub async fn list_folders(&mut self) -> Result<Vec<Folder>> {
        self.require_authenticated("list folders")?;
        let response = self.command("LIST \"\" \"*\"").await?;
        let folders: Vec<Folder> = response.lines().filter_map(Folder::from_list_line).collect();
        debug!("Listed {} folders", folders.len());
        Ok(folders)
    }

    /// `STATUS` message and unseen counts of a folder.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` before login and `Error::Protocol`
    /// if the server rejects the STATUS.
    pub async fn folder_status(&mut self, name: &str) -> Result<FolderStatus> {
        self.require_authenticated("query folder status")?;
        let response = self
            .command(&format!("STATUS {} (MESSAGES UNSEEN)", quote(name)))
            .await?;
        let line = response
            .lines()
            .find(|line| line.starts_with("* STATUS"))
            .unwrap_or_default();
        let count = |re: &Regex| {
            re.captures(line)
                .and_then(|caps| caps[1].parse().ok())
                .unwrap_or(0)
        };
        Ok(FolderStatus {
            messages: count(&STATUS_MESSAGES),
            unseen: count(&STATUS_UNSEEN),
        })
    }

    /// Add flags to messages with `STORE +FLAGS`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` without a selected folder,
    /// `Error::InvalidArgument` for empty input or message number 0,
    /// and `Error::Protocol` if the server rejects the STORE.
    pub async fn add_flags(&mut self, numbers: &[u32], flags: &[Flag]) -> Result<()> {
        self.store(numbers, "+FLAGS", flags).await
    }

    /// Remove flags from messages with `STORE -FLAGS`.
    ///
    /// # Errors
    ///
    /// Same as [`ImapClient::add_flags`].
    pub async fn remove_flags(&mut self, numbers: &[u32], flags: &[Flag]) -> Result<()> {
        self.store(numbers, "-FLAGS", flags).await
    }

    /// Mark one message `\Deleted` and expunge.
    ///
    /// # Errors
    ///
    /// Same as [`ImapClient::delete_emails`].
    pub async fn delete_email(&mut self, message_number: u32) -> Result<()> {
        self.delete_emails(&[message_number]).await
    }

    /// Mark messages `\Deleted` and expunge. Message numbers of the
    /// selected folder shift afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` without a selected folder,
    /// `Error::InvalidArgument` for empty input or message number 0,
    /// and `Error::Protocol` if STORE or EXPUNGE is rejected.
    pub async fn delete_emails(&mut self, numbers: &[u32]) -> Result<()> {
        self.store(numbers, "+FLAGS", &[Flag::Deleted]).await?;
        self.expunge().await?;
        Ok(())
    }

    /// Move one message to another folder.
    ///
    /// # Errors
    ///
    /// Same as [`ImapClient::move_emails`].
    pub async fn move_email(&mut self, message_number: u32, target: &str) -> Result<()> {
        self.move_emails(&[message_number], target).await
    }

    /// Move messages to another folder: `MOVE` when the server
    /// advertises it, otherwise COPY, STORE `\Deleted` and EXPUNGE.
    /// Message numbers of the selected folder shift afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` without a selected folder,
    /// `Error::InvalidArgument` for empty input or message number 0,
    /// and `Error::Protocol` if any step is rejected.
    pub async fn move_emails(&mut self, numbers: &[u32], target: &str) -> Result<()> {
        self.require_selected("move emails")?;
        let set = sequence_set(numbers)?;

        if self.has_capability("MOVE") {
            let response = self.command(&format!("MOVE {set} {}", quote(target))).await?;
            let removed = expunged_numbers(&response);
            self.shrink_selected(removed.len());
        } else {
            self.command(&format!("COPY {set} {}", quote(target))).await?;
            self.store(numbers, "+FLAGS", &[Flag::Deleted]).await?;
            self.expunge().await?;
        }
        debug!("Moved {} to {}", set, target);
        Ok(())
    }

    /// `EXPUNGE` the selected folder.
    ///
    /// Returns the sequence numbers the server reported removed, in
    /// report order. Each number is relative to the folder state after
    /// the previous removal.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` without a selected folder and
    /// `Error::Protocol` if the server rejects the EXPUNGE.
    pub async fn expunge(&mut self) -> Result<Vec<u32>> {
        self.require_selected("expunge")?;
        let response = self.command("EXPUNGE").await?;
        let removed = expunged_numbers(&response);
        self.shrink_selected(removed.len());
        debug!("Expunged {} messages", removed.len());
        Ok(removed)
    }

    /// Send `LOGOUT` and close the connection.
    ///
    /// Idempotent. Errors during logout are logged, not returned.
    pub async fn logout(&mut self) {
        if self.conn.is_none() {
            self.state = ImapState::Disconnected;
            return;
        }
        if let Err(e) = self.command("LOGOUT").await {
            debug!("LOGOUT failed: {}", e);
        }
        self.close().await;
    }

    /// Close the connection without `LOGOUT`. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.shutdown().await;
            debug!("IMAP connection closed");
        }
        self.state = ImapState::Disconnected;
    }

    // -- private helpers --

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{:03}", self.tag_counter)
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn require_authenticated(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ImapState::Authenticated | ImapState::Selected { .. } => Ok(()),
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn require_selected(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ImapState::Selected { .. } => Ok(()),
            _ => Err(self.invalid_state(operation)),
        }
    }

    const fn shrink_selected(&mut self, removed: usize) {
        if let ImapState::Selected { exists, .. } = &mut self.state {
            #[allow(clippy::cast_possible_truncation)]
            let removed = removed as u32;
            *exists = exists.saturating_sub(removed);
        }
    }

    async fn store(&mut self, numbers: &[u32], action: &str, flags: &[Flag]) -> Result<()> {
        self.require_selected("store flags")?;
        let set = sequence_set(numbers)?;
        if flags.is_empty() {
            return Err(Error::InvalidArgument("no flags given".into()));
        }
        self.command(&format!("STORE {set} {action} {}", flag_list(flags)))
            .await?;
        Ok(())
    }

    /// Send one tagged command and read its complete response as text.
    async fn command(&mut self, command: &str) -> Result<String> {
        let response = self.command_bytes(command).await?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    /// Send one tagged command and read its complete response, with
    /// literal contents exactly as received.
    ///
    /// A failure while reading drops the connection, since the stream
    /// position is lost; a tagged `NO`/`BAD` becomes `Error::Protocol`
    /// and leaves the connection usable.
    async fn command_bytes(&mut self, command: &str) -> Result<Vec<u8>> {
        let tag = self.next_tag();
        let line = format!("{tag} {command}");
        let shown = redact(&line);

        let response = match self.exchange(&line, &tag).await {
            Ok(response) => response,
            Err(e) => {
                warn!("IMAP failure during `{}`: {}", shown, e);
                if let Some(mut conn) = self.conn.take() {
                    conn.shutdown().await;
                }
                self.state = ImapState::Disconnected;
                return Err(e);
            }
        };

        let completion = last_line(&response);
        let status = completion
            .strip_prefix(tag.as_str())
            .map(str::trim_start)
            .unwrap_or_default();
        if status
            .split_whitespace()
            .next()
            .is_some_and(|word| word.eq_ignore_ascii_case("OK"))
        {
            return Ok(response);
        }
        let message = status.to_string();
        Err(Error::imap(
            shown,
            String::from_utf8_lossy(&response).into_owned(),
            message,
        ))
    }

    async fn exchange(&mut self, line: &str, tag: &str) -> Result<Vec<u8>> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::ConnectionClosed);
        };
        trace!("C: {}", redact(line));
        conn.write_line(line).await?;
        read_full_response(conn, tag).await
    }
}

/// Read until the line starting with `tag `.
///
/// A line ending in `{n}` is followed by exactly `n` raw bytes, which
/// are kept as they are. Literals over [`MAX_LITERAL_LEN`] are refused
/// before anything is allocated for them.
async fn read_full_response(conn: &mut Connection, tag: &str) -> Result<Vec<u8>> {
    let prefix = format!("{tag} ");
    let mut response = Vec::new();
    loop {
        let Some(line) = conn.read_line().await? else {
            return Err(Error::ConnectionClosed);
        };
        response.extend_from_slice(line.as_bytes());
        response.extend_from_slice(b"\r\n");

        let literal_len = LITERAL
            .captures(&line)
            .map(|caps| caps[1].parse::<usize>().unwrap_or(usize::MAX));
        if let Some(len) = literal_len {
            if len > MAX_LITERAL_LEN {
                return Err(Error::imap(
                    format!("{tag} (literal)"),
                    line,
                    format!("literal of {len} bytes exceeds {MAX_LITERAL_LEN}"),
                ));
            }
            let bytes = conn.read_exact(len).await?;
            response.extend_from_slice(&bytes);
            continue;
        }

        if line.starts_with(&prefix) {
            trace!("S: {}", line);
            return Ok(response);
        }
    }
}

/// Last CRLF-terminated line of a response, as text.
fn last_line(response: &[u8]) -> String {
    let trimmed = response.strip_suffix(b"\r\n").unwrap_or(response);
    let start = trimmed
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&trimmed[start..]).into_owned()
}

/// Quote an IMAP string, escaping `\` and `"`.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '\\' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Hide LOGIN credentials in logs and errors.
fn redact(line: &str) -> String {
    let mut words = line.splitn(3, ' ');
    match (words.next(), words.next()) {
        (Some(tag), Some(verb)) if verb.eq_ignore_ascii_case("LOGIN") => {
            format!("{tag} LOGIN [redacted]")
        }
        _ => line.to_string(),
    }
}

fn sequence_set(numbers: &[u32]) -> Result<String> {
    if numbers.is_empty() {
        return Err(Error::InvalidArgument("no message numbers given".into()));
    }
    if numbers.contains(&0) {
        return Err(Error::InvalidArgument("message number 0".into()));
    }
    Ok(build_sequence_set(numbers))
}

fn parse_capabilities(line: &str) -> Option<Vec<String>> {
    CAPABILITY_CODE
        .captures(line)
        .map(|caps| caps[1].split_whitespace().map(str::to_string).collect())
}

fn expunged_numbers(response: &str) -> Vec<u32> {
    EXPUNGED
        .captures_iter(response)
        .filter_map(|caps| caps[1].parse().ok())
        .collect()
}
