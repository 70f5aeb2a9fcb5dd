//! SMTP submission client (RFC 5321 subset)
//!
//! Linear flow: greeting, EHLO, optional STARTTLS and second EHLO,
//! `AUTH LOGIN`, then MAIL / RCPT / DATA per message. A failed send
//! leaves the session in [`SmtpState::Aborted`]; the caller must
//! close and reconnect.

use crate::email::Email;
use crate::error::{Error, Result};
use crate::mime::transfer::encode_quoted_printable;
use crate::transport::Connection;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fmt;
use tracing::{debug, info, trace, warn};

/// Implicit-TLS SMTP port.
pub const SMTPS_PORT: u16 = 465;

/// Message submission port, upgraded with STARTTLS.
pub const SUBMISSION_PORT: u16 = 587;

/// Longest line allowed in 8bit content, excluding CRLF.
const MAX_LINE_OCTETS: usize = 998;

/// Longest encoded word in a header.
const MAX_ENCODED_WORD: usize = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    Disconnected,
    /// Greeted and EHLO accepted (over TLS if negotiated).
    Connected,
    Authenticated,
    /// A send failed midway; only `close`/`quit` are accepted.
    Aborted,
}

impl fmt::Display for SmtpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connected => f.write_str("connected"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// A complete, possibly multiline, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl SmtpReply {
    /// True if an EHLO reply advertises `extension` (case-insensitive).
    #[must_use]
    pub fn has_extension(&self, extension: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|keyword| keyword.eq_ignore_ascii_case(extension))
        })
    }
}

impl fmt::Display for SmtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                f.write_str("\r\n")?;
            }
            let separator = if i == last { ' ' } else { '-' };
            write!(f, "{}{}{}", self.code, separator, line)?;
        }
        Ok(())
    }
}

/// SMTP client owning one connection.
pub struct SmtpClient {
    conn: Option<Connection>,
    state: SmtpState,
    extensions: Vec<String>,
}

impl Default for SmtpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtpClient {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            conn: None,
            state: SmtpState::Disconnected,
            extensions: Vec::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> SmtpState {
        self.state
    }

    /// True when the session runs over TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.conn.as_ref().is_some_and(Connection::is_tls)
    }

    /// EHLO keywords from the last EHLO reply.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Connect, read the `220` greeting and say EHLO.
    ///
    /// Port 465 uses TLS from the start; any other port connects in
    /// plain text. With `use_tls`, a plain session is upgraded with
    /// STARTTLS when the port is 587 or the server advertises
    /// STARTTLS, and EHLO is repeated over the encrypted channel.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` unless disconnected, a transport
    /// error on socket or TLS failure, and `Error::Protocol` for an
    /// unexpected status code. The client stays disconnected on
    /// failure.
    pub async fn connect(&mut self, host: &str, port: u16, use_tls: bool) -> Result<()> {
        if self.state != SmtpState::Disconnected {
            return Err(self.invalid_state("connect"));
        }
        debug!("Connecting to SMTP server at {}:{}", host, port);

        match self.handshake(host, port, use_tls).await {
            Ok(()) => {
                self.state = SmtpState::Connected;
                info!("Connected to SMTP server {} (tls: {})", host, self.is_tls());
                Ok(())
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    /// `AUTH LOGIN` with Base64 username and password.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` unless connected and not yet
    /// authenticated, and `Error::Protocol` if any step is not
    /// answered with the expected `334`/`235`.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        if self.state != SmtpState::Connected {
            return Err(self.invalid_state("authenticate"));
        }
        self.expect("AUTH LOGIN", "AUTH LOGIN", 334).await?;
        self.expect(&BASE64.encode(username), "(username)", 334).await?;
        self.expect(&BASE64.encode(password), "(password)", 235).await?;
        self.state = SmtpState::Authenticated;
        info!("SMTP authenticated as {}", username);
        Ok(())
    }

    /// Submit one message: MAIL FROM, RCPT TO for every `to` and `cc`
    /// address, DATA, content and the terminating dot.
    ///
    /// The first rejected recipient aborts the transaction before
    /// DATA.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` unless connected,
    /// `Error::InvalidArgument` without a sender or recipients, and
    /// `Error::Protocol` for any reply other than `250` (`354` for
    /// DATA). After a failure the client is [`SmtpState::Aborted`].
    pub async fn send(&mut self, email: &Email) -> Result<()> {
        if !matches!(self.state, SmtpState::Connected | SmtpState::Authenticated) {
            return Err(self.invalid_state("send"));
        }
        if email.from.trim().is_empty() {
            return Err(Error::InvalidArgument("message has no sender".into()));
        }
        if email.to.is_empty() && email.cc.is_empty() {
            return Err(Error::InvalidArgument("message has no recipients".into()));
        }
        check_header_fields(email)?;

        match self.transaction(email).await {
            Ok(()) => {
                info!("Sent message to {} recipient(s)", email.to.len() + email.cc.len());
                Ok(())
            }
            Err(e) => {
                if self.conn.is_some() {
                    warn!("SMTP send aborted: {}", e);
                    self.state = SmtpState::Aborted;
                }
                Err(e)
            }
        }
    }

    /// Send `QUIT` and close the connection. Idempotent; errors are
    /// logged, not returned.
    pub async fn quit(&mut self) {
        if self.conn.is_some()
            && let Err(e) = self.exchange("QUIT", "QUIT").await
        {
            debug!("QUIT failed: {}", e);
        }
        self.close().await;
    }

    /// Close the connection without `QUIT`. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.shutdown().await;
            debug!("SMTP connection closed");
        }
        self.state = SmtpState::Disconnected;
        self.extensions.clear();
    }

    // -- private helpers --

    async fn handshake(&mut self, host: &str, port: u16, use_tls: bool) -> Result<()> {
        let conn = if port == SMTPS_PORT {
            Connection::open_tls(host, port).await?
        } else {
            Connection::open_plain(host, port).await?
        };
        self.conn = Some(conn);

        let greeting = self.read_reply().await?;
        if greeting.code != 220 {
            return Err(Error::smtp(
                "(greeting)",
                greeting.to_string(),
                format!("expected 220, got {}", greeting.code),
            ));
        }

        let ehlo = format!("EHLO {host}");
        let mut reply = self.expect(&ehlo, &ehlo, 250).await?;

        let offers_starttls = port == SUBMISSION_PORT || reply.has_extension("STARTTLS");
        if use_tls && !self.is_tls() && offers_starttls {
            self.expect("STARTTLS", "STARTTLS", 220).await?;
            let plain = self.conn.take().ok_or(Error::ConnectionClosed)?;
            self.conn = Some(plain.upgrade_to_tls().await?);
            reply = self.expect(&ehlo, &ehlo, 250).await?;
        }

        self.extensions = reply
            .lines
            .iter()
            .skip(1)
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_ascii_uppercase)
            .collect();
        Ok(())
    }

    async fn transaction(&mut self, email: &Email) -> Result<()> {
        let mail_from = format!("MAIL FROM:<{}>", email.from.trim());
        self.expect(&mail_from, &mail_from, 250).await?;

        for recipient in email.to.iter().chain(&email.cc) {
            let rcpt = format!("RCPT TO:<{}>", recipient.trim());
            self.expect(&rcpt, &rcpt, 250).await?;
        }

        self.expect("DATA", "DATA", 354).await?;

        let content = dot_stuff(&build_message(email));
        let conn = self.conn.as_mut().ok_or(Error::ConnectionClosed)?;
        trace!("C: <{} bytes of message data>", content.len());
        if let Err(e) = conn.write_raw(content.as_bytes()).await {
            self.drop_connection();
            return Err(e);
        }
        let reply = self.read_reply().await?;
        if reply.code != 250 {
            return Err(Error::smtp(
                "(end of data)",
                reply.to_string(),
                format!("expected 250, got {}", reply.code),
            ));
        }
        Ok(())
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn drop_connection(&mut self) {
        self.conn = None;
        self.state = SmtpState::Disconnected;
    }

    /// Send `command` and require status `code`. `shown` replaces the
    /// command in logs and errors.
    async fn expect(&mut self, command: &str, shown: &str, code: u16) -> Result<SmtpReply> {
        let reply = self.exchange(command, shown).await?;
        if reply.code != code {
            return Err(Error::smtp(
                shown,
                reply.to_string(),
                format!("expected {code}, got {}", reply.code),
            ));
        }
        Ok(reply)
    }

    async fn exchange(&mut self, command: &str, shown: &str) -> Result<SmtpReply> {
        let conn = self.conn.as_mut().ok_or(Error::ConnectionClosed)?;
        trace!("C: {}", shown);
        if let Err(e) = conn.write_line(command).await {
            self.drop_connection();
            return Err(e);
        }
        self.read_reply().await
    }

    /// Read one reply, following `-` continuation lines.
    async fn read_reply(&mut self) -> Result<SmtpReply> {
        let result = match self.conn.as_mut() {
            Some(conn) => read_reply(conn).await,
            None => Err(Error::ConnectionClosed),
        };
        if let Err(e) = &result
            && e.is_transport()
        {
            self.drop_connection();
        }
        result
    }
}

async fn read_reply(conn: &mut Connection) -> Result<SmtpReply> {
    let mut code = None;
    let mut lines = Vec::new();
    loop {
        let Some(line) = conn.read_line().await? else {
            return Err(Error::ConnectionClosed);
        };
        trace!("S: {}", line);

        let parsed = line.get(..3).and_then(|digits| digits.parse::<u16>().ok());
        let Some(line_code) = parsed else {
            return Err(Error::smtp("(reply)", line, "malformed reply"));
        };
        if code.is_some_and(|c| c != line_code) {
            return Err(Error::smtp("(reply)", line, "inconsistent reply codes"));
        }
        code = Some(line_code);

        let separator = line.as_bytes().get(3).copied();
        lines.push(line.get(4..).unwrap_or_default().to_string());
        if separator != Some(b'-') {
            return Ok(SmtpReply {
                code: line_code,
                lines,
            });
        }
    }
}

/// Serialize a message as RFC 5322 text with CRLF line endings.
///
/// The body is sent as 8bit unless a line exceeds 998 octets, in which
/// case it is quoted-printable encoded.
#[must_use]
pub fn build_message(email: &Email) -> String {
    let body = email.body.replace("\r\n", "\n");
    let too_long = body.split('\n').any(|line| line.len() > MAX_LINE_OCTETS);
    let (encoding, body) = if too_long {
        ("quoted-printable", encode_quoted_printable(&body))
    } else {
        ("8bit", body.split('\n').collect::<Vec<_>>().join("\r\n"))
    };

    let mut headers = vec![
        format!("Date: {}", email.date.to_rfc2822()),
        format!("From: {}", single_line(&email.from)),
        format!("To: {}", single_line(&email.to.join(", "))),
    ];
    if !email.cc.is_empty() {
        headers.push(format!("Cc: {}", single_line(&email.cc.join(", "))));
    }
    headers.push(format!("Subject: {}", encode_header(&single_line(&email.subject))));
    if !email.message_id.is_empty() {
        headers.push(format!("Message-ID: {}", single_line(&email.message_id)));
    }
    headers.push("MIME-Version: 1.0".to_string());
    headers.push("Content-Type: text/plain; charset=UTF-8".to_string());
    headers.push(format!("Content-Transfer-Encoding: {encoding}"));

    format!("{}\r\n\r\n{}\r\n", headers.join("\r\n"), body)
}

/// Header values never span lines.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Reject line breaks in the sender, recipients and header fields, which
/// would otherwise start new SMTP commands or header lines.
fn check_header_fields(email: &Email) -> Result<()> {
    let fields = [
        ("sender", email.from.as_str()),
        ("subject", email.subject.as_str()),
        ("message id", email.message_id.as_str()),
    ];
    let recipients = email.to.iter().chain(&email.cc).map(|r| ("recipient", r.as_str()));
    for (name, value) in fields.into_iter().chain(recipients) {
        if value.contains(['\r', '\n']) {
            return Err(Error::InvalidArgument(format!("{name} contains a line break")));
        }
    }
    Ok(())
}

/// Apply SMTP transparency and append the end-of-data line.
///
/// Every line starting with `.` gets a second dot.
#[must_use]
pub fn dot_stuff(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 8);
    for line in message.split_terminator("\r\n") {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str(".\r\n");
    out
}

/// Encode a header value as RFC 2047 `Q` words if it is not ASCII.
///
/// Words are kept within 75 characters and never split a character;
/// they are joined by folding whitespace.
#[must_use]
pub fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    const PREFIX: &str = "=?UTF-8?Q?";
    const SUFFIX: &str = "?=";
    let budget = MAX_ENCODED_WORD - PREFIX.len() - SUFFIX.len();

    let mut words = Vec::new();
    let mut current = String::new();
    let mut buf = [0u8; 4];
    for c in value.chars() {
        let token: String = if c == ' ' {
            "_".to_string()
        } else if c.is_ascii_alphanumeric() || matches!(c, '!' | '*' | '+' | '-' | '/') {
            c.to_string()
        } else {
            c.encode_utf8(&mut buf)
                .bytes()
                .map(|b| format!("={b:02X}"))
                .collect()
        };
        if current.len() + token.len() > budget {
            words.push(format!("{PREFIX}{current}{SUFFIX}"));
            current.clear();
        }
        current.push_str(&token);
    }
    if !current.is_empty() {
        words.push(format!("{PREFIX}{current}{SUFFIX}"));
    }
    words.join("\r\n ")
}
