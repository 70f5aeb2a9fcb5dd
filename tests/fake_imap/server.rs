//! In-process fake IMAP server for integration testing
//!
//! # How IMAP works (educational overview)
//!
//! IMAP (Internet Message Access Protocol, RFC 3501) is a text-based
//! protocol for accessing email on a remote server. Unlike POP3, IMAP
//! keeps messages on the server and supports folders and flags.
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP and immediately starts TLS (port 993)
//!       |
//!   Server sends greeting: "* OK [CAPABILITY IMAP4rev1] ready\r\n"
//!       |
//!   Client sends LOGIN with username and password
//!       |
//!   Client issues commands: LIST, SELECT, FETCH, STORE, ...
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! ## Command format
//!
//! Every client command starts with a **tag** chosen by the client
//! (`A001`, `A002`, ...). The server echoes this tag in its completion
//! response so the client can match responses to commands:
//!
//! ```text
//!   Client:  A001 LOGIN "user" "pass"
//!   Server:  A001 OK LOGIN completed
//! ```
//!
//! Lines prefixed with `*` are **untagged** responses -- data the
//! server sends before the final tagged OK/NO/BAD:
//!
//! ```text
//!   Client:  A002 LIST "" "*"
//!   Server:  * LIST (\HasNoChildren) "/" "INBOX"
//!   Server:  * LIST (\HasNoChildren) "/" "Sent"
//!   Server:  A002 OK LIST completed
//! ```

use super::handlers::{
    FetchItems, StoreArgs, handle_copy, handle_expunge, handle_fetch, handle_list, handle_login,
    handle_logout, handle_move, handle_select, handle_status, handle_store,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Greeting sent when no other is configured.
pub const DEFAULT_GREETING: &str = "* OK [CAPABILITY IMAP4rev1] Fake server ready";

/// Behaviour switches for one server instance.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// First line sent after the TLS handshake, without CRLF.
    pub greeting: String,
    /// Answer every LOGIN with NO.
    pub reject_login: bool,
    /// Accept the MOVE command. Only useful together with a greeting
    /// that advertises it.
    pub allow_move: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            reject_login: false,
            allow_move: false,
        }
    }
}

impl ServerOptions {
    /// Advertise and accept MOVE.
    pub fn with_move(mut self) -> Self {
        self.greeting = "* OK [CAPABILITY IMAP4rev1 MOVE] Fake server ready".to_string();
        self.allow_move = true;
        self
    }
}

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so no cert files are needed. Every command line it
/// receives is recorded so tests can assert on the exact wire traffic.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    commands: Arc<Mutex<Vec<String>>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAP server with the given mailbox state.
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::start_with(mailbox, ServerOptions::default()).await
    }

    /// Start a server with non-default behaviour.
    ///
    /// 1. Binds to `127.0.0.1:0` -- the OS picks a free port.
    /// 2. Generates a self-signed TLS certificate via `rcgen`.
    /// 3. Spawns a tokio task that accepts connections and speaks
    ///    IMAP over implicit TLS.
    ///
    /// The accept loop runs until the test's runtime shuts down.
    pub async fn start_with(mailbox: Mailbox, options: ServerOptions) -> Self {
        // Multiple tests may race to install the provider, so the
        // error for an already installed one is ignored.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();
        let acceptor = tls_acceptor();

        let mailbox = Arc::new(Mutex::new(mailbox));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let options = Arc::new(options);

        let handle = {
            let mailbox = mailbox.clone();
            let commands = commands.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _addr)) = listener.accept().await else {
                        break;
                    };
                    let acceptor = acceptor.clone();
                    let mailbox = mailbox.clone();
                    let commands = commands.clone();
                    let options = options.clone();
                    tokio::spawn(async move {
                        let Ok(tls_stream) = acceptor.accept(stream).await else {
                            return;
                        };
                        let session = Session {
                            mailbox: &mailbox,
                            commands: &commands,
                            options: &options,
                        };
                        session.run(tls_stream).await;
                    });
                }
            })
        };

        Self {
            port,
            mailbox,
            commands,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Every command line received so far, without CRLF, across all
    /// connections.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Snapshot of the current mailbox state.
    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.lock().unwrap().clone()
    }
}

/// Build a TLS acceptor around a fresh self-signed certificate for
/// `127.0.0.1`.
pub fn tls_acceptor() -> TlsAcceptor {
    let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
        .expect("generate self-signed cert");

    let cert_der = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .expect("build server TLS config");

    TlsAcceptor::from(Arc::new(tls_config))
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Shared state one connection works on.
struct Session<'a> {
    mailbox: &'a Mutex<Mailbox>,
    commands: &'a Mutex<Vec<String>>,
    options: &'a ServerOptions,
}

impl Session<'_> {
    /// Send the greeting, then run the command loop over an
    /// established TLS stream.
    ///
    /// Uses `imap-codec`'s `CommandCodec` to parse each client command
    /// into a strongly-typed `Command`, then dispatches to the
    /// appropriate handler based on the `CommandBody` variant. MOVE is
    /// dispatched on the raw line.
    ///
    /// Read handlers receive a snapshot (`Mailbox` clone) taken under
    /// lock. Write handlers receive `&Mutex<Mailbox>` and lock briefly
    /// to mutate state.
    #[allow(clippy::too_many_lines)]
    async fn run<S: AsyncRead + AsyncWrite + Unpin>(&self, stream: S) {
        let mut reader = BufReader::new(stream);
        let greeting = format!("{}\r\n", self.options.greeting);
        if write_line(&mut reader, &greeting).await.is_err() {
            return;
        }

        let mut authenticated = false;
        let mut selected_folder: Option<String> = None;
        let codec = CommandCodec::default();

        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            self.commands.lock().unwrap().push(trimmed.to_string());

            let mut words = trimmed.splitn(3, ' ');
            let (raw_tag, verb, rest) = (
                words.next().unwrap_or("*"),
                words.next().unwrap_or_default(),
                words.next().unwrap_or_default(),
            );

            if verb.eq_ignore_ascii_case("MOVE") && self.options.allow_move && authenticated {
                handle_move(
                    raw_tag,
                    rest,
                    self.mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
                continue;
            }

            let Ok((_, command)) = codec.decode(line.as_bytes()) else {
                let resp = format!("{raw_tag} BAD Parse error\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
                continue;
            };

            let tag = command.tag.inner();

            if !authenticated
                && !matches!(
                    command.body,
                    CommandBody::Login { .. } | CommandBody::Logout
                )
            {
                let resp = format!("{tag} NO Not authenticated\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
                continue;
            }

            // Take a snapshot for read-only handlers.
            let snap = self.mailbox.lock().unwrap().clone();

            match command.body {
                CommandBody::Login { .. } => {
                    authenticated =
                        handle_login(tag, self.options.reject_login, &mut reader).await;
                }
                CommandBody::List { .. } => {
                    handle_list(tag, &snap, &mut reader).await;
                }
                CommandBody::Select { mailbox: mb, .. } => {
                    let name = mailbox_name(&mb);
                    selected_folder = handle_select(tag, &name, &snap, &mut reader).await;
                }
                CommandBody::Status { mailbox: mb, .. } => {
                    let name = mailbox_name(&mb);
                    handle_status(tag, &name, &snap, &mut reader).await;
                }
                CommandBody::Fetch {
                    ref sequence_set,
                    uid: false,
                    ..
                } => {
                    handle_fetch(
                        tag,
                        sequence_set,
                        FetchItems::from_command(trimmed),
                        &snap,
                        selected_folder.as_deref(),
                        &mut reader,
                    )
                    .await;
                }
                CommandBody::Store {
                    ref sequence_set,
                    uid: false,
                    ref kind,
                    ref response,
                    ref flags,
                    ..
                } => {
                    let args = StoreArgs {
                        sequence_set,
                        kind,
                        response,
                        flags,
                    };
                    handle_store(
                        tag,
                        &args,
                        self.mailbox,
                        selected_folder.as_deref(),
                        &mut reader,
                    )
                    .await;
                }
                CommandBody::Copy {
                    ref sequence_set,
                    mailbox: ref dest_mb,
                    uid: false,
                    ..
                } => {
                    let dest_name = mailbox_name(dest_mb);
                    handle_copy(
                        tag,
                        sequence_set,
                        &dest_name,
                        self.mailbox,
                        selected_folder.as_deref(),
                        &mut reader,
                    )
                    .await;
                }
                CommandBody::Expunge => {
                    handle_expunge(tag, self.mailbox, selected_folder.as_deref(), &mut reader)
                        .await;
                }
                CommandBody::Logout => {
                    handle_logout(tag, &mut reader).await;
                    break;
                }
                _ => {
                    let resp = format!("{tag} BAD Unknown command\r\n");
                    if write_line(&mut reader, &resp).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
