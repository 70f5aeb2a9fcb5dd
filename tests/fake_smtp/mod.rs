//! Fake SMTP submission server for integration testing
//!
//! Speaks plain TCP with an optional STARTTLS upgrade:
//!
//! ```text
//!   Server:  220 fake.smtp.test ESMTP ready
//!   Client:  EHLO 127.0.0.1
//!   Server:  250-fake.smtp.test
//!   Server:  250-STARTTLS
//!   Server:  250 AUTH LOGIN
//!   Client:  STARTTLS
//!   Server:  220 Ready to start TLS
//!   ... TLS handshake, EHLO again ...
//!   Client:  AUTH LOGIN / MAIL FROM / RCPT TO / DATA / QUIT
//! ```
//!
//! Command lines and DATA contents are recorded for assertions. DATA
//! contents are kept exactly as received, dot-stuffing included.

use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// Behaviour switches for one server instance.
#[derive(Debug, Clone)]
pub struct SmtpOptions {
    /// Advertise and accept STARTTLS on the plain connection.
    pub starttls: bool,
    /// Answer the password step of AUTH LOGIN with 535.
    pub reject_auth: bool,
    /// Recipients answered with 550.
    pub reject_recipients: Vec<String>,
    /// Status code of the greeting.
    pub greeting_code: u16,
}

impl Default for SmtpOptions {
    fn default() -> Self {
        Self {
            starttls: false,
            reject_auth: false,
            reject_recipients: Vec::new(),
            greeting_code: 220,
        }
    }
}

/// What the server observed across all connections.
#[derive(Debug, Default)]
struct Recorded {
    commands: Vec<String>,
    messages: Vec<String>,
    tls_sessions: usize,
}

pub struct FakeSmtpServer {
    port: u16,
    recorded: Arc<Mutex<Recorded>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeSmtpServer {
    pub async fn start(options: SmtpOptions) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();
        let acceptor = tls_acceptor();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let options = Arc::new(options);

        let handle = {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _addr)) = listener.accept().await else {
                        break;
                    };
                    let acceptor = acceptor.clone();
                    let recorded = recorded.clone();
                    let options = options.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, acceptor, &recorded, &options).await;
                    });
                }
            })
        };

        Self {
            port,
            recorded,
            _handle: handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Command lines received so far, without CRLF. AUTH LOGIN
    /// credentials are recorded as sent (Base64).
    pub fn commands(&self) -> Vec<String> {
        self.recorded.lock().unwrap().commands.clone()
    }

    /// DATA contents, one entry per accepted message, without the
    /// terminating dot line.
    pub fn messages(&self) -> Vec<String> {
        self.recorded.lock().unwrap().messages.clone()
    }

    /// Number of completed STARTTLS handshakes.
    pub fn tls_sessions(&self) -> usize {
        self.recorded.lock().unwrap().tls_sessions
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
        .expect("generate self-signed cert");
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key_der.into())
        .expect("build server TLS config");
    TlsAcceptor::from(Arc::new(tls_config))
}

enum Outcome {
    Done,
    StartTls,
}

async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    recorded: &Mutex<Recorded>,
    options: &SmtpOptions,
) {
    let mut reader = BufReader::new(stream);
    let greeting = format!("{} fake.smtp.test ESMTP ready\r\n", options.greeting_code);
    if write(&mut reader, &greeting).await.is_err() {
        return;
    }

    if let Outcome::StartTls = run_session(&mut reader, recorded, options, false).await {
        let Ok(tls_stream) = acceptor.accept(reader.into_inner()).await else {
            return;
        };
        recorded.lock().unwrap().tls_sessions += 1;
        let mut reader = BufReader::new(tls_stream);
        run_session(&mut reader, recorded, options, true).await;
    }
}

async fn run_session<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    recorded: &Mutex<Recorded>,
    options: &SmtpOptions,
    tls: bool,
) -> Outcome {
    loop {
        let Some(line) = read(reader).await else {
            return Outcome::Done;
        };
        recorded.lock().unwrap().commands.push(line.clone());

        let upper = line.to_ascii_uppercase();
        let reply = if upper.starts_with("EHLO ") {
            let mut reply = String::from("250-fake.smtp.test\r\n");
            if options.starttls && !tls {
                reply.push_str("250-STARTTLS\r\n");
            }
            reply.push_str("250 AUTH LOGIN\r\n");
            reply
        } else if upper == "STARTTLS" && options.starttls && !tls {
            // Nothing may follow this line before the handshake.
            if write(reader, "220 Ready to start TLS\r\n").await.is_ok() {
                return Outcome::StartTls;
            }
            return Outcome::Done;
        } else if upper == "AUTH LOGIN" {
            auth_login(reader, recorded, options).await
        } else if upper.starts_with("MAIL FROM:") {
            "250 OK\r\n".to_string()
        } else if let Some(addr) = upper.strip_prefix("RCPT TO:") {
            let addr = addr.trim_matches(['<', '>']);
            if options
                .reject_recipients
                .iter()
                .any(|r| r.eq_ignore_ascii_case(addr))
            {
                "550 No such user here\r\n".to_string()
            } else {
                "250 OK\r\n".to_string()
            }
        } else if upper == "DATA" {
            if write(reader, "354 End data with <CR><LF>.<CR><LF>\r\n").await.is_err() {
                return Outcome::Done;
            }
            let Some(data) = read_data(reader).await else {
                return Outcome::Done;
            };
            recorded.lock().unwrap().messages.push(data);
            "250 OK queued\r\n".to_string()
        } else if upper == "QUIT" {
            let _ = write(reader, "221 Bye\r\n").await;
            return Outcome::Done;
        } else {
            "500 Command not recognized\r\n".to_string()
        };

        if write(reader, &reply).await.is_err() {
            return Outcome::Done;
        }
    }
}

/// Run the two 334 challenges and return the final reply.
async fn auth_login<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    recorded: &Mutex<Recorded>,
    options: &SmtpOptions,
) -> String {
    for challenge in ["334 VXNlcm5hbWU6\r\n", "334 UGFzc3dvcmQ6\r\n"] {
        if write(reader, challenge).await.is_err() {
            return String::new();
        }
        let Some(answer) = read(reader).await else {
            return String::new();
        };
        recorded.lock().unwrap().commands.push(answer);
    }
    if options.reject_auth {
        "535 Authentication credentials invalid\r\n".to_string()
    } else {
        "235 Authentication successful\r\n".to_string()
    }
}

/// Read message lines up to the lone `.` line.
async fn read_data<S: AsyncRead + AsyncWrite + Unpin>(reader: &mut BufReader<S>) -> Option<String> {
    let mut data = String::new();
    loop {
        let line = read(reader).await?;
        if line == "." {
            return Some(data);
        }
        data.push_str(&line);
        data.push_str("\r\n");
    }
}

async fn read<S: AsyncRead + AsyncWrite + Unpin>(reader: &mut BufReader<S>) -> Option<String> {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

async fn write<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    text: &str,
) -> std::io::Result<()> {
    let inner = reader.get_mut();
    inner.write_all(text.as_bytes()).await?;
    inner.flush().await
}
