//! TCP / TLS transport shared by the IMAP and SMTP clients
//!
//! A [`Connection`] owns one socket, plain or TLS, and exposes the
//! CRLF line primitives both protocols are built on. A plain
//! connection can be upgraded in place for STARTTLS: the handshake
//! runs over the already-open TCP stream.
//!
//! Certificate validation is disabled. Every server certificate is
//! accepted, including self-signed ones and ones issued for another
//! host name. Do not reuse this transport where that matters.

use crate::error::{Error, Result};
use rustls::pki_types::ServerName;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

/// Time allowed for the TCP connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for each read and for the TLS handshake.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One open socket to a mail server.
pub struct Connection {
    stream: BufReader<Stream>,
    host: String,
    read_timeout: Duration,
}

impl Connection {
    /// Connect and immediately negotiate TLS (IMAPS 993, SMTPS 465).
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the TCP connect fails or times out and
    /// `Error::Tls` if the handshake fails.
    pub async fn open_tls(host: &str, port: u16) -> Result<Self> {
        let tcp = connect_tcp(host, port).await?;
        let tls = handshake(host, tcp).await?;
        debug!("TLS established with {}:{}", host, port);
        Ok(Self::new(Stream::Tls(Box::new(tls)), host))
    }

    /// Connect without encryption (SMTP 587/25 before STARTTLS).
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the TCP connect fails or times out.
    pub async fn open_plain(host: &str, port: u16) -> Result<Self> {
        let tcp = connect_tcp(host, port).await?;
        debug!("Plain connection established with {}:{}", host, port);
        Ok(Self::new(Stream::Plain(tcp), host))
    }

    fn new(stream: Stream, host: &str) -> Self {
        Self {
            stream: BufReader::new(stream),
            host: host.to_string(),
            read_timeout: READ_TIMEOUT,
        }
    }

    /// Wrap the existing plain socket in a client-mode TLS session.
    ///
    /// The server must not have sent anything past the line that
    /// accepted STARTTLS; buffered plaintext would otherwise be lost.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if the connection is already encrypted,
    /// plaintext is still buffered, or the handshake fails.
    pub async fn upgrade_to_tls(self) -> Result<Self> {
        if !self.stream.buffer().is_empty() {
            return Err(Error::Tls(
                "server sent data before the TLS handshake".into(),
            ));
        }
        let host = self.host;
        let read_timeout = self.read_timeout;
        let tcp = match self.stream.into_inner() {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(_) => return Err(Error::Tls("connection is already encrypted".into())),
        };
        let tls = handshake(&host, tcp).await?;
        debug!("STARTTLS upgrade with {} complete", host);
        Ok(Self {
            stream: BufReader::new(Stream::Tls(Box::new(tls))),
            host,
            read_timeout,
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self.stream.get_ref(), Stream::Tls(_))
    }

    /// Override the per-read timeout.
    pub const fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Read one line, without its CRLF. `None` means EOF.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on socket failure or read timeout.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = tokio::time::timeout(self.read_timeout, self.stream.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| timed_out("read"))??;
        if n == 0 {
            return Ok(None);
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Read exactly `len` raw bytes (an IMAP literal).
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionClosed` on EOF and `Error::Io` on
    /// socket failure or read timeout.
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(self.read_timeout, self.stream.read_exact(&mut buf))
            .await
            .map_err(|_| timed_out("literal read"))?
            .map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    Error::ConnectionClosed
                } else {
                    Error::Io(e)
                }
            })?;
        Ok(buf)
    }

    /// Write `line` followed by CRLF and flush.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write or flush fails.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let inner = self.stream.get_mut();
        inner.write_all(line.as_bytes()).await?;
        inner.write_all(b"\r\n").await?;
        inner.flush().await?;
        Ok(())
    }

    /// Write pre-formatted bytes (already CRLF-terminated) and flush.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write or flush fails.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let inner = self.stream.get_mut();
        inner.write_all(data).await?;
        inner.flush().await?;
        Ok(())
    }

    /// Close the socket. Errors are ignored; the peer may already be
    /// gone.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.get_mut().shutdown().await;
    }
}

fn timed_out(what: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{what} timed out"),
    ))
}

async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    debug!("Connecting to {}", addr);
    let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| timed_out("connect"))??;
    Ok(tcp)
}

async fn handshake(host: &str, tcp: TcpStream) -> Result<TlsStream<TcpStream>> {
    let connector = tls_connector()?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    tokio::time::timeout(READ_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::Tls("handshake timed out".into()))?
        .map_err(|e| Error::Tls(e.to_string()))
}

/// Build a TLS connector that accepts all certificates.
fn tls_connector() -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Certificate verifier that accepts every certificate.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
