//! LOGOUT command handler.
//!
//! The server sends a BYE untagged response (indicating the connection
//! is ending) followed by the tagged OK, then closes the connection.

use crate::fake_imap::io::write_line;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the LOGOUT command. Sends BYE + tagged OK.
pub async fn handle_logout<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) {
    let _ = write_line(stream, "* BYE Logging out\r\n").await;
    let resp = format!("{tag} OK LOGOUT completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::test_support::read_all;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn sends_bye_then_ok() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);

        handle_logout("A005", &mut stream).await;
        drop(stream);

        assert_eq!(
            read_all(client).await,
            "* BYE Logging out\r\nA005 OK LOGOUT completed\r\n"
        );
    }
}
