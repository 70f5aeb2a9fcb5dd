//! MOVE command handler (RFC 6851).
//!
//! Only reachable when the server advertises `MOVE`. The command is
//! dispatched on the raw line:
//!
//! ```text
//! A005 MOVE 2:3 "Archive"
//! * 2 EXPUNGE
//! * 2 EXPUNGE
//! A005 OK MOVE completed
//! ```

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use super::copy::copy_messages;
use super::expunge::{remove_deleted, write_expunged};
use super::unquote;

/// Handle `MOVE <set> <folder>`: copy, then expunge the originals.
pub async fn handle_move<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };
    let Some((set, dest)) = args.trim().split_once(' ') else {
        let resp = format!("{tag} BAD Missing arguments\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };
    let dest = unquote(dest);

    #[allow(clippy::cast_possible_truncation)]
    let max = mailbox
        .lock()
        .unwrap()
        .get_folder(folder_name)
        .map_or(0, |f| f.emails.len() as u32);
    let numbers = parse_sequence(set, max);

    if !copy_messages(mailbox, folder_name, &numbers, &dest) {
        let resp = format!("{tag} NO [TRYCREATE] Destination folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    let expunged = {
        let mut mb = mailbox.lock().unwrap();
        let folder = mb.get_folder_mut(folder_name).unwrap();
        for &seq in &numbers {
            if let Some(email) = folder.emails.get_mut(seq as usize - 1) {
                email.add_flag("\\Deleted");
            }
        }
        let expunged = remove_deleted(folder);
        drop(mb);
        expunged
    };

    if write_expunged(stream, &expunged).await.is_err() {
        return;
    }
    let resp = format!("{tag} OK MOVE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

/// Parse a textual sequence set such as `1:3,7` or `4:*`.
fn parse_sequence(set: &str, max: u32) -> Vec<u32> {
    let value = |s: &str| {
        if s == "*" {
            Some(max)
        } else {
            s.parse::<u32>().ok().filter(|&n| n > 0)
        }
    };

    let mut numbers = Vec::new();
    for part in set.split(',') {
        match part.split_once(':') {
            Some((a, b)) => {
                if let (Some(a), Some(b)) = (value(a), value(b)) {
                    numbers.extend(a.min(b)..=a.max(b));
                }
            }
            None => numbers.extend(value(part)),
        }
    }
    numbers.sort_unstable();
    numbers.dedup();
    numbers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::test_support::{make_raw_email, read_all};
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run_move(tag: &str, args: &str, mailbox: &Mutex<Mailbox>) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_move(tag, args, mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);
        read_all(client).await
    }

    #[test]
    fn parses_text_sequences() {
        assert_eq!(parse_sequence("1:3,7", 9), vec![1, 2, 3, 7]);
        assert_eq!(parse_sequence("4:*", 5), vec![4, 5]);
        assert_eq!(parse_sequence("0,x", 5), Vec::<u32>::new());
    }

    #[tokio::test]
    #[allow(clippy::significant_drop_tightening)]
    async fn moves_and_reports_expunge() {
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(false, &make_raw_email("one"))
                .email(false, &make_raw_email("two"))
                .folder("Archive")
                .build(),
        );

        let output = run_move("A5", "2 \"Archive\"", &mb).await;

        assert_eq!(output, "* 2 EXPUNGE\r\nA5 OK MOVE completed\r\n");
        let locked = mb.lock().unwrap();
        assert_eq!(locked.get_folder("INBOX").unwrap().emails.len(), 1);
        assert_eq!(locked.get_folder("Archive").unwrap().emails.len(), 1);
    }

    #[tokio::test]
    async fn missing_dest_returns_trycreate() {
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(false, &make_raw_email("one"))
                .build(),
        );

        let output = run_move("A5", "1 \"Nowhere\"", &mb).await;

        assert!(output.contains("TRYCREATE"));
        assert_eq!(mb.lock().unwrap().get_folder("INBOX").unwrap().emails.len(), 1);
    }
}
