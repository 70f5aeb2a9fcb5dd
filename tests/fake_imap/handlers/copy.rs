//! COPY command handler.
//!
//! Copies messages from the selected folder to a destination folder.
//! The original messages remain in the source folder.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{Mailbox, TestEmail};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use super::expand_sequence;

/// Handle the COPY command. Clones emails into the destination
/// folder.
pub async fn handle_copy<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    dest_folder: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    #[allow(clippy::cast_possible_truncation)]
    let max = mailbox
        .lock()
        .unwrap()
        .get_folder(folder_name)
        .map_or(0, |f| f.emails.len() as u32);
    let numbers = expand_sequence(sequence_set, max);

    let copied = copy_messages(mailbox, folder_name, &numbers, dest_folder);
    let resp = if copied {
        format!("{tag} OK COPY completed\r\n")
    } else {
        format!("{tag} NO [TRYCREATE] Destination folder not found\r\n")
    };
    let _ = write_line(stream, &resp).await;
}

/// Append copies of messages `numbers` of `source` to `dest`. Returns
/// `false` without changes if either folder is missing.
pub fn copy_messages(mailbox: &Mutex<Mailbox>, source: &str, numbers: &[u32], dest: &str) -> bool {
    let mut mb = mailbox.lock().unwrap();
    let Some(folder) = mb.get_folder(source) else {
        return false;
    };

    let copies: Vec<TestEmail> = numbers
        .iter()
        .filter_map(|&seq| folder.emails.get(seq as usize - 1))
        .map(|email| {
            let mut copy = email.clone();
            copy.remove_flag("\\Deleted");
            copy
        })
        .collect();

    let Some(target) = mb.get_folder_mut(dest) else {
        return false;
    };
    target.emails.extend(copies);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::test_support::{make_raw_email, read_all, seq_set};
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run_copy(
        tag: &str,
        seq: &SequenceSet,
        dest: &str,
        mailbox: &Mutex<Mailbox>,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_copy(tag, seq, dest, mailbox, selected, &mut stream).await;
        drop(stream);
        read_all(client).await
    }

    #[tokio::test]
    #[allow(clippy::significant_drop_tightening)]
    async fn copies_email_to_destination() {
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(false, &make_raw_email("one"))
                .folder("Archive")
                .build(),
        );

        let output = run_copy("A1", &seq_set(1, 1), "Archive", &mb, Some("INBOX")).await;

        assert!(output.contains("A1 OK COPY completed"));

        let locked = mb.lock().unwrap();
        assert_eq!(locked.get_folder("Archive").unwrap().emails.len(), 1);
        assert_eq!(locked.get_folder("INBOX").unwrap().emails.len(), 1);
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").build());

        let output = run_copy("A1", &seq_set(1, 1), "Trash", &mb, None).await;

        assert!(output.contains("A1 BAD No folder selected"));
    }

    #[tokio::test]
    async fn missing_dest_returns_trycreate() {
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(false, &make_raw_email("one"))
                .build(),
        );

        let output = run_copy("A1", &seq_set(1, 1), "NoSuch", &mb, Some("INBOX")).await;

        assert!(output.contains("TRYCREATE"));
    }
}
