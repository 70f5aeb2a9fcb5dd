#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for reading and sending mail over IMAP and SMTP

use clap::{Parser, Subcommand};
use mailwire::{Email, Folder, ImapConfig, MailClient, SmtpConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-cli")]
#[command(about = "Read and send mail over IMAP and SMTP")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List available IMAP folders
    Folders {
        /// Include message and unread counts
        #[arg(long)]
        counts: bool,
    },

    /// List the most recent emails of a folder
    List {
        /// Folder to list from
        #[arg(long, default_value = "INBOX")]
        folder: String,

        /// Maximum number of emails to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show a single email by message number
    Show {
        /// Message sequence number
        number: u32,

        /// Folder containing the email
        #[arg(long, default_value = "INBOX")]
        folder: String,
    },

    /// Send a plain-text email
    Send {
        /// Recipient address (repeatable)
        #[arg(long, required = true)]
        to: Vec<String>,

        /// Carbon-copy address (repeatable)
        #[arg(long)]
        cc: Vec<String>,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        body: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ImapConfig::from_env()?;

    match &args.command {
        Command::Folders { counts } => {
            cmd_folders(&MailClient::new(config), &args, *counts).await?;
        }
        Command::List { folder, limit } => {
            cmd_list(&MailClient::new(config), &args, folder, *limit).await?;
        }
        Command::Show { number, folder } => {
            cmd_show(&MailClient::new(config), &args, folder, *number).await?;
        }
        Command::Send {
            to,
            cc,
            subject,
            body,
        } => {
            let smtp = SmtpConfig::from_env()?;
            let from = smtp.username.clone();
            let client = MailClient::new(config).with_smtp(smtp);
            cmd_send(&client, &from, to, cc, subject, body).await?;
        }
    }

    Ok(())
}

async fn cmd_folders(client: &MailClient, args: &Args, counts: bool) -> anyhow::Result<()> {
    let folders = if counts {
        client.list_folders_with_counts().await?
    } else {
        client.list_folders().await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&folders)?);
    } else {
        print_folders(&folders, counts);
    }

    Ok(())
}

async fn cmd_list(
    client: &MailClient,
    args: &Args,
    folder: &str,
    limit: u32,
) -> anyhow::Result<()> {
    let emails = client.fetch_recent(folder, limit).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&emails)?);
    } else {
        print_email_table(&emails);
    }

    Ok(())
}

async fn cmd_show(
    client: &MailClient,
    args: &Args,
    folder: &str,
    number: u32,
) -> anyhow::Result<()> {
    let email = client.fetch_email(folder, number).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&email)?);
    } else {
        print_email_detail(&email);
    }

    Ok(())
}

async fn cmd_send(
    client: &MailClient,
    from: &str,
    to: &[String],
    cc: &[String],
    subject: &str,
    body: &str,
) -> anyhow::Result<()> {
    let mut email = Email::new(0);
    email.from = from.to_string();
    email.to = to.to_vec();
    email.cc = cc.to_vec();
    email.subject = subject.to_string();
    email.body = body.to_string();
    email.date = chrono::Utc::now();

    client.send(&email).await?;
    println!("Sent to {} recipient(s).", to.len() + cc.len());
    Ok(())
}

fn print_folders(folders: &[Folder], counts: bool) {
    for folder in folders {
        if counts && folder.selectable {
            println!(
                "{:<40} {:>6} {:>6}",
                folder.full_path, folder.message_count, folder.unread_count
            );
        } else {
            println!("{}", folder.full_path);
        }
    }
}

fn print_email_table(emails: &[Email]) {
    if emails.is_empty() {
        println!("No emails found.");
        return;
    }

    let header = format!("{:<6} {:<20} {:<30} {}", "#", "Date", "From", "Subject");
    println!("{header}");
    println!("{}", "-".repeat(100));

    for email in emails {
        let marker = if email.is_seen() { ' ' } else { '*' };
        println!(
            "{:<5}{} {:<20} {:<30} {}",
            email.message_number,
            marker,
            email.date.format("%Y-%m-%d %H:%M"),
            truncate(&email.from, 28),
            truncate(&email.subject, 40),
        );
    }

    println!("\n{} email(s)", emails.len());
}

fn print_email_detail(email: &Email) {
    println!("Number:  {}", email.message_number);
    println!("Date:    {}", email.date.format("%Y-%m-%d %H:%M:%S"));
    println!("From:    {}", email.from);
    println!("To:      {}", email.to.join(", "));

    if !email.cc.is_empty() {
        println!("CC:      {}", email.cc.join(", "));
    }

    println!("Subject: {}", email.subject);
    println!("Msg-ID:  {}", email.message_id);

    if !email.flags().is_empty() {
        let flags: Vec<&str> = email.flags().iter().map(mailwire::Flag::name).collect();
        println!("Flags:   {}", flags.join(" "));
    }

    println!("\n--- Body ---\n");
    println!("{}", email.best_text());

    if !email.attachments.is_empty() {
        println!("\n--- Attachments ---");
        for attachment in &email.attachments {
            println!(
                "  {} ({}, {} bytes)",
                attachment.filename,
                attachment.content_type,
                attachment.data.len()
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
