//! `parley`: line-oriented terminal chat client.
//!
//! Each stdin line is sent as a message. Lines starting with `/` are
//! commands:
//!
//! - `/delete <id>`     hide one message locally
//! - `/purge <sender>`  hide everything from a sender locally
//! - `/seen <id>`       mark a message as seen
//! - `/retry`           resend the last message that failed
//! - `/connect`         reconnect after retries ran out
//! - `/quit`            exit

use std::collections::HashSet;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_client::{ClientConfig, SyncHandle, SyncSnapshot};
use parley_shared::{Message, MessageStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,parley_client=info,parley_net=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let handle = parley_client::start(&config)
        .await
        .context("failed to start client")?;

    println!(
        "parley: {} ({}) on #{} via {}",
        handle.identity().username,
        handle.identity().sender_id,
        config.channel,
        config.relay_url
    );

    let printer = tokio::spawn(print_updates(handle.clone()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut unsent: Option<Message> = None;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !run_line(&handle, line, &mut unsent).await {
            break;
        }
    }

    handle.shutdown().await.ok();
    printer.abort();
    Ok(())
}

/// Handle one input line. Returns `false` to exit.
async fn run_line(handle: &SyncHandle, line: &str, unsent: &mut Option<Message>) -> bool {
    let (command, arg) = match line.split_once(' ') {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };

    let result = match command {
        "/quit" => return false,
        "/connect" => handle.connect().await,
        "/retry" => match unsent.take() {
            Some(message) => handle.retry(message).await.map(|_| ()),
            None => {
                println!("! nothing to retry");
                Ok(())
            }
        },
        "/delete" if !arg.is_empty() => handle.delete(arg).await.map(|deleted| {
            if !deleted {
                println!("! no message {arg}");
            }
        }),
        "/purge" if !arg.is_empty() => handle
            .purge_sender(arg)
            .await
            .map(|n| println!("* purged {n} message(s) from {arg}")),
        "/seen" if !arg.is_empty() => handle.mark_status(arg, MessageStatus::Seen).await.map(|_| ()),
        c if c.starts_with('/') => {
            println!(
                "! usage: /delete <id> | /purge <sender> | /seen <id> | /retry | /connect | /quit"
            );
            Ok(())
        }
        _ => handle.send_text(line).await.map(|_| ()),
    };

    if let Err(e) = result {
        warn!(error = %e, "command failed");
        match e.unsent_message() {
            Some(message) => {
                println!("! not sent ({}), type /retry to resend", message.id);
                *unsent = Some(message.clone());
            }
            None => println!("! {e}"),
        }
    }
    true
}

/// Print new messages and connection changes as snapshots arrive.
async fn print_updates(handle: SyncHandle) {
    let mut watch = handle.watch();
    let mut printed: HashSet<String> = HashSet::new();
    let mut last: Option<SyncSnapshot> = None;

    loop {
        let snapshot = watch.borrow_and_update().clone();

        for message in &snapshot.messages {
            if printed.insert(message.id.clone()) {
                print_message(message);
            }
        }

        let changed = last.as_ref().map_or(true, |prev| {
            prev.connection != snapshot.connection
                || prev.online_count != snapshot.online_count
                || prev.disconnected != snapshot.disconnected
        });
        if changed {
            if snapshot.disconnected {
                println!("* disconnected: relay unreachable, type /connect to retry");
            } else {
                println!(
                    "* {} (retry {}/{}) | {} online",
                    snapshot.connection.state,
                    snapshot.connection.retry_count,
                    snapshot.connection.max_retries,
                    snapshot.online_count
                );
            }
        }
        last = Some(snapshot);

        if watch.changed().await.is_err() {
            break;
        }
    }
}

fn print_message(message: &Message) {
    let name = if message.sender_name.is_empty() {
        message.sender_id.as_str()
    } else {
        message.sender_name.as_str()
    };
    println!(
        "[{}] {}: {}  ({})",
        message.created_at.format("%H:%M:%S"),
        name,
        message.text,
        message.id
    );
}
