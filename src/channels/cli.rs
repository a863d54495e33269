//! CLI channel — stdin/stdout REPL for local testing.
//!
//! Typed lines are chat messages. Lines starting with `!` press a button:
//! `!service_1`, `!staff_any`, `!confirm`.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::booking::{InboundEvent, Keyboard, Reply, Selection};
use crate::channels::{Channel, IncomingUpdate, UpdateStream};
use crate::error::ChannelError;
use crate::store::NewChatUser;

const CHAT_ID: &str = "local";

/// A simple CLI channel that reads from stdin and writes to stdout.
#[derive(Default)]
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

fn local_user() -> NewChatUser {
    NewChatUser {
        telegram_id: 0,
        first_name: "Local".into(),
        last_name: None,
        username: Some("local-user".into()),
    }
}

/// Turn one input line into an update. `None` for blank or unknown input.
fn parse_line(line: &str, seq: u64) -> Option<IncomingUpdate> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match line.strip_prefix('!') {
        Some(action) => {
            let selection = Selection::parse(action)?;
            Some(
                IncomingUpdate::new(
                    "cli",
                    CHAT_ID,
                    local_user(),
                    InboundEvent::Selection(selection),
                )
                .with_callback(format!("cli-{seq}")),
            )
        }
        None => Some(IncomingUpdate::new(
            "cli",
            CHAT_ID,
            local_user(),
            InboundEvent::from_text(line),
        )),
    }
}

/// Plain-text rendering of a reply and its buttons.
fn render(reply: &Reply) -> String {
    let mut out = reply.text.clone();
    match &reply.keyboard {
        Keyboard::None => {}
        Keyboard::Inline(rows) => {
            for row in rows {
                let line: Vec<String> = row
                    .iter()
                    .map(|b| format!("[{}] !{}", b.label, b.action))
                    .collect();
                out.push('\n');
                out.push_str(&line.join("   "));
            }
        }
        Keyboard::MainMenu => {
            for row in Keyboard::main_menu_rows() {
                out.push('\n');
                out.push_str(&row.join(" | "));
            }
        }
    }
    out
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<UpdateStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();
            let mut seq: u64 = 0;

            // Print prompt
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        seq += 1;
                        let Some(update) = parse_line(&line, seq) else {
                            if line.trim().starts_with('!') {
                                eprintln!("Unknown action: {}", line.trim());
                            }
                            eprint!("> ");
                            continue;
                        };
                        if tx.send(update).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn deliver(&self, _chat_id: &str, reply: &Reply) -> Result<(), ChannelError> {
        println!("\n{}\n", render(reply));
        eprint!("> ");
        Ok(())
    }

    async fn acknowledge(
        &self,
        _callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        if let Some(text) = text {
            eprintln!("ℹ️  {}", text);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
