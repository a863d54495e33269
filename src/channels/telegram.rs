//! Telegram channel — long-polls the Bot API for messages and button presses.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::booking::{InboundEvent, Keyboard, Reply, Selection};
use crate::channels::{Channel, IncomingUpdate, UpdateStream};
use crate::error::ChannelError;
use crate::store::NewChatUser;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Pause before polling again after a failed getUpdates.
const POLL_RETRY: Duration = Duration::from_secs(5);

/// Toast for a button whose callback data no longer decodes.
const UNKNOWN_BUTTON: &str = "⌛ This button is no longer active.";

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    api_base: String,
    poll_retry: Duration,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: DEFAULT_API_BASE.to_string(),
            poll_retry: POLL_RETRY,
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_retry(mut self, poll_retry: Duration) -> Self {
        self.poll_retry = poll_retry;
        self
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.api_base, &self.bot_token, method)
    }

    /// Check if a username is in the allowed list.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        check_user_allowed(&self.allowed_users, [username])
    }

    /// Check if any of the provided identities is allowed.
    pub fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        check_user_allowed(&self.allowed_users, identities)
    }

    /// Send a reply. Long text is split; the keyboard goes on the last chunk.
    async fn send_message(&self, chat_id: &str, reply: &Reply) -> Result<(), ChannelError> {
        let chunks = split_message(&reply.text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let markup = reply_markup(&reply.keyboard);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { markup.as_ref() } else { None };
            self.send_message_chunk(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        markup: Option<&Value>,
    ) -> Result<(), ChannelError> {
        let mut markdown_body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(markup) = markup {
            markdown_body["reply_markup"] = markup.clone();
        }

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        // Retry without parse_mode
        let mut plain_body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup) = markup {
            plain_body["reply_markup"] = markup.clone();
        }
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(send_failed(format!(
                "sendMessage failed (markdown: {markdown_status}, plain: {plain_err})"
            )));
        }

        Ok(())
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<UpdateStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let url = self.api_url("getUpdates");
        let answer_url = self.api_url("answerCallbackQuery");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();
        let retry = self.poll_retry;

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for updates...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(retry).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(retry).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    let description = data
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("no result");
                    tracing::warn!("Telegram getUpdates failed: {description}");
                    tokio::time::sleep(retry).await;
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(parsed) = parse_update(update) else {
                        continue;
                    };

                    let sender = parsed.sender();
                    let user_id = sender.telegram_id.to_string();
                    let username = sender.username.as_deref().unwrap_or("unknown");
                    if !check_user_allowed(&allowed_users, [username, user_id.as_str()]) {
                        tracing::warn!(
                            "Telegram: ignoring update from unauthorized user: \
                             username={username}, user_id={user_id}"
                        );
                        continue;
                    }

                    match parsed {
                        ParsedUpdate::Update(incoming) => {
                            if tx.send(incoming).is_err() {
                                tracing::info!("Telegram listener channel closed");
                                return;
                            }
                        }
                        ParsedUpdate::UnknownCallback { callback_id, data, .. } => {
                            tracing::debug!(data = %data, "Dismissing undecodable callback");
                            let body = json!({
                                "callback_query_id": callback_id,
                                "text": UNKNOWN_BUTTON,
                            });
                            if let Err(e) = client.post(&answer_url).json(&body).send().await {
                                tracing::warn!("Telegram answerCallbackQuery error: {e}");
                            }
                        }
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn deliver(&self, chat_id: &str, reply: &Reply) -> Result<(), ChannelError> {
        self.send_message(chat_id, reply).await
    }

    async fn acknowledge(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = Value::String(text.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("answerCallbackQuery"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(send_failed(format!("answerCallbackQuery failed: {err}")));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// A Bot API update decoded into the assistant's terms.
#[derive(Debug)]
enum ParsedUpdate {
    Update(IncomingUpdate),
    /// A button press whose callback data is not a known action.
    UnknownCallback {
        callback_id: String,
        sender: NewChatUser,
        data: String,
    },
}

impl ParsedUpdate {
    fn sender(&self) -> &NewChatUser {
        match self {
            Self::Update(update) => &update.sender,
            Self::UnknownCallback { sender, .. } => sender,
        }
    }
}

fn api_url(base: &str, token: &str, method: &str) -> String {
    format!("{base}/bot{token}/{method}")
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason,
    }
}

/// Decode one entry of a getUpdates result.
///
/// Text messages become menu commands or free text; callback queries become
/// selections. Anything else is skipped.
fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    if let Some(query) = update.get("callback_query") {
        let callback_id = query.get("id").and_then(Value::as_str)?.to_string();
        let sender = parse_sender(query.get("from")?)?;
        let chat_id = query
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)
            .unwrap_or(sender.telegram_id);
        let data = query
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();

        return Some(match Selection::parse(data) {
            Some(selection) => ParsedUpdate::Update(
                IncomingUpdate::new(
                    "telegram",
                    chat_id.to_string(),
                    sender,
                    InboundEvent::Selection(selection),
                )
                .with_callback(callback_id),
            ),
            None => ParsedUpdate::UnknownCallback {
                callback_id,
                sender,
                data: data.to_string(),
            },
        });
    }

    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    let sender = parse_sender(message.get("from")?)?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?;

    Some(ParsedUpdate::Update(IncomingUpdate::new(
        "telegram",
        chat_id.to_string(),
        sender,
        InboundEvent::from_text(text),
    )))
}

fn parse_sender(from: &Value) -> Option<NewChatUser> {
    let text = |key: &str| from.get(key).and_then(Value::as_str).map(String::from);
    Some(NewChatUser {
        telegram_id: from.get("id").and_then(Value::as_i64)?,
        first_name: text("first_name").unwrap_or_default(),
        last_name: text("last_name"),
        username: text("username"),
    })
}

/// Bot API `reply_markup` for a keyboard.
fn reply_markup(keyboard: &Keyboard) -> Option<Value> {
    match keyboard {
        Keyboard::None => None,
        Keyboard::Inline(rows) => {
            let rows: Vec<Vec<Value>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| json!({ "text": b.label, "callback_data": b.action.to_string() }))
                        .collect()
                })
                .collect();
            Some(json!({ "inline_keyboard": rows }))
        }
        Keyboard::MainMenu => {
            let rows: Vec<Vec<Value>> = Keyboard::main_menu_rows()
                .into_iter()
                .map(|row| row.into_iter().map(|label| json!({ "text": label })).collect())
                .collect();
            Some(json!({ "keyboard": rows, "resize_keyboard": true }))
        }
    }
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
