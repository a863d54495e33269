//! Transport-neutral channel trait and the update type it produces.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::booking::{ConversationKey, InboundEvent, Reply};
use crate::error::ChannelError;
use crate::store::NewChatUser;

/// One decoded user action arriving from a transport.
#[derive(Debug, Clone)]
pub struct IncomingUpdate {
    /// Name of the channel that produced the update.
    pub channel: String,
    pub chat_id: String,
    /// Profile of the sender as reported by the transport.
    pub sender: NewChatUser,
    pub event: InboundEvent,
    /// Set when the update came from a button press that must be acknowledged.
    pub callback_id: Option<String>,
}

impl IncomingUpdate {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        sender: NewChatUser,
        event: InboundEvent,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            sender,
            event,
            callback_id: None,
        }
    }

    pub fn with_callback(mut self, callback_id: impl Into<String>) -> Self {
        self.callback_id = Some(callback_id.into());
        self
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.channel.clone(), self.chat_id.clone())
    }
}

pub type UpdateStream = Pin<Box<dyn Stream<Item = IncomingUpdate> + Send>>;

/// A chat transport.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving updates.
    async fn start(&self) -> Result<UpdateStream, ChannelError>;

    /// Send one reply to a chat.
    async fn deliver(&self, chat_id: &str, reply: &Reply) -> Result<(), ChannelError>;

    /// Acknowledge a button press, optionally with a short toast.
    async fn acknowledge(&self, callback_id: &str, text: Option<&str>)
    -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError>;
}
