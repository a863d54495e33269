//! Owns the active channels and routes outbound traffic to them by name.

use futures::stream::select_all;

use crate::booking::Reply;
use crate::channels::{Channel, UpdateStream};
use crate::error::ChannelError;

#[derive(Default)]
pub struct ChannelManager {
    channels: Vec<Box<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: Box<dyn Channel>) {
        tracing::info!(channel = channel.name(), "Channel registered");
        self.channels.push(channel);
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    fn get(&self, name: &str) -> Result<&dyn Channel, ChannelError> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
            .ok_or_else(|| ChannelError::SendFailed {
                name: name.to_string(),
                reason: "channel not registered".into(),
            })
    }

    /// Start every channel and merge their updates into one stream.
    pub async fn start_all(&self) -> Result<UpdateStream, ChannelError> {
        let mut streams = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            streams.push(channel.start().await?);
            tracing::info!(channel = channel.name(), "Channel started");
        }
        Ok(Box::pin(select_all(streams)))
    }

    pub async fn deliver(
        &self,
        channel: &str,
        chat_id: &str,
        reply: &Reply,
    ) -> Result<(), ChannelError> {
        self.get(channel)?.deliver(chat_id, reply).await
    }

    pub async fn acknowledge(
        &self,
        channel: &str,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.get(channel)?.acknowledge(callback_id, text).await
    }

    /// Run every channel's health check; the first failure wins.
    pub async fn health_check_all(&self) -> Result<(), ChannelError> {
        for channel in &self.channels {
            channel.health_check().await?;
        }
        Ok(())
    }

    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = channel.name(), error = %e, "Channel shutdown failed");
            }
        }
        Ok(())
    }
}
