//! The external messaging channel.
//!
//! The dispatcher depends only on the [`MessageChannel`] contract; the
//! Telegram implementation lives behind it so tests can substitute their
//! own channel.
use async_trait::async_trait;
use teloxide::RequestError;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use thiserror::Error;

use crate::dispatcher::FailureKind;

/// A failure reported by the messaging channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("malformed address: {0}")]
    BadAddress(String),
    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),
    #[error("network error: {0}")]
    Network(String),
    #[error("channel rejected message: {0}")]
    Rejected(String),
}

/// Minimal send-message contract of the external channel.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// Default transient/permanent classification.
///
/// Rate limits and network errors are expected to resolve with retry;
/// a malformed address or an API rejection is not.
pub fn default_classify(err: &ChannelError) -> FailureKind {
    match err {
        ChannelError::RateLimited(_) | ChannelError::Network(_) => FailureKind::Transient,
        ChannelError::BadAddress(_) | ChannelError::Rejected(_) => FailureKind::Permanent,
    }
}

/// Telegram Bot API channel.
pub struct TelegramChannel {
    bot: teloxide::Bot,
}

impl TelegramChannel {
    pub fn new(token: &str) -> Self {
        Self {
            bot: teloxide::Bot::new(token),
        }
    }
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let id: i64 = chat_id
            .trim()
            .parse()
            .map_err(|_| ChannelError::BadAddress(chat_id.to_string()))?;

        self.bot.send_message(ChatId(id), text).await?;
        Ok(())
    }
}

impl From<RequestError> for ChannelError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::RetryAfter(secs) => ChannelError::RateLimited(secs.seconds() as u64),
            RequestError::Network(err) => ChannelError::Network(err.to_string()),
            RequestError::Io(err) => ChannelError::Network(err.to_string()),
            other => ChannelError::Rejected(other.to_string()),
        }
    }
}
