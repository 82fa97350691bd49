//! Message delivery with bounded retry.
//!
//! One dispatcher is shared by every per-habit task of a tick. A semaphore
//! bounds how many channel calls are in flight at once; a permit is held
//! only for the duration of a single attempt, so a habit sleeping through
//! its retry backoff never delays another habit's delivery.
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::channel::{ChannelError, MessageChannel};

/// Transient/permanent verdict for a channel failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Maps a channel error to a [`FailureKind`].
pub type Classifier = fn(&ChannelError) -> FailureKind;

/// Retry limits for transient failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Fixed wait between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

/// A delivery that did not go through.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transient failures exhausted the retry budget; carries the last error.
    #[error("transient delivery failure: {0}")]
    Transient(ChannelError),
    #[error("permanent delivery failure: {0}")]
    Permanent(ChannelError),
}

impl DeliveryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient(_) => FailureKind::Transient,
            Self::Permanent(_) => FailureKind::Permanent,
        }
    }
}

/// Compose the reminder text for a habit.
pub fn compose_message(action: &str, place: &str) -> String {
    format!("Reminder: {action} at {place}.")
}

pub struct Dispatcher {
    channel: Arc<dyn MessageChannel>,
    permits: Arc<tokio::sync::Semaphore>,
    policy: RetryPolicy,
    classify: Classifier,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        pool_size: usize,
        policy: RetryPolicy,
        classify: Classifier,
    ) -> Self {
        Self {
            channel,
            permits: Arc::new(tokio::sync::Semaphore::new(pool_size.max(1))),
            policy,
            classify,
        }
    }

    /// Deliver `text` to `address`, retrying transient failures up to the
    /// policy's budget with a fixed backoff between attempts.
    pub async fn send(&self, address: &str, text: &str) -> Result<(), DeliveryError> {
        let mut attempt: u32 = 0;
        loop {
            let result = {
                // The semaphore is owned by the dispatcher and never closed.
                let _permit = self.permits.acquire().await.map_err(|_| {
                    DeliveryError::Permanent(ChannelError::Rejected(
                        "dispatcher pool closed".to_string(),
                    ))
                })?;
                self.channel.send_message(address, text).await
            };

            let err = match result {
                Ok(()) => {
                    tracing::trace!(address, "reminder delivered");
                    return Ok(());
                }
                Err(err) => err,
            };

            match (self.classify)(&err) {
                FailureKind::Permanent => {
                    tracing::error!(address, error = %err, "permanent delivery failure");
                    return Err(DeliveryError::Permanent(err));
                }
                FailureKind::Transient if attempt >= self.policy.max_retries => {
                    tracing::error!(
                        address,
                        error = %err,
                        attempts = attempt + 1,
                        "retry budget exhausted"
                    );
                    return Err(DeliveryError::Transient(err));
                }
                FailureKind::Transient => {
                    attempt += 1;
                    tracing::warn!(
                        address,
                        error = %err,
                        attempt,
                        backoff_secs = self.policy.backoff.as_secs(),
                        "transient delivery failure, will retry"
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                }
            }
        }
    }
}
