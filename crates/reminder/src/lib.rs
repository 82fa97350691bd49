//! Reminder scheduling and delivery.
//!
//! A minute-cadence scheduler scans the store for habits due at the current
//! wall-clock time-of-day and hands each to a dispatcher, which delivers one
//! Telegram message per habit with bounded retry on transient failure. One
//! habit's failure never blocks the rest of the batch.

pub use channel::{ChannelError, MessageChannel, TelegramChannel, default_classify};
pub use dispatcher::{Classifier, DeliveryError, Dispatcher, FailureKind, RetryPolicy, compose_message};
pub use scheduler::{BatchResult, BuildError, Outcome, Scheduler, SchedulerBuilder, SkipReason};
pub use store::{DueHabit, ReminderStore, StoreError};

mod channel;
mod dispatcher;
mod scheduler;
mod store;
