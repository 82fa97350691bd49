//! The reminder scheduler.
//!
//! At each tick the scheduler scans the store for habits due at the current
//! minute, resolves each owner's channel address and fans the deliveries out
//! on a task set. Per-habit outcomes aggregate into a [`BatchResult`]; the
//! batch never aborts early. Re-invoking a tick with the same time and
//! unchanged data reattempts delivery to the same set: the contract is
//! at-least-once within a minute, not exactly-once.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::channel::{ChannelError, MessageChannel, default_classify};
use crate::dispatcher::{Classifier, DeliveryError, Dispatcher, RetryPolicy, compose_message};
use crate::store::ReminderStore;

/// Result of one habit's delivery within a tick.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Skipped(SkipReason),
    Failed(DeliveryError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The owner has no channel address configured. Not an error.
    NoChannel,
    /// The profile lookup failed; logged, delivery not attempted.
    ProfileUnavailable,
}

/// Aggregated per-habit outcomes of one tick.
#[derive(Debug, Default)]
pub struct BatchResult {
    outcomes: Vec<(Uuid, Outcome)>,
}

impl BatchResult {
    fn record(&mut self, habit_id: Uuid, outcome: Outcome) {
        self.outcomes.push((habit_id, outcome));
    }

    pub fn outcomes(&self) -> &[(Uuid, Outcome)] {
        &self.outcomes
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn sent(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Sent))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Failed(_)))
    }

    fn count(&self, matcher: fn(&Outcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matcher(outcome))
            .count()
    }
}

pub struct Scheduler<S> {
    store: S,
    dispatcher: Arc<Dispatcher>,
    timezone: Tz,
    cadence: Duration,
}

impl<S> std::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("timezone", &self.timezone)
            .field("cadence", &self.cadence)
            .finish_non_exhaustive()
    }
}

impl<S: ReminderStore> Scheduler<S> {
    /// Return a builder for `Scheduler`. Help to build the struct.
    pub fn builder() -> SchedulerBuilder<S> {
        SchedulerBuilder::default()
    }

    /// Process every habit due at `now` (seconds are dropped).
    ///
    /// A store query failure is treated as "no habits this tick": it is
    /// logged and yields an empty batch. One habit's failure never prevents
    /// processing of the rest.
    pub async fn tick(&self, now: NaiveTime) -> BatchResult {
        let now = truncate_to_minute(now);
        let mut batch = BatchResult::default();

        let habits = match self.store.habits_due_at(now).await {
            Ok(habits) => habits,
            Err(err) => {
                tracing::warn!(error = %err, "due-habit query failed, skipping tick");
                return batch;
            }
        };

        if habits.is_empty() {
            return batch;
        }
        tracing::debug!(due = habits.len(), time = %now.format("%H:%M"), "dispatching due habits");

        let mut tasks: JoinSet<(Uuid, Outcome)> = JoinSet::new();
        let mut task_habits: HashMap<tokio::task::Id, Uuid> = HashMap::new();

        for habit in habits {
            let chat_id = match self.store.chat_id(&habit.user_id).await {
                Ok(Some(chat_id)) if !chat_id.trim().is_empty() => chat_id,
                Ok(_) => {
                    tracing::debug!(
                        habit_id = %habit.id,
                        user_id = %habit.user_id,
                        "no channel address configured, skipping"
                    );
                    batch.record(habit.id, Outcome::Skipped(SkipReason::NoChannel));
                    continue;
                }
                Err(err) => {
                    tracing::warn!(
                        habit_id = %habit.id,
                        user_id = %habit.user_id,
                        error = %err,
                        "profile lookup failed, skipping"
                    );
                    batch.record(habit.id, Outcome::Skipped(SkipReason::ProfileUnavailable));
                    continue;
                }
            };

            let dispatcher = Arc::clone(&self.dispatcher);
            let habit_id = habit.id;
            let handle = tasks.spawn(async move {
                let text = compose_message(&habit.action, &habit.place);
                let outcome = match dispatcher.send(&chat_id, &text).await {
                    Ok(()) => Outcome::Sent,
                    Err(err) => Outcome::Failed(err),
                };
                (habit_id, outcome)
            });
            task_habits.insert(handle.id(), habit_id);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (habit_id, outcome))) => batch.record(habit_id, outcome),
                Err(err) => {
                    tracing::error!(error = %err, "dispatch task failed");
                    if let Some(habit_id) = task_habits.get(&err.id()) {
                        let outcome = Outcome::Failed(DeliveryError::Permanent(
                            ChannelError::Rejected(err.to_string()),
                        ));
                        batch.record(*habit_id, outcome);
                    }
                }
            }
        }

        batch
    }

    /// Run the tick loop at the configured cadence until `shutdown` flips.
    ///
    /// Each batch runs on its own task: a batch still backing off on
    /// retries must not delay the next minute's scan, so batches may
    /// overlap. Missed ticks are skipped, not caught up: habits due while
    /// the process was down are not notified. On shutdown, outstanding
    /// batches are aborted and their pending retries dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            timezone = %self.timezone,
            cadence_secs = self.cadence.as_secs(),
            "Starting reminder scheduler..."
        );

        let scheduler = Arc::new(self);
        let mut ticker = tokio::time::interval(scheduler.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut batches: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&scheduler);
                    batches.spawn(async move {
                        let now = Utc::now().with_timezone(&scheduler.timezone).time();
                        let batch = scheduler.tick(now).await;
                        if !batch.is_empty() {
                            tracing::info!(
                                sent = batch.sent(),
                                skipped = batch.skipped(),
                                failed = batch.failed(),
                                "reminder batch complete"
                            );
                        }
                    });
                }
                Some(_) = batches.join_next(), if !batches.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("reminder scheduler shutting down");
                        break;
                    }
                }
            }
        }

        batches.shutdown().await;
    }
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// A scheduler that cannot be constructed as configured.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing habit store")]
    MissingStore,
    #[error("missing message channel")]
    MissingChannel,
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// The builder for `Scheduler`
pub struct SchedulerBuilder<S> {
    store: Option<S>,
    channel: Option<Arc<dyn MessageChannel>>,
    timezone: String,
    cadence: Duration,
    pool_size: usize,
    policy: RetryPolicy,
    classify: Classifier,
}

impl<S> Default for SchedulerBuilder<S> {
    fn default() -> Self {
        Self {
            store: None,
            channel: None,
            timezone: "UTC".to_string(),
            cadence: Duration::from_secs(60),
            pool_size: 8,
            policy: RetryPolicy::default(),
            classify: default_classify,
        }
    }
}

impl<S: ReminderStore> SchedulerBuilder<S> {
    /// Pass the required habit store.
    pub fn store(mut self, store: S) -> SchedulerBuilder<S> {
        self.store = Some(store);
        self
    }

    /// Pass the required message channel.
    pub fn channel(mut self, channel: Arc<dyn MessageChannel>) -> SchedulerBuilder<S> {
        self.channel = Some(channel);
        self
    }

    /// Time zone the wall clock is matched against (IANA name).
    pub fn timezone(mut self, timezone: &str) -> SchedulerBuilder<S> {
        self.timezone = timezone.to_string();
        self
    }

    pub fn cadence(mut self, cadence: Duration) -> SchedulerBuilder<S> {
        self.cadence = cadence;
        self
    }

    /// Max concurrent channel calls.
    pub fn pool_size(mut self, pool_size: usize) -> SchedulerBuilder<S> {
        self.pool_size = pool_size;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> SchedulerBuilder<S> {
        self.policy = policy;
        self
    }

    pub fn classify(mut self, classify: Classifier) -> SchedulerBuilder<S> {
        self.classify = classify;
        self
    }

    /// Construct `Scheduler`
    pub fn build(self) -> Result<Scheduler<S>, BuildError> {
        tracing::info!("Initializing reminder scheduler...");
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let channel = self.channel.ok_or(BuildError::MissingChannel)?;
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|_| BuildError::InvalidTimezone(self.timezone))?;

        let dispatcher = Arc::new(Dispatcher::new(
            channel,
            self.pool_size,
            self.policy,
            self.classify,
        ));

        Ok(Scheduler {
            store,
            dispatcher,
            timezone,
            cadence: self.cadence,
        })
    }
}
