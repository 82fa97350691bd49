//! Read-only store contract consumed by the scheduler.
//!
//! The engine implements it directly; scheduler tests substitute an
//! in-memory store.
use async_trait::async_trait;
use chrono::NaiveTime;
use thiserror::Error;
use uuid::Uuid;

/// A store lookup failure. The scheduler treats it as "no habits this
/// tick": it logs and waits for the next tick instead of crashing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl From<engine::EngineError> for StoreError {
    fn from(err: engine::EngineError) -> Self {
        Self(err.to_string())
    }
}

/// The habit fields the scheduler needs for one delivery.
#[derive(Clone, Debug)]
pub struct DueHabit {
    pub id: Uuid,
    pub user_id: String,
    pub action: String,
    pub place: String,
}

impl From<engine::Habit> for DueHabit {
    fn from(habit: engine::Habit) -> Self {
        Self {
            id: habit.id,
            user_id: habit.user_id,
            action: habit.action,
            place: habit.place,
        }
    }
}

#[async_trait]
pub trait ReminderStore: Send + Sync + 'static {
    /// Every habit, across all users, scheduled at `time` (minute match).
    async fn habits_due_at(&self, time: NaiveTime) -> Result<Vec<DueHabit>, StoreError>;

    /// The configured channel address of `user_id`, if any.
    async fn chat_id(&self, user_id: &str) -> Result<Option<String>, StoreError>;
}

#[async_trait]
impl ReminderStore for engine::Engine {
    async fn habits_due_at(&self, time: NaiveTime) -> Result<Vec<DueHabit>, StoreError> {
        let habits = engine::Engine::habits_due_at(self, time).await?;
        Ok(habits.into_iter().map(DueHabit::from).collect())
    }

    async fn chat_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let profile = self.profile(user_id).await?;
        Ok(profile.and_then(|profile| profile.chat_id))
    }
}
