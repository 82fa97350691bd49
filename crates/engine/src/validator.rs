//! Habit rule checks.
//!
//! Single source of truth for habit consistency. Every write path runs
//! [`validate`] on the full candidate state before commit; there is no
//! second rule set anywhere else. The function is pure: same input, same
//! result, no I/O.
use thiserror::Error;
use uuid::Uuid;

use crate::HabitDraft;

pub const EXECUTION_TIME_MIN: u32 = 1;
pub const EXECUTION_TIME_MAX: u32 = 120;
pub const PERIODICITY_MIN: u32 = 1;
pub const PERIODICITY_MAX: u32 = 7;

/// Read-only view of the referenced related habit, taken inside the same
/// transaction that commits the write.
#[derive(Clone, Copy, Debug)]
pub struct RelatedSnapshot {
    pub id: Uuid,
    pub is_pleasant: bool,
}

/// A violated habit rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a habit cannot have both a reward and a related habit")]
    MutualExclusionViolation,
    #[error("the related habit must be a pleasant habit")]
    RelatedHabitNotPleasant,
    #[error("a pleasant habit cannot have a reward or a related habit")]
    PleasantHabitHasExtras,
    #[error("execution time must be between 1 and 120 seconds")]
    ExecutionTimeOutOfRange,
    #[error("periodicity must be between 1 and 7 days")]
    PeriodicityOutOfRange,
    #[error("a habit cannot be related to itself")]
    SelfReference,
}

/// Check a candidate habit state against every habit rule.
///
/// `habit_id` is the id of the habit being edited (`None` on creation) and
/// `related` a snapshot of the referenced habit when `related_habit_id` is
/// set. Checks run in a fixed order and the first failure wins.
///
/// An empty or whitespace-only reward counts as unset.
pub fn validate(
    draft: &HabitDraft,
    habit_id: Option<Uuid>,
    related: Option<RelatedSnapshot>,
) -> Result<(), ValidationError> {
    let reward = draft
        .reward
        .as_deref()
        .map(str::trim)
        .filter(|reward| !reward.is_empty());

    if reward.is_some() && draft.related_habit_id.is_some() {
        return Err(ValidationError::MutualExclusionViolation);
    }

    if draft.related_habit_id.is_some()
        && let Some(related) = related
        && !related.is_pleasant
    {
        return Err(ValidationError::RelatedHabitNotPleasant);
    }

    if draft.is_pleasant && (reward.is_some() || draft.related_habit_id.is_some()) {
        return Err(ValidationError::PleasantHabitHasExtras);
    }

    if !(EXECUTION_TIME_MIN..=EXECUTION_TIME_MAX).contains(&draft.execution_time) {
        return Err(ValidationError::ExecutionTimeOutOfRange);
    }

    if !(PERIODICITY_MIN..=PERIODICITY_MAX).contains(&draft.periodicity) {
        return Err(ValidationError::PeriodicityOutOfRange);
    }

    if let (Some(id), Some(related_id)) = (habit_id, draft.related_habit_id)
        && id == related_id
    {
        return Err(ValidationError::SelfReference);
    }

    Ok(())
}
