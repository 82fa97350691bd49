//! The module contains the `Habit` type, the central entity of the system.
//!
//! A habit is a recurring action with a schedule (time-of-day, periodicity
//! in days), a place, and an optional incentive: either a textual reward or
//! a link to a pleasant habit, never both.
use chrono::{DateTime, NaiveTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EngineError;

/// Storage format for the time-of-day column, minute precision.
pub const TIME_FORMAT: &str = "%H:%M";

/// A habit owned by a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: Uuid,
    pub user_id: String,
    pub place: String,
    pub time: NaiveTime,
    pub action: String,
    pub is_pleasant: bool,
    pub related_habit_id: Option<Uuid>,
    pub periodicity: u32,
    pub reward: Option<String>,
    pub execution_time: u32,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Candidate habit state, checked by the validator before every commit.
///
/// The same draft shape is used for creation and edits: an edit re-validates
/// the full resulting state, not a diff.
#[derive(Clone, Debug, Default)]
pub struct HabitDraft {
    pub place: String,
    pub time: NaiveTime,
    pub action: String,
    pub is_pleasant: bool,
    pub related_habit_id: Option<Uuid>,
    pub periodicity: u32,
    pub reward: Option<String>,
    pub execution_time: u32,
    pub is_public: bool,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "habits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: String,
    pub place: String,
    pub time: String,
    pub action: String,
    pub is_pleasant: bool,
    pub related_habit_id: Option<Uuid>,
    pub periodicity: i32,
    pub reward: Option<String>,
    pub execution_time: i32,
    pub is_public: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Username",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Users,
    // Weak self reference: deleting the target nulls this column, it never
    // cascades into the referencing habit.
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::RelatedHabitId",
        to = "Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    RelatedHabit,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Habit {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let time = NaiveTime::parse_from_str(&model.time, TIME_FORMAT)
            .map_err(|_| EngineError::InvalidTime(model.time.clone()))?;
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            place: model.place,
            time,
            action: model.action,
            is_pleasant: model.is_pleasant,
            related_habit_id: model.related_habit_id,
            periodicity: model.periodicity.max(0) as u32,
            reward: model.reward,
            execution_time: model.execution_time.max(0) as u32,
            is_public: model.is_public,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

impl ActiveModel {
    /// Build the column set shared by inserts and updates from a draft.
    pub(crate) fn from_draft(draft: &HabitDraft) -> Self {
        Self {
            place: ActiveValue::Set(draft.place.clone()),
            time: ActiveValue::Set(draft.time.format(TIME_FORMAT).to_string()),
            action: ActiveValue::Set(draft.action.clone()),
            is_pleasant: ActiveValue::Set(draft.is_pleasant),
            related_habit_id: ActiveValue::Set(draft.related_habit_id),
            periodicity: ActiveValue::Set(draft.periodicity as i32),
            reward: ActiveValue::Set(draft.reward.clone()),
            execution_time: ActiveValue::Set(draft.execution_time as i32),
            is_public: ActiveValue::Set(draft.is_public),
            ..Default::default()
        }
    }
}
