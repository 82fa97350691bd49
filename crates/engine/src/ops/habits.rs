use chrono::{NaiveTime, Utc};
use uuid::Uuid;

use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::Expr,
};

use crate::{
    EngineError, Habit, HabitDraft, ResultEngine, TIME_FORMAT, habits,
    validator::{self, RelatedSnapshot},
};

use super::{Engine, normalize_optional_text, with_tx};

impl Engine {
    /// Create a habit for `user_id`.
    ///
    /// The related habit snapshot (when one is referenced) is taken inside
    /// the write transaction, so its `is_pleasant` flag cannot change
    /// between validation and commit.
    pub async fn create_habit(&self, user_id: &str, draft: HabitDraft) -> ResultEngine<Habit> {
        let draft = normalize_draft(draft);
        with_tx!(self, |db_tx| {
            self.require_user(&db_tx, user_id).await?;
            let related = related_snapshot(&db_tx, user_id, draft.related_habit_id).await?;
            validator::validate(&draft, None, related)?;

            let now = Utc::now();
            let mut model = habits::ActiveModel::from_draft(&draft);
            model.id = ActiveValue::Set(Uuid::new_v4());
            model.user_id = ActiveValue::Set(user_id.to_string());
            model.created_at = ActiveValue::Set(now);
            model.updated_at = ActiveValue::Set(now);

            let inserted = model.insert(&db_tx).await?;
            Habit::try_from(inserted)
        })
    }

    /// Update a habit owned by `user_id`.
    ///
    /// Edits re-validate the full resulting state, not a diff: the same
    /// rule set as creation plus the self-reference check.
    pub async fn update_habit(
        &self,
        habit_id: Uuid,
        user_id: &str,
        draft: HabitDraft,
    ) -> ResultEngine<Habit> {
        let draft = normalize_draft(draft);
        with_tx!(self, |db_tx| {
            let existing = habits::Entity::find_by_id(habit_id)
                .filter(habits::Column::UserId.eq(user_id))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("habit not exists".to_string()))?;

            let related = related_snapshot(&db_tx, user_id, draft.related_habit_id).await?;
            validator::validate(&draft, Some(habit_id), related)?;

            let mut model = habits::ActiveModel::from_draft(&draft);
            model.id = ActiveValue::Unchanged(existing.id);
            model.updated_at = ActiveValue::Set(Utc::now());

            let updated = model.update(&db_tx).await?;
            Habit::try_from(updated)
        })
    }

    /// Delete a habit owned by `user_id`.
    ///
    /// Habits referencing the deleted one keep existing with their
    /// `related_habit_id` nulled; the weak reference never cascades.
    pub async fn delete_habit(&self, habit_id: Uuid, user_id: &str) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let habit = habits::Entity::find_by_id(habit_id)
                .filter(habits::Column::UserId.eq(user_id))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("habit not exists".to_string()))?;

            // The FK is SET NULL as well; clearing links here keeps the
            // invariant independent of the connection's foreign-key pragma.
            habits::Entity::update_many()
                .col_expr(habits::Column::RelatedHabitId, Expr::value(Option::<Uuid>::None))
                .filter(habits::Column::RelatedHabitId.eq(habit_id))
                .exec(&db_tx)
                .await?;

            habits::Entity::delete_by_id(habit.id).exec(&db_tx).await?;
            Ok(())
        })
    }

    /// Return a habit owned by `user_id`.
    pub async fn habit(&self, habit_id: Uuid, user_id: &str) -> ResultEngine<Habit> {
        with_tx!(self, |db_tx| {
            let model = habits::Entity::find_by_id(habit_id)
                .filter(habits::Column::UserId.eq(user_id))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("habit not exists".to_string()))?;
            Habit::try_from(model)
        })
    }

    /// Return all habits of `user_id`, newest first.
    pub async fn habits(&self, user_id: &str) -> ResultEngine<Vec<Habit>> {
        with_tx!(self, |db_tx| {
            let models = habits::Entity::find()
                .filter(habits::Column::UserId.eq(user_id))
                .order_by_desc(habits::Column::CreatedAt)
                .all(&db_tx)
                .await?;
            models.into_iter().map(Habit::try_from).collect()
        })
    }

    /// Return every habit, across all users, scheduled at `time`.
    ///
    /// The match is exact to the minute; seconds are dropped.
    pub async fn habits_due_at(&self, time: NaiveTime) -> ResultEngine<Vec<Habit>> {
        let key = time.format(TIME_FORMAT).to_string();
        with_tx!(self, |db_tx| {
            let models = habits::Entity::find()
                .filter(habits::Column::Time.eq(key.as_str()))
                .all(&db_tx)
                .await?;
            models.into_iter().map(Habit::try_from).collect()
        })
    }
}

async fn related_snapshot<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    related_habit_id: Option<Uuid>,
) -> ResultEngine<Option<RelatedSnapshot>> {
    let Some(id) = related_habit_id else {
        return Ok(None);
    };

    let model = habits::Entity::find_by_id(id)
        .filter(habits::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("related habit not exists".to_string()))?;

    Ok(Some(RelatedSnapshot {
        id: model.id,
        is_pleasant: model.is_pleasant,
    }))
}

fn normalize_draft(mut draft: HabitDraft) -> HabitDraft {
    draft.place = draft.place.trim().to_string();
    draft.action = draft.action.trim().to_string();
    draft.reward = normalize_optional_text(draft.reward.as_deref());
    draft
}
