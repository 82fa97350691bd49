use sea_orm::{ActiveValue, ConnectionTrait, QueryFilter, TransactionTrait, prelude::*, sea_query::Expr};
use uuid::Uuid;

use crate::{EngineError, Profile, ResultEngine, habits, profiles, users};

use super::{Engine, normalize_optional_text, with_tx};

impl Engine {
    /// Create a user together with an empty profile.
    pub async fn create_user(&self, username: &str, password: &str) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            if users::Entity::find_by_id(username).one(&db_tx).await?.is_some() {
                return Err(EngineError::ExistingKey(username.to_string()));
            }

            users::ActiveModel {
                username: ActiveValue::Set(username.to_string()),
                password: ActiveValue::Set(password.to_string()),
            }
            .insert(&db_tx)
            .await?;

            // The profile exists from day one so reminder lookups always
            // resolve; the channel address stays unset until paired.
            profiles::ActiveModel {
                user_id: ActiveValue::Set(username.to_string()),
                chat_id: ActiveValue::Set(None),
            }
            .insert(&db_tx)
            .await?;

            Ok(())
        })
    }

    /// Return the profile of `user_id`, if the user exists.
    pub async fn profile(&self, user_id: &str) -> ResultEngine<Option<Profile>> {
        with_tx!(self, |db_tx| {
            let model = profiles::Entity::find_by_id(user_id).one(&db_tx).await?;
            Ok(model.map(Profile::from))
        })
    }

    /// Set or clear the messaging channel address of `user_id`.
    pub async fn set_chat_id(&self, user_id: &str, chat_id: Option<&str>) -> ResultEngine<()> {
        let chat_id = normalize_optional_text(chat_id);
        with_tx!(self, |db_tx| {
            let model = profiles::Entity::find_by_id(user_id)
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("profile not exists".to_string()))?;

            let mut active: profiles::ActiveModel = model.into();
            active.chat_id = ActiveValue::Set(chat_id.clone());
            active.update(&db_tx).await?;
            Ok(())
        })
    }

    /// Delete a user with their profile and habits.
    ///
    /// Other users' habits that referenced one of the deleted habits keep
    /// existing with the link nulled.
    pub async fn delete_user(&self, username: &str) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.require_user(&db_tx, username).await?;

            let ids: Vec<Uuid> = habits::Entity::find()
                .filter(habits::Column::UserId.eq(username))
                .all(&db_tx)
                .await?
                .into_iter()
                .map(|habit| habit.id)
                .collect();

            if !ids.is_empty() {
                habits::Entity::update_many()
                    .col_expr(habits::Column::RelatedHabitId, Expr::value(Option::<Uuid>::None))
                    .filter(habits::Column::RelatedHabitId.is_in(ids))
                    .exec(&db_tx)
                    .await?;
            }

            habits::Entity::delete_many()
                .filter(habits::Column::UserId.eq(username))
                .exec(&db_tx)
                .await?;
            profiles::Entity::delete_many()
                .filter(profiles::Column::UserId.eq(username))
                .exec(&db_tx)
                .await?;
            users::Entity::delete_by_id(username).exec(&db_tx).await?;

            Ok(())
        })
    }

    pub(crate) async fn require_user<C: ConnectionTrait>(
        &self,
        db: &C,
        username: &str,
    ) -> ResultEngine<()> {
        users::Entity::find_by_id(username)
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("user not exists".to_string()))?;
        Ok(())
    }
}
