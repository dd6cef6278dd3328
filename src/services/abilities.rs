use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::{DbError, DbPool, DbResult},
    models::{InstanceAbility, UpdateInstanceUseStatus},
};

/// Outcome of an ability update.
#[derive(Debug, Clone)]
pub struct AbilityUpdate {
    pub abilities: Vec<InstanceAbility>,
    /// Instance tokens deleted because use was revoked
    pub tokens_revoked: u64,
}

/// Grants and revokes the right to use instances.
#[derive(Clone)]
pub struct AbilityService {
    db: Arc<DbPool>,
}

impl AbilityService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Set `can_use` for a user on a set of instances.
    ///
    /// Revoking also deletes the user's instance tokens for those instances,
    /// so a proxy holding one stops being able to report usage.
    pub async fn update(&self, input: &UpdateInstanceUseStatus) -> DbResult<AbilityUpdate> {
        if self.db.users().get_by_id(input.user_id).await?.is_none() {
            return Err(DbError::NotFound);
        }
        for &instance_id in &input.instance_ids {
            if self.db.instances().get_by_id(instance_id).await?.is_none() {
                return Err(DbError::Validation(format!(
                    "instance {instance_id} does not exist"
                )));
            }
        }

        let abilities = self
            .db
            .abilities()
            .set_can_use(input.user_id, &input.instance_ids, input.can_use)
            .await?;

        let tokens_revoked = if input.can_use {
            0
        } else {
            self.db
                .instance_tokens()
                .delete_for_user(input.user_id, &input.instance_ids)
                .await?
        };

        Ok(AbilityUpdate {
            abilities,
            tokens_revoked,
        })
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<InstanceAbility>> {
        self.db.abilities().list_for_user(user_id).await
    }

    pub async fn can_use(&self, user_id: Uuid, instance_id: Uuid) -> DbResult<bool> {
        self.db.abilities().can_use(user_id, instance_id).await
    }
}
