use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    db::{error::DbResult, repos::AbilityRepo},
    models::InstanceAbility,
};

pub struct PostgresAbilityRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresAbilityRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }
}

#[async_trait]
impl AbilityRepo for PostgresAbilityRepo {
    async fn set_can_use(
        &self,
        user_id: Uuid,
        instance_ids: &[Uuid],
        can_use: bool,
    ) -> DbResult<Vec<InstanceAbility>> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO instance_abilities (user_id, instance_id, can_use, updated_at)
            SELECT $1, instance_id, $3, $4 FROM UNNEST($2::uuid[]) AS t(instance_id)
            ON CONFLICT (user_id, instance_id)
            DO UPDATE SET can_use = EXCLUDED.can_use, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(instance_ids)
        .bind(can_use)
        .bind(now)
        .execute(&self.write_pool)
        .await?;

        Ok(instance_ids
            .iter()
            .map(|&instance_id| InstanceAbility {
                user_id,
                instance_id,
                can_use,
                updated_at: now,
            })
            .collect())
    }

    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<InstanceAbility>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, instance_id, can_use, updated_at
            FROM instance_abilities
            WHERE user_id = $1
            ORDER BY instance_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.read_pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| InstanceAbility {
                user_id: row.get("user_id"),
                instance_id: row.get("instance_id"),
                can_use: row.get("can_use"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    async fn can_use(&self, user_id: Uuid, instance_id: Uuid) -> DbResult<bool> {
        let row = sqlx::query(
            "SELECT can_use FROM instance_abilities WHERE user_id = $1 AND instance_id = $2",
        )
        .bind(user_id)
        .bind(instance_id)
        .fetch_optional(&self.read_pool)
        .await?;

        Ok(row.map(|r| r.get::<bool, _>("can_use")).unwrap_or(false))
    }
}
