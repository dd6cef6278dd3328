use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{error::DbResult, repos::AbilityRepo},
    models::InstanceAbility,
};

pub struct SqliteAbilityRepo {
    pool: SqlitePool,
}

impl SqliteAbilityRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_ability(row: &SqliteRow) -> DbResult<InstanceAbility> {
        Ok(InstanceAbility {
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            instance_id: parse_uuid(&row.get::<String, _>("instance_id"))?,
            can_use: row.get("can_use"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl AbilityRepo for SqliteAbilityRepo {
    async fn set_can_use(
        &self,
        user_id: Uuid,
        instance_ids: &[Uuid],
        can_use: bool,
    ) -> DbResult<Vec<InstanceAbility>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for instance_id in instance_ids {
            sqlx::query(
                r#"
                INSERT INTO instance_abilities (user_id, instance_id, can_use, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (user_id, instance_id)
                DO UPDATE SET can_use = excluded.can_use, updated_at = excluded.updated_at
                "#,
            )
            .bind(user_id.to_string())
            .bind(instance_id.to_string())
            .bind(can_use)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

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
            WHERE user_id = ?
            ORDER BY instance_id
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_ability).collect()
    }

    async fn can_use(&self, user_id: Uuid, instance_id: Uuid) -> DbResult<bool> {
        let row = sqlx::query(
            "SELECT can_use FROM instance_abilities WHERE user_id = ? AND instance_id = ?",
        )
        .bind(user_id.to_string())
        .bind(instance_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<bool, _>("can_use")).unwrap_or(false))
    }
}
