use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_service_type, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult, conflict_on_unique},
        repos::InstanceRepo,
    },
    models::{CreateInstance, ServiceInstance, UpdateInstance},
};

pub struct SqliteInstanceRepo {
    pool: SqlitePool,
}

impl SqliteInstanceRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_instance(row: &SqliteRow) -> DbResult<ServiceInstance> {
        Ok(ServiceInstance {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            name: row.get("name"),
            service_type: parse_service_type(&row.get::<String, _>("service_type"))?,
            url: row.get("url"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl InstanceRepo for SqliteInstanceRepo {
    async fn create(&self, input: CreateInstance) -> DbResult<ServiceInstance> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO service_instances (id, name, service_type, url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&input.name)
        .bind(input.service_type.as_str())
        .bind(&input.url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || format!("Instance with name '{}' already exists", input.name))
        })?;

        Ok(ServiceInstance {
            id,
            name: input.name,
            service_type: input.service_type,
            url: input.url,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ServiceInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, service_type, url, created_at, updated_at
            FROM service_instances
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn list(&self) -> DbResult<Vec<ServiceInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, service_type, url, created_at, updated_at
            FROM service_instances
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn update(&self, id: Uuid, input: UpdateInstance) -> DbResult<ServiceInstance> {
        let existing = self.get_by_id(id).await?.ok_or(DbError::NotFound)?;
        let name = input.name.unwrap_or(existing.name);
        let url = input.url.unwrap_or(existing.url);

        let result = sqlx::query(
            "UPDATE service_instances SET name = ?, url = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&url)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Instance with name '{name}' already exists")))?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM service_instances WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
