use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        decode::parse_service_type,
        error::{DbError, DbResult, conflict_on_unique},
        repos::InstanceRepo,
    },
    models::{CreateInstance, ServiceInstance, UpdateInstance},
};

pub struct PostgresInstanceRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresInstanceRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_instance(row: &PgRow) -> DbResult<ServiceInstance> {
        Ok(ServiceInstance {
            id: row.get("id"),
            name: row.get("name"),
            service_type: parse_service_type(row.get("service_type"))?,
            url: row.get("url"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl InstanceRepo for PostgresInstanceRepo {
    async fn create(&self, input: CreateInstance) -> DbResult<ServiceInstance> {
        let row = sqlx::query(
            r#"
            INSERT INTO service_instances (id, name, service_type, url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING id, name, service_type, url, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(input.service_type.as_str())
        .bind(&input.url)
        .fetch_one(&self.write_pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || format!("Instance with name '{}' already exists", input.name))
        })?;

        Self::row_to_instance(&row)
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ServiceInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, service_type, url, created_at, updated_at
            FROM service_instances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.read_pool)
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
        .fetch_all(&self.read_pool)
        .await?;

        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn update(&self, id: Uuid, input: UpdateInstance) -> DbResult<ServiceInstance> {
        let row = sqlx::query(
            r#"
            UPDATE service_instances SET
                name = COALESCE($2, name),
                url = COALESCE($3, url),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, service_type, url, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.url)
        .fetch_optional(&self.write_pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!(
                    "Instance with name '{}' already exists",
                    input.name.as_deref().unwrap_or_default()
                )
            })
        })?
        .ok_or(DbError::NotFound)?;

        Self::row_to_instance(&row)
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM service_instances WHERE id = $1")
            .bind(id)
            .execute(&self.write_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
