use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use uuid::Uuid;

use crate::{
    db::{DbPool, DbResult},
    models::{CreateInstance, ServiceInstance, UpdateInstance, UserInstance},
};

/// Service layer for shared-account instances
#[derive(Clone)]
pub struct InstanceService {
    db: Arc<DbPool>,
}

impl InstanceService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub async fn create(&self, input: CreateInstance) -> DbResult<ServiceInstance> {
        self.db.instances().create(input).await
    }

    pub async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ServiceInstance>> {
        self.db.instances().get_by_id(id).await
    }

    /// All instances, sorted by name
    pub async fn list(&self) -> DbResult<Vec<ServiceInstance>> {
        let mut instances = self.db.instances().list().await?;
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    pub async fn update(&self, id: Uuid, input: UpdateInstance) -> DbResult<ServiceInstance> {
        self.db.instances().update(id, input).await
    }

    /// Delete an instance. Its abilities and tokens go with it; usage events
    /// are kept.
    pub async fn delete(&self, id: Uuid) -> DbResult<()> {
        self.db.instances().delete(id).await
    }

    /// Every instance as seen by one user: whether they may use it, whether
    /// a token was issued, and where to log in.
    pub async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<UserInstance>> {
        let instances = self.list().await?;

        let abilities: HashMap<Uuid, bool> = self
            .db
            .abilities()
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|a| (a.instance_id, a.can_use))
            .collect();
        let tokens: HashSet<Uuid> = self
            .db
            .instance_tokens()
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|t| t.instance_id)
            .collect();

        Ok(instances
            .into_iter()
            .map(|instance| {
                let can_use = abilities.get(&instance.id).copied().unwrap_or(false);
                // The login link is only useful to users who may enter.
                let login_url = if can_use { instance.login_url() } else { None };
                UserInstance {
                    can_use,
                    has_token: tokens.contains(&instance.id),
                    login_url,
                    instance,
                }
            })
            .collect())
    }
}
