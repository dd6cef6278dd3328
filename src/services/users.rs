use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    config::BootstrapAdminConfig,
    db::{DbError, DbPool, DbResult},
    models::{
        ACCESS_TOKEN_PREFIX, AccessToken, CreateUser, CreatedAccessToken, Page, PageParams, Role,
        UpdateUser, User, display_prefix, generate_token_with_prefix, hash_token,
    },
};

/// Name given to access tokens minted for new admins.
const ADMIN_TOKEN_NAME: &str = "admin";

/// Service layer for user operations
#[derive(Clone)]
pub struct UserService {
    db: Arc<DbPool>,
}

impl UserService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Create a new user
    pub async fn create(&self, input: CreateUser) -> DbResult<User> {
        self.db.users().create(input).await
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: Uuid) -> DbResult<Option<User>> {
        self.db.users().get_by_id(id).await
    }

    pub async fn get_by_username(&self, username: &str) -> DbResult<Option<User>> {
        self.db.users().get_by_username(username).await
    }

    /// List users with pagination
    pub async fn list(&self, params: PageParams) -> DbResult<Page<User>> {
        self.db.users().list(params).await
    }

    /// Update a user by ID
    pub async fn update(&self, id: Uuid, input: UpdateUser) -> DbResult<User> {
        self.db.users().update(id, input).await
    }

    /// Activate or deactivate a user. Deactivated users fail authentication
    /// on their next request.
    pub async fn set_active(&self, id: Uuid, is_active: bool) -> DbResult<User> {
        self.db.users().update(id, UpdateUser::active(is_active)).await
    }

    pub async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        self.db.users().touch_login(id, at).await
    }

    /// Create an admin user and mint an access token for it.
    ///
    /// The raw token in the result is the only copy.
    pub async fn create_admin(
        &self,
        username: &str,
        name: &str,
    ) -> DbResult<(User, CreatedAccessToken)> {
        let user = self
            .db
            .users()
            .create(CreateUser {
                username: username.to_string(),
                name: name.to_string(),
                email: None,
                role: Role::Admin,
                comment: None,
            })
            .await?;

        let (token, token_hash) = generate_token_with_prefix(ACCESS_TOKEN_PREFIX);
        let access_token = self
            .db
            .access_tokens()
            .create(user.id, ADMIN_TOKEN_NAME, &token_hash, &display_prefix(&token))
            .await?;

        Ok((
            user,
            CreatedAccessToken {
                token,
                access_token,
            },
        ))
    }

    /// Make sure the configured bootstrap admin exists and holds the
    /// configured token. Safe to call on every start.
    ///
    /// Returns `None` when the admin and token were already in place.
    pub async fn ensure_bootstrap_admin(
        &self,
        config: &BootstrapAdminConfig,
    ) -> DbResult<Option<AccessToken>> {
        let user = match self.db.users().get_by_username(&config.username).await? {
            Some(user) if user.role.is_admin() => user,
            Some(_) => {
                return Err(DbError::Conflict(format!(
                    "bootstrap user '{}' exists without the admin role",
                    config.username
                )));
            }
            None => {
                self.db
                    .users()
                    .create(CreateUser {
                        username: config.username.clone(),
                        name: config.name.clone(),
                        email: None,
                        role: Role::Admin,
                        comment: None,
                    })
                    .await?
            }
        };

        let token_hash = hash_token(&config.token);
        if self
            .db
            .access_tokens()
            .get_by_hash(&token_hash)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let token = self
            .db
            .access_tokens()
            .create(
                user.id,
                "bootstrap",
                &token_hash,
                &display_prefix(&config.token),
            )
            .await?;
        Ok(Some(token))
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use super::*;
    use crate::db::tests::harness::create_sqlite_db;

    fn bootstrap() -> BootstrapAdminConfig {
        BootstrapAdminConfig {
            username: "root".into(),
            name: "Root".into(),
            token: "sg_bootstrap-token-0123456789".into(),
        }
    }

    #[tokio::test]
    async fn test_create_admin_returns_working_token() {
        let db = Arc::new(create_sqlite_db().await);
        let service = UserService::new(db.clone());

        let (user, created) = service.create_admin("ops", "Ops").await.unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(created.token.starts_with(ACCESS_TOKEN_PREFIX));

        let stored = db
            .access_tokens()
            .get_by_hash(&hash_token(&created.token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, user.id);
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let db = Arc::new(create_sqlite_db().await);
        let service = UserService::new(db.clone());

        assert!(
            service
                .ensure_bootstrap_admin(&bootstrap())
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            service
                .ensure_bootstrap_admin(&bootstrap())
                .await
                .unwrap()
                .is_none()
        );

        let user = service.get_by_username("root").await.unwrap().unwrap();
        assert!(user.role.is_admin());
        assert_eq!(
            db.access_tokens().list_for_user(user.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_bootstrap_refuses_non_admin_username() {
        let db = Arc::new(create_sqlite_db().await);
        let service = UserService::new(db);
        service
            .create(CreateUser {
                username: "root".into(),
                name: "Not Root".into(),
                email: None,
                role: Role::User,
                comment: None,
            })
            .await
            .unwrap();

        let err = service.ensure_bootstrap_admin(&bootstrap()).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_set_active() {
        let db = Arc::new(create_sqlite_db().await);
        let service = UserService::new(db);
        let (user, _) = service.create_admin("ops", "Ops").await.unwrap();

        let user = service.set_active(user.id, false).await.unwrap();
        assert!(!user.is_active);
        assert!(matches!(
            service.set_active(Uuid::new_v4(), true).await,
            Err(DbError::NotFound)
        ));
    }
}
