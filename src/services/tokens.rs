//! Issuing and checking bearer tokens.
//!
//! Two kinds exist: access tokens (`sg_`) authenticate dashboard clients,
//! instance tokens (`sgi_`) let an instance proxy report usage for one user.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    db::{DbError, DbPool, DbResult},
    models::{
        ACCESS_TOKEN_PREFIX, AccessToken, CreateAccessToken, CreatedAccessToken,
        INSTANCE_TOKEN_PREFIX, InstanceToken, IssuedInstanceToken, User, display_prefix,
        generate_token_with_prefix, has_valid_prefix, hash_token,
    },
};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("User not found")]
    UserNotFound,

    #[error("Instance not found")]
    InstanceNotFound,

    #[error("User is not allowed to use this instance")]
    NotAllowed,

    #[error(transparent)]
    Db(#[from] DbError),
}

/// A successfully authenticated access token and its owner.
#[derive(Debug, Clone)]
pub struct AuthenticatedToken {
    pub user: User,
    pub token: AccessToken,
}

#[derive(Clone)]
pub struct TokenService {
    db: Arc<DbPool>,
}

impl TokenService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Mint an access token for a user. The raw token is returned once.
    pub async fn issue_access_token(
        &self,
        user_id: Uuid,
        input: &CreateAccessToken,
    ) -> Result<CreatedAccessToken, TokenError> {
        if self.db.users().get_by_id(user_id).await?.is_none() {
            return Err(TokenError::UserNotFound);
        }

        let (token, token_hash) = generate_token_with_prefix(ACCESS_TOKEN_PREFIX);
        let access_token = self
            .db
            .access_tokens()
            .create(user_id, &input.name, &token_hash, &display_prefix(&token))
            .await?;

        Ok(CreatedAccessToken {
            token,
            access_token,
        })
    }

    pub async fn list_access_tokens(&self, user_id: Uuid) -> DbResult<Vec<AccessToken>> {
        self.db.access_tokens().list_for_user(user_id).await
    }

    /// Revoke an access token. Revoking twice is not an error.
    pub async fn revoke_access_token(&self, id: Uuid) -> DbResult<AccessToken> {
        let repo = self.db.access_tokens();
        let token = repo.get_by_id(id).await?.ok_or(DbError::NotFound)?;
        if token.is_revoked() {
            return Ok(token);
        }
        repo.revoke(id, Utc::now()).await?;
        repo.get_by_id(id).await?.ok_or(DbError::NotFound)
    }

    /// Resolve a raw bearer token to its owner.
    ///
    /// `None` for anything that must not authenticate: wrong prefix, unknown,
    /// revoked, or owned by a deactivated user.
    pub async fn authenticate_access(&self, raw: &str) -> DbResult<Option<AuthenticatedToken>> {
        if !has_valid_prefix(raw, ACCESS_TOKEN_PREFIX) {
            return Ok(None);
        }

        let Some(token) = self.db.access_tokens().get_by_hash(&hash_token(raw)).await? else {
            return Ok(None);
        };
        if token.is_revoked() {
            return Ok(None);
        }

        let Some(user) = self.db.users().get_by_id(token.user_id).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }

        Ok(Some(AuthenticatedToken { user, token }))
    }

    pub async fn touch_access_token(&self, id: Uuid) -> DbResult<()> {
        self.db.access_tokens().touch(id, Utc::now()).await
    }

    /// Issue or rotate the token a user's instance proxy presents. Requires
    /// `can_use` on the instance.
    pub async fn issue_instance_token(
        &self,
        user_id: Uuid,
        instance_id: Uuid,
    ) -> Result<IssuedInstanceToken, TokenError> {
        if self.db.instances().get_by_id(instance_id).await?.is_none() {
            return Err(TokenError::InstanceNotFound);
        }
        if !self.db.abilities().can_use(user_id, instance_id).await? {
            return Err(TokenError::NotAllowed);
        }

        let (token, token_hash) = generate_token_with_prefix(INSTANCE_TOKEN_PREFIX);
        let instance_token = self
            .db
            .instance_tokens()
            .upsert(user_id, instance_id, &token_hash, &display_prefix(&token))
            .await?;

        Ok(IssuedInstanceToken {
            token,
            instance_token,
        })
    }

    /// Resolve an instance token presented for `instance_id`. Tokens issued
    /// for another instance do not match.
    pub async fn authenticate_instance(
        &self,
        instance_id: Uuid,
        raw: &str,
    ) -> DbResult<Option<InstanceToken>> {
        if !has_valid_prefix(raw, INSTANCE_TOKEN_PREFIX) {
            return Ok(None);
        }
        self.db
            .instance_tokens()
            .find_by_hash(instance_id, &hash_token(raw))
            .await
    }
}
