//! The authenticated caller of a request.

use serde::Serialize;
use uuid::Uuid;

use super::AuthError;
use crate::models::Role;

/// Who is making the request. Inserted into request extensions by the
/// access token middleware.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    /// Access token the request was made with
    pub token_id: Uuid,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AuthError::Forbidden("Admin role required".into()))
        }
    }

    /// Resolve the user a request is scoped to. Omitted means the caller;
    /// anyone else needs the admin role.
    pub fn scope_user(&self, requested: Option<Uuid>) -> Result<Uuid, AuthError> {
        match requested {
            None => Ok(self.user_id),
            Some(id) if id == self.user_id || self.is_admin() => Ok(id),
            Some(_) => Err(AuthError::Forbidden(
                "Cannot access another user's usage".into(),
            )),
        }
    }

    /// Every listed user must be the caller unless the caller is admin.
    pub fn require_users(&self, mut user_ids: impl Iterator<Item = Uuid>) -> Result<(), AuthError> {
        if self.is_admin() || user_ids.all(|id| id == self.user_id) {
            Ok(())
        } else {
            Err(AuthError::Forbidden(
                "Cannot access another user's usage".into(),
            ))
        }
    }
}
