use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::models::{ACCESS_TOKEN_PREFIX, validate_username};

/// Upper bound for `login_touch_interval_secs`: 30 days.
pub const MAX_LOGIN_TOUCH_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// Authentication and access rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// When true, a non-admin user needs a `can_use` ability on an instance
    /// before reading that instance's aggregates. When false, any
    /// authenticated user may read instance-scoped sums and group counts.
    #[serde(default)]
    pub restrict_instance_usage: bool,

    /// Minimum seconds between two `last_login_at` updates for the same user.
    /// Each update also writes a `user.login` event.
    #[serde(default = "default_login_touch_interval")]
    pub login_touch_interval_secs: u64,

    /// Admin account created on startup when no user with that username exists.
    #[serde(default)]
    pub bootstrap: Option<BootstrapAdminConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            restrict_instance_usage: false,
            login_touch_interval_secs: default_login_touch_interval(),
            bootstrap: None,
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.login_touch_interval_secs > MAX_LOGIN_TOUCH_INTERVAL_SECS {
            return Err(ConfigError::Validation(format!(
                "auth.login_touch_interval_secs must be at most {MAX_LOGIN_TOUCH_INTERVAL_SECS}"
            )));
        }
        if let Some(bootstrap) = &self.bootstrap {
            bootstrap.validate()?;
        }
        Ok(())
    }

    /// `login_touch_interval_secs` as a duration. Capped at the maximum so
    /// configs built without validation cannot overflow.
    pub fn login_touch_interval(&self) -> chrono::Duration {
        let secs = self
            .login_touch_interval_secs
            .min(MAX_LOGIN_TOUCH_INTERVAL_SECS);
        chrono::Duration::seconds(secs as i64)
    }
}

fn default_login_touch_interval() -> u64 {
    300
}

/// Bootstrap admin.
///
/// Example:
/// ```toml
/// [auth.bootstrap]
/// username = "admin"
/// name = "Administrator"
/// token = "${SHAREGATE_BOOTSTRAP_TOKEN}"
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapAdminConfig {
    pub username: String,
    pub name: String,

    /// Raw access token registered for the admin. Must carry the `sg_`
    /// prefix. Only its hash is stored.
    pub token: String,
}

impl BootstrapAdminConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_username(&self.username).map_err(|_| {
            ConfigError::Validation(format!(
                "auth.bootstrap.username '{}' is not a valid username",
                self.username
            ))
        })?;
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "auth.bootstrap.name cannot be empty".into(),
            ));
        }
        if !self.token.starts_with(ACCESS_TOKEN_PREFIX) {
            return Err(ConfigError::Validation(format!(
                "auth.bootstrap.token must start with '{ACCESS_TOKEN_PREFIX}'"
            )));
        }
        if self.token.len() < ACCESS_TOKEN_PREFIX.len() + 16 {
            return Err(ConfigError::Validation(
                "auth.bootstrap.token must have at least 16 characters after the prefix".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BootstrapAdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdminConfig")
            .field("username", &self.username)
            .field("name", &self.name)
            .field("token", &"****")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bootstrap(token: &str) -> AuthConfig {
        AuthConfig {
            bootstrap: Some(BootstrapAdminConfig {
                username: "admin".into(),
                name: "Admin".into(),
                token: token.into(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_bootstrap_token_prefix_required() {
        assert!(bootstrap("sg_0123456789abcdefXYZ").validate().is_ok());
        assert!(bootstrap("sk_0123456789abcdefXYZ").validate().is_err());
        assert!(bootstrap("sg_short").validate().is_err());
    }

    #[test]
    fn test_login_touch_interval_bounded() {
        let mut config = AuthConfig::default();
        assert_eq!(config.login_touch_interval(), chrono::Duration::minutes(5));

        config.login_touch_interval_secs = MAX_LOGIN_TOUCH_INTERVAL_SECS;
        assert!(config.validate().is_ok());

        config.login_touch_interval_secs = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(config.login_touch_interval(), chrono::Duration::days(30));
    }

    #[test]
    fn test_bootstrap_token_redacted_in_debug() {
        let config = bootstrap("sg_0123456789abcdefXYZ");
        let debug = format!("{config:?}");
        assert!(!debug.contains("0123456789"));
    }
}
