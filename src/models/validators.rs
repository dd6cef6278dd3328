use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;
use validator::ValidationError;

/// Usernames: ASCII letters, digits, `.`, `_` and `-`.
pub static USERNAME_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").ok());

/// Maximum number of instances a single ability update may touch
pub const MAX_ABILITY_INSTANCES: usize = 500;

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let valid = USERNAME_REGEX
        .as_ref()
        .is_some_and(|re| re.is_match(username));
    if !valid {
        let mut err = ValidationError::new("invalid_username");
        err.message = Some(Cow::Borrowed(
            "Username may only contain letters, digits, '.', '_' and '-'",
        ));
        return Err(err);
    }
    Ok(())
}

/// Instance URLs must be absolute http(s) URLs; the login URL is derived from them.
pub fn validate_instance_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_url");
            err.message = Some(Cow::Borrowed("Instance URL must be an absolute http(s) URL"));
            Err(err)
        }
    }
}

pub fn validate_ability_instances(ids: &[uuid::Uuid]) -> Result<(), ValidationError> {
    if ids.len() > MAX_ABILITY_INSTANCES {
        let mut err = ValidationError::new("too_many_instances");
        err.message = Some(Cow::Owned(format!(
            "Maximum {} instances per update",
            MAX_ABILITY_INSTANCES
        )));
        return Err(err);
    }
    Ok(())
}
