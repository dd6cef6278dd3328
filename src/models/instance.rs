use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validators::validate_instance_url;

/// Kind of shared backend an instance fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    #[default]
    ChatgptShared,
    PoekmonShared,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatgptShared => "CHATGPT_SHARED",
            Self::PoekmonShared => "POEKMON_SHARED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CHATGPT_SHARED" => Some(Self::ChatgptShared),
            "POEKMON_SHARED" => Some(Self::PoekmonShared),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct ServiceInstance {
    pub id: Uuid,
    pub name: String,
    pub service_type: ServiceType,
    /// Base URL of the shared chat frontend
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceInstance {
    /// URL a user is redirected to, carrying the instance name as `carid`.
    pub fn login_url(&self) -> Option<String> {
        let mut url = url::Url::parse(&self.url).ok()?;
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments.pop_if_empty().push("auth").push("login");
        }
        url.query_pairs_mut().append_pair("carid", &self.name);
        Some(url.into())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct CreateInstance {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub service_type: ServiceType,
    #[validate(length(max = 2048), custom(function = "validate_instance_url"))]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UpdateInstance {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    #[validate(length(max = 2048), custom(function = "validate_instance_url"))]
    pub url: Option<String>,
}

/// An instance as seen by one user.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UserInstance {
    #[serde(flatten)]
    pub instance: ServiceInstance,
    pub can_use: bool,
    pub has_token: bool,
    pub login_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(url: &str, name: &str) -> ServiceInstance {
        let now = Utc::now();
        ServiceInstance {
            id: Uuid::new_v4(),
            name: name.to_string(),
            service_type: ServiceType::ChatgptShared,
            url: url.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_login_url() {
        assert_eq!(
            instance("https://chat.example.com", "car-1").login_url().as_deref(),
            Some("https://chat.example.com/auth/login?carid=car-1")
        );
        assert_eq!(
            instance("https://chat.example.com/base/", "a b").login_url().as_deref(),
            Some("https://chat.example.com/base/auth/login?carid=a+b")
        );
    }

    #[test]
    fn test_service_type_wire_format() {
        let json = serde_json::to_string(&ServiceType::ChatgptShared).unwrap();
        assert_eq!(json, "\"CHATGPT_SHARED\"");
        assert_eq!(
            ServiceType::from_str("POEKMON_SHARED"),
            Some(ServiceType::PoekmonShared)
        );
    }
}
