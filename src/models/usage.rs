use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ServiceType;

/// Named trailing time interval bounding an aggregation.
///
/// The set is closed: each name maps to a fixed number of seconds, and a new
/// window means a new variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub enum DurationWindow {
    #[serde(rename = "3h")]
    ThreeHours,
    #[serde(rename = "24h")]
    TwentyFourHours,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl DurationWindow {
    pub const ALL: [DurationWindow; 4] = [
        Self::ThreeHours,
        Self::TwentyFourHours,
        Self::SevenDays,
        Self::ThirtyDays,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThreeHours => "3h",
            Self::TwentyFourHours => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Self::ThreeHours => 10_800,
            Self::TwentyFourHours => 86_400,
            Self::SevenDays => 604_800,
            Self::ThirtyDays => 2_592_000,
        }
    }

    /// Inclusive lower bound of the window ending at `now`.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::seconds(self.seconds())
    }
}

impl fmt::Display for DurationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DurationWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| format!("unknown duration window '{s}'"))
    }
}

/// One immutable record of a user's consumption of an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UsageEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub instance_id: Uuid,
    pub service_type: ServiceType,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    /// UTF-8 byte length of the extracted prompt text
    pub byte_length: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewUsageEvent {
    pub user_id: Uuid,
    pub instance_id: Uuid,
    pub service_type: ServiceType,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub byte_length: i64,
    pub text: Option<String>,
    pub details: UsageDetails,
}

/// Semi-structured payload stored alongside each event. Keys are camelCase
/// because the grouping queries address them by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageDetails {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub model: String,
    pub chatgpt_account_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// Equality filters for windowed sums. `None` matches everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageFilter {
    pub user_id: Option<Uuid>,
    pub instance_id: Option<Uuid>,
    pub service_type: Option<ServiceType>,
}

/// Filters for the paginated event listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "utoipa", into_params(parameter_in = Query))]
pub struct UsageEventFilter {
    pub user_id: Option<Uuid>,
    pub instance_id: Option<Uuid>,
    pub timestamp_start: Option<DateTime<Utc>>,
    pub timestamp_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UsageStats {
    pub count: i64,
    pub sum_utf8_length: i64,
}

impl UsageStats {
    pub fn add(&mut self, other: UsageStats) {
        self.count += other.count;
        self.sum_utf8_length += other.sum_utf8_length;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UserUsageStats {
    pub user_id: Uuid,
    pub count: i64,
    pub sum_utf8_length: i64,
}

impl UserUsageStats {
    pub fn zero(user_id: Uuid) -> Self {
        Self {
            user_id,
            count: 0,
            sum_utf8_length: 0,
        }
    }

    pub fn stats(&self) -> UsageStats {
        UsageStats {
            count: self.count,
            sum_utf8_length: self.sum_utf8_length,
        }
    }
}

/// Result of a windowed sum for a single window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct WindowSum {
    pub duration_window: DurationWindow,
    /// Totals across `by_user`
    pub stats: UsageStats,
    pub by_user: Vec<UserUsageStats>,
}

/// Field an event count can be grouped by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    /// `chatgptAccountId` inside the event details
    #[default]
    Account,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct GroupCount {
    /// Group value; `null` collects events lacking the field
    pub key: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct WindowGroupCounts {
    pub duration_window: DurationWindow,
    pub group_by: GroupField,
    pub counts: Vec<GroupCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UserInstancePair {
    pub user_id: Uuid,
    pub instance_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UserModelPair {
    pub user_id: Uuid,
    pub model: String,
}

/// Aggregate for one (user, instance) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct InstancePairUsage {
    pub user_id: Uuid,
    pub instance_id: Uuid,
    pub count: i64,
    pub sum_utf8_length: i64,
}

/// Aggregate for one (user, model) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct ModelPairUsage {
    pub user_id: Uuid,
    pub model: String,
    pub count: i64,
    pub sum_utf8_length: i64,
}

/// Escape `LIKE` wildcards so a model prefix matches literally.
/// Pair with `ESCAPE '\'`.
pub fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_window_seconds() {
        assert_eq!(DurationWindow::ThreeHours.seconds(), 10_800);
        assert_eq!(DurationWindow::TwentyFourHours.seconds(), 86_400);
        assert_eq!(DurationWindow::SevenDays.seconds(), 604_800);
        assert_eq!(DurationWindow::ThirtyDays.seconds(), 2_592_000);
    }

    #[test]
    fn test_duration_window_names() {
        for window in DurationWindow::ALL {
            let json = serde_json::to_string(&window).unwrap();
            assert_eq!(json, format!("\"{}\"", window.as_str()));
            assert_eq!(window.as_str().parse::<DurationWindow>().unwrap(), window);
        }
        assert!("1h".parse::<DurationWindow>().is_err());
        assert!(serde_json::from_str::<DurationWindow>("\"12h\"").is_err());
    }

    #[test]
    fn test_since_is_window_before_now() {
        let now = Utc::now();
        assert_eq!(
            (now - DurationWindow::ThreeHours.since(now)).num_seconds(),
            10_800
        );
    }

    #[test]
    fn test_usage_details_keys() {
        let details = UsageDetails {
            service_type: ServiceType::ChatgptShared,
            model: "gpt-4o".into(),
            chatgpt_account_id: Some("acct".into()),
            conversation_id: None,
        };
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["type"], "CHATGPT_SHARED");
        assert_eq!(value["chatgptAccountId"], "acct");
        assert!(value["conversationId"].is_null());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("gpt-4"), "gpt-4%");
        assert_eq!(escape_like("a_b%"), "a\\_b\\%%");
        assert_eq!(escape_like(""), "%");
    }
}
