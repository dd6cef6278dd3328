//! Audit callbacks from instance proxies, appended to the usage log.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::{TokenService, UsageService};
use crate::{
    config::IngestionConfig,
    db::{DbError, DbPool},
    models::{NewUsageEvent, UsageDetails, UsageEvent},
    observability::metrics,
};

#[derive(Debug, Error)]
pub enum IngestError {
    /// No bearer token, or no instance id in the path
    #[error("invalid audit request")]
    BadRequest,

    #[error("invalid token")]
    InvalidToken,

    #[error("Invalid JSON body")]
    InvalidBody(#[source] serde_json::Error),

    #[error("Internal server error")]
    Internal(#[from] DbError),
}

/// Completion request body forwarded by the proxy. Only `action` and `model`
/// are required.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    pub action: String,
    pub model: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<CompletionMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub author: Option<Value>,
    pub content: MessageContent,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageContent {
    pub content_type: String,
    /// Strings are prompt text; anything else (attachments) is skipped.
    pub parts: Vec<Value>,
}

impl CompletionRequest {
    /// Prompt text of the request: the string parts of the first message,
    /// concatenated. Continuations carry no new prompt.
    pub fn prompt_text(&self) -> String {
        if self.action == "continue" {
            return String::new();
        }
        let Some(first) = self.messages.as_deref().and_then(<[_]>::first) else {
            return String::new();
        };
        first
            .content
            .parts
            .iter()
            .filter_map(Value::as_str)
            .collect()
    }
}

/// The longest prefix of `text` that fits in `max_bytes` without splitting a
/// character.
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[derive(Clone)]
pub struct IngestionService {
    db: Arc<DbPool>,
    tokens: TokenService,
    usage: UsageService,
    config: IngestionConfig,
}

impl IngestionService {
    pub fn new(
        db: Arc<DbPool>,
        tokens: TokenService,
        usage: UsageService,
        config: IngestionConfig,
    ) -> Self {
        Self {
            db,
            tokens,
            usage,
            config,
        }
    }

    /// Authenticate a callback and append its usage event.
    ///
    /// The token is checked before the body is parsed, so an unauthenticated
    /// caller never learns whether its payload was well formed.
    pub async fn ingest(
        &self,
        instance_id: &str,
        bearer: Option<&str>,
        account_id: Option<String>,
        body: &[u8],
    ) -> Result<UsageEvent, IngestError> {
        let instance_id = instance_id.trim();
        let bearer = bearer.map(str::trim).filter(|t| !t.is_empty());
        let Some(bearer) = bearer else {
            return Err(IngestError::BadRequest);
        };
        if instance_id.is_empty() {
            return Err(IngestError::BadRequest);
        }

        // A malformed id cannot match any token.
        let instance_id = Uuid::parse_str(instance_id).map_err(|_| IngestError::InvalidToken)?;
        let token = self
            .tokens
            .authenticate_instance(instance_id, bearer)
            .await?
            .ok_or(IngestError::InvalidToken)?;
        let instance = self
            .db
            .instances()
            .get_by_id(instance_id)
            .await?
            .ok_or(IngestError::InvalidToken)?;

        let request: CompletionRequest =
            serde_json::from_slice(body).map_err(IngestError::InvalidBody)?;
        let text = request.prompt_text();
        let byte_length = text.len() as i64;

        let stored_text = self
            .config
            .store_text
            .then(|| truncate_utf8(&text, self.config.max_text_bytes).to_string());

        let event = self
            .usage
            .record(NewUsageEvent {
                user_id: token.user_id,
                instance_id,
                service_type: instance.service_type,
                timestamp: Utc::now(),
                model: request.model.clone(),
                byte_length,
                text: stored_text,
                details: UsageDetails {
                    service_type: instance.service_type,
                    model: request.model,
                    chatgpt_account_id: account_id,
                    conversation_id: request.conversation_id,
                },
            })
            .await?;

        metrics::record_ingested_event(
            event.service_type.as_str(),
            &event.model,
            event.byte_length as u64,
        );
        tracing::debug!(
            event_id = %event.id,
            user_id = %event.user_id,
            instance_id = %event.instance_id,
            byte_length = event.byte_length,
            "Usage event recorded"
        );

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn parse(value: Value) -> CompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_prompt_text_joins_string_parts() {
        let request = parse(json!({
            "action": "next",
            "model": "gpt-4o",
            "messages": [
                {"content": {"content_type": "multimodal_text", "parts": ["héllo ", {"asset": 1}, "world"]}},
                {"content": {"content_type": "text", "parts": ["ignored"]}}
            ]
        }));
        assert_eq!(request.prompt_text(), "héllo world");
        assert_eq!(request.prompt_text().len(), 12);
    }

    #[rstest]
    #[case::continuation(json!({"action": "continue", "model": "gpt-4o", "messages": [{"content": {"content_type": "text", "parts": ["x"]}}]}))]
    #[case::no_messages(json!({"action": "next", "model": "gpt-4o"}))]
    #[case::empty_messages(json!({"action": "next", "model": "gpt-4o", "messages": []}))]
    fn test_prompt_text_empty(#[case] body: Value) {
        assert_eq!(parse(body).prompt_text(), "");
    }

    #[rstest]
    #[case::missing_model(json!({"action": "next"}))]
    #[case::missing_content(json!({"action": "next", "model": "m", "messages": [{"id": "1"}]}))]
    #[case::model_not_string(json!({"action": "next", "model": 4}))]
    fn test_schema_mismatch_rejected(#[case] body: Value) {
        assert!(serde_json::from_value::<CompletionRequest>(body).is_err());
    }

    #[test]
    fn test_truncate_utf8_respects_char_boundary() {
        assert_eq!(truncate_utf8("abc", 10), "abc");
        assert_eq!(truncate_utf8("abc", 2), "ab");
        // "é" is two bytes
        assert_eq!(truncate_utf8("aé", 2), "a");
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod db_tests {
    use super::*;
    use crate::{
        db::tests::harness::create_sqlite_db,
        models::{CreateInstance, CreateUser, Role, ServiceType},
    };

    struct Fixture {
        service: IngestionService,
        db: Arc<DbPool>,
        instance_id: Uuid,
        token: String,
    }

    async fn fixture(store_text: bool) -> Fixture {
        let db = Arc::new(create_sqlite_db().await);
        let user = db
            .users()
            .create(CreateUser {
                username: "amy".into(),
                name: "Amy".into(),
                email: None,
                role: Role::User,
                comment: None,
            })
            .await
            .unwrap();
        let instance = db
            .instances()
            .create(CreateInstance {
                name: "car-1".into(),
                service_type: ServiceType::ChatgptShared,
                url: "https://chat.example.com".into(),
            })
            .await
            .unwrap();
        db.abilities()
            .set_can_use(user.id, &[instance.id], true)
            .await
            .unwrap();

        let tokens = TokenService::new(db.clone());
        let issued = tokens.issue_instance_token(user.id, instance.id).await.unwrap();
        let service = IngestionService::new(
            db.clone(),
            tokens,
            UsageService::new(db.clone()),
            IngestionConfig {
                store_text,
                max_text_bytes: 4,
                ..Default::default()
            },
        );

        Fixture {
            service,
            db,
            instance_id: instance.id,
            token: issued.token,
        }
    }

    const BODY: &[u8] =
        br#"{"action":"next","model":"gpt-4o","conversation_id":"c1","messages":[{"content":{"content_type":"text","parts":["hello"]}}]}"#;

    #[tokio::test]
    async fn test_ingest_records_event() {
        let f = fixture(false).await;
        let event = f
            .service
            .ingest(
                &f.instance_id.to_string(),
                Some(&f.token),
                Some("acct-1".into()),
                BODY,
            )
            .await
            .unwrap();

        assert_eq!(event.byte_length, 5);
        assert_eq!(event.model, "gpt-4o");
        assert!(event.text.is_none());
        assert_eq!(event.details["chatgptAccountId"], "acct-1");
        assert_eq!(event.details["conversationId"], "c1");
        assert_eq!(event.details["type"], "CHATGPT_SHARED");
    }

    #[tokio::test]
    async fn test_ingest_stores_truncated_text() {
        let f = fixture(true).await;
        let event = f
            .service
            .ingest(&f.instance_id.to_string(), Some(&f.token), None, BODY)
            .await
            .unwrap();
        assert_eq!(event.byte_length, 5);
        assert_eq!(event.text.as_deref(), Some("hell"));
    }

    #[tokio::test]
    async fn test_ingest_continue_has_zero_length() {
        let f = fixture(false).await;
        let body = br#"{"action":"continue","model":"gpt-4o","messages":[{"content":{"content_type":"text","parts":["more"]}}]}"#;
        let event = f
            .service
            .ingest(&f.instance_id.to_string(), Some(&f.token), None, body)
            .await
            .unwrap();
        assert_eq!(event.byte_length, 0);
    }

    #[tokio::test]
    async fn test_ingest_errors() {
        let f = fixture(false).await;
        let id = f.instance_id.to_string();

        assert!(matches!(
            f.service.ingest(&id, None, None, BODY).await,
            Err(IngestError::BadRequest)
        ));
        assert!(matches!(
            f.service.ingest("  ", Some(&f.token), None, BODY).await,
            Err(IngestError::BadRequest)
        ));
        assert!(matches!(
            f.service.ingest(&id, Some("sgi_unknown"), None, BODY).await,
            Err(IngestError::InvalidToken)
        ));
        assert!(matches!(
            f.service
                .ingest(&Uuid::new_v4().to_string(), Some(&f.token), None, BODY)
                .await,
            Err(IngestError::InvalidToken)
        ));
        assert!(matches!(
            f.service.ingest(&id, Some(&f.token), None, b"{not json").await,
            Err(IngestError::InvalidBody(_))
        ));

        let page = f
            .db
            .usage_events()
            .list(&Default::default(), crate::models::PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }
}
