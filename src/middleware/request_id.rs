//! Request ID middleware for request correlation.
//!
//! Generates or propagates a unique request ID for each request,
//! enabling distributed tracing and log correlation.

use axum::{
    body::Body,
    extract::Request,
    http::header::CONTENT_TYPE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use tracing::Instrument;
use uuid::Uuid;

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Extension containing the request ID for the current request.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a new request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing ID.
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Longest client-supplied request ID that is propagated as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Middleware that adds a request ID to each request.
///
/// A client-supplied X-Request-Id is kept when it is printable and short;
/// otherwise a new UUID is generated.
///
/// For error responses (4xx/5xx with JSON body), the request ID is also
/// injected into the `error.request_id` field for correlation with logs.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN)
        .map(|s| RequestId::from_string(s.to_string()))
        .unwrap_or_else(RequestId::new);

    req.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let response = next.run(req).instrument(span).await;
    let mut response = inject_request_id_into_error(response, &request_id).await;

    if let Ok(value) = request_id.0.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Inject request_id into JSON error responses.
///
/// For error responses (4xx/5xx status codes) with JSON content type,
/// this function parses the body and adds the request_id to the
/// `error.request_id` field if the response has an `error` object.
async fn inject_request_id_into_error(response: Response, request_id: &RequestId) -> Response {
    let status = response.status();

    // Only process error responses
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    // Check if content type is JSON
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if !is_json {
        return response;
    }

    // Extract parts and body
    let (parts, body) = response.into_parts();

    // Collect body bytes
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            // If we can't read the body, return an empty error response
            return (parts, Body::empty()).into_response();
        }
    };

    // Try to parse and modify the JSON
    let modified_bytes = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(mut json) => {
            // Inject request_id into error.request_id if error object exists
            if let Some(error) = json.get_mut("error").and_then(|e| e.as_object_mut()) {
                error.insert(
                    "request_id".to_string(),
                    serde_json::Value::String(request_id.0.clone()),
                );
            }
            // Serialize back to bytes
            serde_json::to_vec(&json).unwrap_or_else(|_| bytes.to_vec())
        }
        Err(_) => {
            // Not valid JSON, return original bytes
            bytes.to_vec()
        }
    };

    // Rebuild response with modified body
    Response::from_parts(parts, Body::from(modified_bytes))
}
