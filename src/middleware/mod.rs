mod auth;
mod metrics;
mod request_id;

pub use auth::{access_token_auth_middleware, bearer_token, require_admin_middleware};
pub use metrics::http_metrics_middleware;
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
