use uuid::Uuid;

pub use crate::db::decode::{parse_role, parse_service_type};
use crate::db::error::{DbError, DbResult};

/// SQLite caps bound parameters per statement; IN lists are chunked below this.
pub const MAX_IN_PARAMS: usize = 500;

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Corrupt(format!("invalid UUID '{s}': {e}")))
}

/// `?, ?, ?` for an IN list of `n` items.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
