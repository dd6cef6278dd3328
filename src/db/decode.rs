//! Decoding of enum columns shared by both backends.

use crate::{
    db::error::{DbError, DbResult},
    models::{Role, ServiceType},
};

pub fn parse_role(s: &str) -> DbResult<Role> {
    Role::from_str(s).ok_or_else(|| DbError::Corrupt(format!("unknown role '{s}'")))
}

pub fn parse_service_type(s: &str) -> DbResult<ServiceType> {
    ServiceType::from_str(s).ok_or_else(|| DbError::Corrupt(format!("unknown service type '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stored_enums() {
        assert_eq!(parse_role("admin").unwrap(), Role::Admin);
        assert!(parse_role("root").is_err());
        assert_eq!(
            parse_service_type("POEKMON_SHARED").unwrap(),
            ServiceType::PoekmonShared
        );
        assert!(parse_service_type("chatgpt_shared").is_err());
    }
}
