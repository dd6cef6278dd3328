use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Prefix of dashboard access tokens
pub const ACCESS_TOKEN_PREFIX: &str = "sg_";

/// Prefix of per-instance tokens presented by instance proxies
pub const INSTANCE_TOKEN_PREFIX: &str = "sgi_";

/// Number of leading characters kept in clear for display.
pub const DISPLAY_PREFIX_LEN: usize = 10;

/// Generate a new token with the given prefix.
///
/// Returns `(raw_token, token_hash)`. The raw token is shown once; only the
/// SHA-256 hash is stored.
pub fn generate_token_with_prefix(prefix: &str) -> (String, String) {
    let mut rng = rand::thread_rng();
    let mut random_bytes = [0u8; 32];
    rng.fill(&mut random_bytes);

    let random_part = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
    let raw = format!("{}{}", prefix, random_part);
    let hash = hash_token(&raw);

    (raw, hash)
}

/// Hex-encoded SHA-256 of a raw token
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time prefix check.
pub fn has_valid_prefix(token: &str, expected_prefix: &str) -> bool {
    if token.len() < expected_prefix.len() || !token.is_char_boundary(expected_prefix.len()) {
        return false;
    }
    token.as_bytes()[..expected_prefix.len()]
        .ct_eq(expected_prefix.as_bytes())
        .into()
}

/// The displayable head of a token (e.g. `sg_AbC1234`).
pub fn display_prefix(raw: &str) -> String {
    raw.chars().take(DISPLAY_PREFIX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_format() {
        let (raw, hash) = generate_token_with_prefix(ACCESS_TOKEN_PREFIX);
        assert!(raw.starts_with(ACCESS_TOKEN_PREFIX));
        // 32 bytes in unpadded base64 is 43 characters
        assert_eq!(raw.len(), ACCESS_TOKEN_PREFIX.len() + 43);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique() {
        let (a, ha) = generate_token_with_prefix(INSTANCE_TOKEN_PREFIX);
        let (b, hb) = generate_token_with_prefix(INSTANCE_TOKEN_PREFIX);
        assert_ne!(a, b);
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_has_valid_prefix() {
        assert!(has_valid_prefix("sg_abc", ACCESS_TOKEN_PREFIX));
        assert!(has_valid_prefix("sgi_abc", INSTANCE_TOKEN_PREFIX));
        assert!(!has_valid_prefix("sgi_abc", ACCESS_TOKEN_PREFIX));
        assert!(!has_valid_prefix("sg", ACCESS_TOKEN_PREFIX));
        assert!(!has_valid_prefix("", ACCESS_TOKEN_PREFIX));
        assert!(!has_valid_prefix("é_x", "sg_"));
    }

    #[test]
    fn test_display_prefix() {
        assert_eq!(display_prefix("sg_0123456789abcdef"), "sg_0123456");
        assert_eq!(display_prefix("short"), "short");
    }
}
