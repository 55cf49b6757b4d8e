use chrono::Utc;
use rand::RngCore;

use crate::constants::{
    MAX_USERNAME_LEN, MIN_USERNAME_LEN, PASSWORD_HASH_LEN, TOKEN_BYTES,
};
use crate::error::ValidationError;

/// Fold a username to its canonical (lowercase) form.
///
/// Every map keyed by username uses this form; comparisons never look at the
/// display casing.
pub fn fold_username(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Check the registration rules for a username: 3-20 chars of
/// `[A-Za-z0-9_-]`.
pub fn validate_username(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(ValidationError::Username(format!(
            "must be {MIN_USERNAME_LEN}-{MAX_USERNAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::Username(
            "only letters, digits, '_' and '-' are allowed".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(ValidationError::Email),
    }
}

/// Passwords arrive already hashed by the client (32 hex chars).
pub fn validate_password_hash(hash: &str) -> Result<(), ValidationError> {
    if hash.len() != PASSWORD_HASH_LEN || hex::decode(hash).is_err() {
        return Err(ValidationError::PasswordHash(PASSWORD_HASH_LEN));
    }
    Ok(())
}

/// Generate an opaque bearer token (hex-encoded random bytes).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time in whole seconds since the Unix epoch.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Reject anything that could escape a directory when used as a single
/// path component.
pub fn validate_path_component(component: &str) -> Result<(), ValidationError> {
    if component.is_empty()
        || component == "."
        || component.contains("..")
        || component.contains('/')
        || component.contains('\\')
        || component.contains('\0')
    {
        return Err(ValidationError::PathComponent(component.to_string()));
    }
    Ok(())
}

/// Count characters the way content limits are expressed (Unicode scalars).
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_username() {
        assert_eq!(fold_username("  Alice "), "alice");
        assert_eq!(fold_username("BOB"), fold_username("bob"));
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice_01").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"x".repeat(21)).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@b.c").is_ok());
        assert!(validate_email("nope").is_err());
        assert!(validate_email("@b").is_err());
        assert!(validate_email("a@b@c").is_err());
    }

    #[test]
    fn test_password_hash() {
        assert!(validate_password_hash(&"ab".repeat(16)).is_ok());
        assert!(validate_password_hash("abcd").is_err());
        assert!(validate_password_hash(&"zz".repeat(16)).is_err());
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_component() {
        assert!(validate_path_component("alice").is_ok());
        assert!(validate_path_component("../etc").is_err());
        assert!(validate_path_component("a/b").is_err());
        assert!(validate_path_component("").is_err());
    }
}
