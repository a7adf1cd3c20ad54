//! Password Hashing
//!
//! Argon2id with the crate's default parameters, stored as PHC strings.

use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use super::error::AuthError;

/// Hash a password into a PHC string.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "Password hashing failed");
            AuthError::PasswordHash
        })
}

/// Verify a password against a stored PHC string.
///
/// A mismatch is `Ok(false)`; only an unparseable hash is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        tracing::error!(error = %e, "Stored password hash is not a valid PHC string");
        AuthError::PasswordHash
    })?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => {
            tracing::error!(error = %e, "Password verification failed");
            Err(AuthError::PasswordHash)
        }
    }
}

/// Whether `value` already is an Argon2 PHC string.
pub fn is_password_hash(value: &str) -> bool {
    value.starts_with("$argon2") && PasswordHash::new(value).is_ok()
}

/// Spend the same work as a real verification when no account matched.
///
/// Keeps the response time of an unknown email close to a wrong password.
pub fn verify_against_absent_user(password: &str) {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

    let dummy = DUMMY_HASH.get_or_init(|| hash_password("authcenter-absent-user").ok());
    if let Some(hash) = dummy {
        let _ = verify_password(password, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("Correct-Horse-9").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Correct-Horse-9", &hash).unwrap());
        assert!(!verify_password("correct-horse-9", &hash).unwrap());
    }

    #[test]
    fn salts_differ_per_hash() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_is_an_error() {
        assert!(matches!(
            verify_password("x", "plaintext"),
            Err(AuthError::PasswordHash)
        ));
    }

    #[test]
    fn detects_phc_strings() {
        let hash = hash_password("pw").unwrap();
        assert!(is_password_hash(&hash));
        assert!(!is_password_hash("hunter2"));
        assert!(!is_password_hash("$argon2id$broken"));
    }
}
