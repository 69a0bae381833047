use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::FieldErrors;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!("hash password: {e}")
        })?
        .to_string();
    Ok(hash)
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unparsable.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!("parse password hash: {e}")
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Length and confirmation rules for a new password, reported on `field`.
pub fn check_policy(
    field: &'static str,
    password: Option<&str>,
    confirmation: Option<&str>,
) -> FieldErrors {
    let mut errors = FieldErrors::new();
    match password {
        None | Some("") => errors.add(field, format!("The {field} field is required.")),
        Some(p) => {
            if p.chars().count() < MIN_PASSWORD_LEN {
                errors.add(
                    field,
                    format!("The {field} field must be at least {MIN_PASSWORD_LEN} characters."),
                );
            }
            if confirmation != Some(p) {
                errors.add(field, format!("The {field} field confirmation does not match."));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("longpass1").expect("hashing should succeed");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("longpass1", &hash).expect("verify should succeed"));
        assert!(!verify_password("longpass2", &hash).expect("verify should not error"));
    }

    #[test]
    fn same_password_hashes_differently() {
        let a = hash_password("longpass1").unwrap();
        let b = hash_password("longpass1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        assert!(verify_password("anything", "not-a-valid-hash").is_err());
    }

    #[test]
    fn policy_accepts_long_confirmed_password() {
        assert!(check_policy("password", Some("longpass1"), Some("longpass1")).is_empty());
    }

    #[test]
    fn policy_rejects_short_password() {
        let errors = check_policy("password", Some("short"), Some("short"));
        assert_eq!(errors.get("password").unwrap().len(), 1);
        assert!(errors.get("password").unwrap()[0].contains("at least 8"));
    }

    #[test]
    fn policy_rejects_mismatched_confirmation() {
        let errors = check_policy("password", Some("longpass1"), Some("longpass2"));
        assert!(errors.get("password").unwrap()[0].contains("confirmation"));

        let errors = check_policy("password", Some("longpass1"), None);
        assert!(!errors.is_empty());
    }

    #[test]
    fn policy_requires_a_password() {
        let errors = check_policy("password", None, None);
        assert_eq!(
            errors.get("password").unwrap(),
            &["The password field is required.".to_string()][..]
        );
    }
}
