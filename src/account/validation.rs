use lazy_static::lazy_static;
use regex::Regex;

use crate::error::FieldErrors;

pub const MAX_FIELD_LEN: usize = 255;

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trimmed display name, or an error recorded under `name`.
pub fn check_name(errors: &mut FieldErrors, raw: Option<&str>) -> Option<String> {
    let name = raw.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        errors.add("name", "The name field is required.");
        return None;
    }
    if name.chars().count() > MAX_FIELD_LEN {
        errors.add("name", "The name field must not be greater than 255 characters.");
        return None;
    }
    Some(name.to_string())
}

/// Normalized email, or an error recorded under `email`.
pub fn check_email(errors: &mut FieldErrors, raw: Option<&str>) -> Option<String> {
    let email = raw.map(normalize_email).unwrap_or_default();
    if email.is_empty() {
        errors.add("email", "The email field is required.");
        return None;
    }
    if email.chars().count() > MAX_FIELD_LEN {
        errors.add("email", "The email field must not be greater than 255 characters.");
        return None;
    }
    if !is_valid_email(&email) {
        errors.add("email", "The email field must be a valid email address.");
        return None;
    }
    Some(email)
}
