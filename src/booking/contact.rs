//! Validation of contact details typed into the chat.

use std::sync::LazyLock;

use regex::Regex;

/// Optional country prefix followed by exactly ten ASCII digits.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\+7|8|7)?([0-9]{10})$").expect("valid phone regex"));

/// Separators people type inside phone numbers.
static PHONE_SEPARATORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-()]").expect("valid separator regex"));

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// Why a typed contact value was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactError {
    #[error("invalid phone number")]
    InvalidPhone,
    #[error("invalid email address")]
    InvalidEmail,
}

/// Normalize a phone number to `7XXXXXXXXXX`.
///
/// Accepts `+7`, `8`, `7` or no prefix, with spaces, dashes and parentheses.
pub fn normalize_phone(input: &str) -> Result<String, ContactError> {
    let compact = PHONE_SEPARATORS_RE.replace_all(input.trim(), "");
    let caps = PHONE_RE
        .captures(&compact)
        .ok_or(ContactError::InvalidPhone)?;
    Ok(format!("7{}", &caps[2]))
}

/// Check the `local@domain.tld` shape and return the trimmed address.
pub fn validate_email(input: &str) -> Result<String, ContactError> {
    let trimmed = input.trim();
    if EMAIL_RE.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(ContactError::InvalidEmail)
    }
}
