//! Field validation collecting one message per field.

use regex::Regex;
use std::collections::BTreeMap;

/// Accumulates validation failures keyed by field name.
///
/// The first failure recorded for a field wins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, key: &str, message: &str) {
        self.errors
            .entry(key.to_string())
            .or_insert_with(|| message.to_string());
    }

    pub fn check(&mut self, ok: bool, key: &str, message: &str) {
        if !ok {
            self.add_error(key, message);
        }
    }

    /// Consume the validator, returning the errors if any were recorded.
    ///
    /// # Errors
    /// Returns the field map when at least one check failed.
    pub fn finish(self) -> Result<(), BTreeMap<String, String>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Basic email format check.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(valid_email(email), "email", "must be a valid email address");
}

/// Length limits are in bytes; argon2 input above 72 bytes is rejected
/// to keep the hashing cost bounded.
pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        password.len() >= 8,
        "password",
        "must be at least 8 bytes long",
    );
    v.check(
        password.len() <= 72,
        "password",
        "must not be more than 72 bytes long",
    );
}

pub fn validate_name(v: &mut Validator, name: &str) {
    v.check(!name.trim().is_empty(), "name", "must be provided");
    v.check(
        name.len() <= 500,
        "name",
        "must not be more than 500 bytes long",
    );
}

/// Plaintext tokens are 32 random bytes, base64url without padding.
pub fn validate_token_plaintext(v: &mut Validator, token: &str) {
    v.check(!token.is_empty(), "token", "must be provided");
    v.check(
        crate::auth::tokens::is_well_formed(token),
        "token",
        "must be 43 bytes long",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("alice@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
        assert!(!valid_email("spaces in@example.com"));
    }

    #[test]
    fn first_error_per_field_wins() {
        let mut v = Validator::new();
        validate_email(&mut v, "");
        let errors = v.finish().err().unwrap_or_default();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("email").map(String::as_str), Some("must be provided"));
    }

    #[test]
    fn password_bounds() {
        let mut v = Validator::new();
        validate_password_plaintext(&mut v, "short");
        assert!(!v.valid());

        let mut v = Validator::new();
        validate_password_plaintext(&mut v, &"a".repeat(73));
        assert!(!v.valid());

        let mut v = Validator::new();
        validate_password_plaintext(&mut v, "pa55word");
        assert!(v.valid());
    }

    #[test]
    fn name_is_required() {
        let mut v = Validator::new();
        validate_name(&mut v, "   ");
        assert!(v.finish().is_err());

        let mut v = Validator::new();
        validate_name(&mut v, &"n".repeat(501));
        assert!(v.finish().is_err());
    }
}
