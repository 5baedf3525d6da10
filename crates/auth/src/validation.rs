//! Request-body rules for the registration endpoint.
//!
//! Failures are reported as a list of field errors, one per broken rule, in
//! the `{value, msg, param, location}` shape clients already parse.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

const MAX_EMAIL_LEN: usize = 254;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub value: String,
    pub msg: String,
    pub param: String,
    pub location: String,
}

impl FieldError {
    /// Error for a field of the JSON request body.
    pub fn body(param: &str, value: Option<&str>, msg: &str) -> Self {
        Self {
            value: value.unwrap_or_default().to_string(),
            msg: msg.to_string(),
            param: param.to_string(),
            location: "body".to_string(),
        }
    }
}

pub fn validate_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

/// Validate a registration body. Fields are optional so that a missing field
/// is reported the same way as an invalid one.
pub fn validate_registration(
    name: Option<&str>,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if name.is_none_or(|n| n.trim().is_empty()) {
        errors.push(FieldError::body("name", name, "Name is required"));
    }
    if !email.is_some_and(validate_email) {
        errors.push(FieldError::body("email", email, "Please include a valid e-mail"));
    }
    if password.is_none_or(|p| p.chars().count() < MIN_PASSWORD_LEN) {
        // Never echo the password back.
        errors.push(FieldError::body(
            "password",
            None,
            "Password must be 6 or more characters",
        ));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
