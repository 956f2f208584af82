//! Input validation utilities.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Validate email format
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email_regex = Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .map_err(|_| ValidationError::new("Invalid email regex"))?;

    if email.len() > 255 {
        return Err(ValidationError::new("Email too long"));
    }

    if !email_regex.is_match(email) {
        return Err(ValidationError::new("Invalid email format"));
    }

    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < 8 {
        return Err(ValidationError::new(
            "Password must be at least 8 characters long",
        ));
    }

    if password.len() > 128 {
        return Err(ValidationError::new(
            "Password must be less than 128 characters long",
        ));
    }

    Ok(())
}

/// Phone numbers may contain separators but must carry 8 to 15 digits.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let allowed = |c: char| c.is_ascii_digit() || " +-().".contains(c);
    if !phone.chars().all(allowed) {
        return Err(ValidationError::new("Invalid phone number format"));
    }

    let digits = phone.chars().filter(char::is_ascii_digit).count();
    if !(8..=15).contains(&digits) {
        return Err(ValidationError::new("Invalid phone number format"));
    }

    Ok(())
}

/// Required person or company name
pub fn validate_name(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError(format!("{field} is required")));
    }

    if value.chars().count() > 100 {
        return Err(ValidationError(format!(
            "{field} must be less than 100 characters long"
        )));
    }

    if value.chars().any(|c| matches!(c, '\n' | '\r' | '\t' | '\0')) {
        return Err(ValidationError(format!("{field} contains invalid characters")));
    }

    Ok(())
}

/// Validate URL format
pub fn validate_url(url: &str) -> Result<(), ValidationError> {
    if url.is_empty() {
        return Ok(());
    }

    if url.len() > 2048 {
        return Err(ValidationError::new("URL too long"));
    }

    let url_regex = Regex::new(r"^https?://[^\s/$.?#].[^\s]*$")
        .map_err(|_| ValidationError::new("Invalid URL regex"))?;

    if !url_regex.is_match(url) {
        return Err(ValidationError::new("Invalid URL format"));
    }

    Ok(())
}
