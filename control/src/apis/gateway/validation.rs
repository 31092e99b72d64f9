//! Input validation for routing objects
//!
//! A Route that fails any of these checks is skipped as a whole; translation
//! never emits config built from a malformed field.

use crate::error::ValidationError;
use regex::Regex;

/// Validate an HTTP path match value
///
/// Rules:
/// - Must not be empty
/// - Must start with "/"
/// - Must not contain "//"
pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::Path("path cannot be empty".to_string()));
    }

    if !path.starts_with('/') {
        return Err(ValidationError::Path(format!(
            "path '{}' must start with '/'",
            path
        )));
    }

    if path.contains("//") {
        return Err(ValidationError::Path(format!(
            "path '{}' cannot contain double slashes",
            path
        )));
    }

    Ok(())
}

/// Validate hostname according to DNS-1123 subdomain spec
///
/// Rules:
/// - Lowercase alphanumeric characters, hyphens, and dots only
/// - Must not start or end with hyphen
/// - Must not have double dots
/// - Can start with wildcard "*."
/// - Max length 253 characters
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    if hostname.is_empty() {
        return Err(ValidationError::Hostname(
            "hostname cannot be empty".to_string(),
        ));
    }

    if hostname.len() > 253 {
        return Err(ValidationError::Hostname(format!(
            "hostname '{}' exceeds 253 characters",
            hostname
        )));
    }

    let hostname_to_check = hostname.strip_prefix("*.").unwrap_or(hostname);

    if hostname_to_check.is_empty() {
        return Err(ValidationError::Hostname(
            "hostname cannot be just '*.'".to_string(),
        ));
    }

    if hostname_to_check.contains("..")
        || hostname_to_check.starts_with('.')
        || hostname_to_check.ends_with('.')
    {
        return Err(ValidationError::Hostname(format!(
            "hostname '{}' has an empty label",
            hostname
        )));
    }

    for label in hostname_to_check.split('.') {
        if label.len() > 63 {
            return Err(ValidationError::Hostname(format!(
                "hostname label '{}' exceeds 63 characters",
                label
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(ValidationError::Hostname(format!(
                "hostname label '{}' cannot start or end with '-'",
                label
            )));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '-')
        {
            return Err(ValidationError::Hostname(format!(
                "hostname '{}' contains invalid character '{}'",
                hostname, c
            )));
        }
    }

    Ok(())
}

/// Validate HTTP header name according to RFC 7230
///
/// Rules:
/// - Must be 1-256 characters
/// - Cannot contain ":" (no HTTP/2 pseudo-headers)
/// - Cannot contain whitespace or control characters
pub fn validate_header_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::HeaderName(
            "header name cannot be empty".to_string(),
        ));
    }

    if name.len() > 256 {
        return Err(ValidationError::HeaderName(format!(
            "header name '{}' exceeds 256 characters",
            name
        )));
    }

    if name.contains(':') {
        return Err(ValidationError::HeaderName(format!(
            "header name '{}' cannot contain ':'",
            name
        )));
    }

    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::HeaderName(format!(
            "header name '{}' contains whitespace or control characters",
            name
        )));
    }

    Ok(())
}

/// Validate a RegularExpression match value compiles
pub fn validate_regex(pattern: &str) -> Result<(), ValidationError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ValidationError::Regex(format!("'{}': {}", pattern, e)))
}
