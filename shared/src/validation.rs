//! # Request Validation Helpers
//!
//! Utilities for validating incoming request data using the `validator`
//! crate, plus the line-separated list format used throughout the host
//! configuration (`allowed_cidrs`, URL pattern lists).
//!
//! ## How Validation Works
//!
//! We use the [`validator`](https://docs.rs/validator/) crate which provides
//! derive macros for declarative validation:
//!
//! ```rust,ignore
//! use validator::Validate;
//!
//! #[derive(Validate)]
//! struct CreateHost {
//!     #[validate(custom(function = "validators::valid_domain"))]
//!     domain: String,
//!
//!     #[validate(url)]
//!     backend_url: String,
//!
//!     #[validate(custom(function = "validators::valid_cidr_list"))]
//!     allowed_cidrs: String,
//! }
//! ```
//!
//! When validation fails the API returns 400 with field-level details (see
//! [`crate::errors::ApiError::ValidationError`]).
//!
//! ## Line-Separated Lists
//!
//! CIDR blocks and URL patterns are stored as text, one value per line,
//! with `#` starting a comment (full-line or inline):
//!
//! ```text
//! 10.0.0.0/8        # office VPN
//! 192.168.1.25      # build server
//! # temporarily disabled:
//! # 203.0.113.0/24
//! ```

use crate::errors::ApiError;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use validator::{Validate, ValidationError};

// =============================================================================
// Core Validation Functions
// =============================================================================

/// Validates a request DTO that implements `Validate`.
///
/// Returns `ApiError::ValidationError` (400) on failure, carrying the
/// field-level errors.
pub fn validate_request<T: Validate>(data: &T) -> Result<(), ApiError> {
    data.validate().map_err(ApiError::from)
}

// =============================================================================
// Line-Separated Lists
// =============================================================================

/// Parses a line-separated field with comment support.
///
/// Format:
/// - One value per line
/// - Lines starting with `#` are ignored (comments)
/// - `#` can be used for inline comments
pub fn parse_line_separated(field_value: &str) -> Vec<String> {
    field_value
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            // Remove inline comments
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                None
            } else {
                Some(line.to_string())
            }
        })
        .collect()
}

/// Checks whether `client_ip` matches any entry of a parsed allow-list.
///
/// Entries may be plain IP addresses (`192.168.1.25`) or CIDR blocks
/// (`10.0.0.0/8`). Unparseable entries never match.
pub fn ip_in_list(client_ip: IpAddr, entries: &[String]) -> bool {
    entries.iter().any(|entry| {
        if let Ok(addr) = entry.parse::<IpAddr>() {
            return addr == client_ip;
        }
        if let Ok(network) = entry.parse::<IpNetwork>() {
            return network.contains(client_ip);
        }
        false
    })
}

// =============================================================================
// Custom Validators
// =============================================================================

/// Custom validation functions for use with `#[validate(custom(...))]`.
pub mod validators {
    use super::*;

    /// String must not be empty after trimming.
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("not_blank"));
        }
        Ok(())
    }

    /// Domain name: lowercase labels of letters, digits and hyphens,
    /// separated by dots. Deliberately permissive (no TLD list); the goal is
    /// to catch URLs and whitespace, not to fully validate DNS.
    pub fn valid_domain(value: &str) -> Result<(), ValidationError> {
        let ok = !value.is_empty()
            && value.len() <= 253
            && !value.starts_with('.')
            && !value.ends_with('.')
            && value.split('.').all(|label| {
                !label.is_empty()
                    && label.len() <= 63
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            });
        if ok {
            Ok(())
        } else {
            Err(ValidationError::new("valid_domain"))
        }
    }

    /// Every non-comment line must parse as an IP address or CIDR block.
    pub fn valid_cidr_list(value: &str) -> Result<(), ValidationError> {
        for entry in parse_line_separated(value) {
            let is_ip = entry.parse::<IpAddr>().is_ok();
            let is_net = entry.parse::<IpNetwork>().is_ok();
            if !is_ip && !is_net {
                let mut err = ValidationError::new("valid_cidr_list");
                err.message = Some(format!("invalid IP or CIDR: {entry}").into());
                return Err(err);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_separated_skips_comments_and_blanks() {
        let raw = "10.0.0.0/8  # office VPN\n\n# disabled\n192.168.1.25\n   \n";
        let parsed = parse_line_separated(raw);
        assert_eq!(parsed, vec!["10.0.0.0/8", "192.168.1.25"]);
    }

    #[test]
    fn test_parse_line_separated_empty_input() {
        assert!(parse_line_separated("").is_empty());
        assert!(parse_line_separated("# only a comment").is_empty());
    }

    #[test]
    fn test_ip_in_list_exact_match() {
        let entries = vec!["192.168.1.25".to_string()];
        assert!(ip_in_list("192.168.1.25".parse().unwrap(), &entries));
        assert!(!ip_in_list("192.168.1.26".parse().unwrap(), &entries));
    }

    #[test]
    fn test_ip_in_list_cidr_match() {
        let entries = vec!["10.0.0.0/8".to_string()];
        assert!(ip_in_list("10.20.30.40".parse().unwrap(), &entries));
        assert!(!ip_in_list("11.0.0.1".parse().unwrap(), &entries));
    }

    #[test]
    fn test_ip_in_list_ignores_garbage_entries() {
        let entries = vec!["not-an-ip".to_string(), "10.0.0.1".to_string()];
        assert!(ip_in_list("10.0.0.1".parse().unwrap(), &entries));
        assert!(!ip_in_list("10.0.0.2".parse().unwrap(), &entries));
    }

    #[test]
    fn test_valid_domain_accepts_normal_domains() {
        assert!(validators::valid_domain("app.example.com").is_ok());
        assert!(validators::valid_domain("a-b.example.io").is_ok());
    }

    #[test]
    fn test_valid_domain_rejects_urls_and_uppercase() {
        assert!(validators::valid_domain("https://app.example.com").is_err());
        assert!(validators::valid_domain("App.Example.Com").is_err());
        assert!(validators::valid_domain("").is_err());
        assert!(validators::valid_domain(".example.com").is_err());
    }

    #[test]
    fn test_valid_cidr_list() {
        assert!(validators::valid_cidr_list("10.0.0.0/8\n192.168.1.1 # host").is_ok());
        assert!(validators::valid_cidr_list("10.0.0.0/8\nbogus").is_err());
        // Comments alone are fine
        assert!(validators::valid_cidr_list("# nothing yet").is_ok());
    }

    #[test]
    fn test_not_blank() {
        assert!(validators::not_blank("x").is_ok());
        assert!(validators::not_blank("   ").is_err());
    }
}
