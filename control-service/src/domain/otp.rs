//! # Email-OTP Attempt Evaluation
//!
//! The ordered checks of an OTP validation attempt, separated from storage
//! so the priority of failure codes and the attempt-increment rules can be
//! tested exhaustively.
//!
//! Failure priority (first hit wins):
//!
//! 1. `already_consumed`
//! 2. `expired`
//! 3. `max_attempts_exceeded` (lockout)
//! 4. `browser_token_mismatch` - checked **before** the code, so a phisher
//!    who stole the code but not the browser cookie learns nothing about
//!    the code's correctness
//! 5. `invalid_code`
//!
//! (`host_not_found` and `otp_not_found` are resolved by lookups before an
//! attempt reaches this evaluation.)
//!
//! Only *credential* failures count against the lockout budget: a wrong
//! browser token or a wrong code increments `attempts`; structural failures
//! (consumed, expired, already locked out) do not.

use crate::domain::entities::EmailOtp;
use crate::domain::events::{AuditEventType, Severity};
use chrono::{DateTime, Utc};

/// Terminal failure of an OTP validation attempt, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpFailure {
    HostNotFound,
    OtpNotFound,
    AlreadyConsumed,
    Expired,
    MaxAttemptsExceeded,
    BrowserTokenMismatch,
    InvalidCode,
}

impl OtpFailure {
    /// Wire error code returned to the worker.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::HostNotFound => "host_not_found",
            Self::OtpNotFound => "otp_not_found",
            Self::AlreadyConsumed => "already_consumed",
            Self::Expired => "expired",
            Self::MaxAttemptsExceeded => "max_attempts_exceeded",
            Self::BrowserTokenMismatch => "browser_token_mismatch",
            Self::InvalidCode => "invalid_code",
        }
    }

    /// Whether this failure consumes one attempt from the lockout budget.
    /// Only syntactically-valid-but-wrong credentials count.
    pub fn increments_attempts(&self) -> bool {
        matches!(self, Self::BrowserTokenMismatch | Self::InvalidCode)
    }

    /// Audit event and severity for this failure class.
    pub fn audit_event(&self) -> (AuditEventType, Severity) {
        match self {
            Self::Expired => (AuditEventType::EmailOtpExpired, Severity::Info),
            Self::MaxAttemptsExceeded => (AuditEventType::EmailOtpLockout, Severity::Warning),
            Self::BrowserTokenMismatch => {
                (AuditEventType::EmailOtpBrowserMismatch, Severity::Warning)
            }
            _ => (AuditEventType::EmailOtpFailed, Severity::Info),
        }
    }

    /// Human-readable reason recorded in the audit details.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::HostNotFound => "Host not found",
            Self::OtpNotFound => "OTP request not found",
            Self::AlreadyConsumed => "OTP already consumed",
            Self::Expired => "OTP expired",
            Self::MaxAttemptsExceeded => "Maximum attempts exceeded",
            Self::BrowserTokenMismatch => "Browser token mismatch - potential phishing attempt",
            Self::InvalidCode => "Invalid OTP code",
        }
    }
}

/// Evaluates one validation attempt against a locked OTP row.
///
/// `presented_otp_hash` and `presented_browser_token_hash` are the
/// `sha256:<hex>` values computed from the caller's input. Returns `Ok(())`
/// when the attempt succeeds and the row should be marked consumed.
pub fn evaluate_attempt(
    otp: &EmailOtp,
    presented_otp_hash: &str,
    presented_browser_token_hash: &str,
    now: DateTime<Utc>,
    max_attempts: i32,
) -> Result<(), OtpFailure> {
    if otp.consumed {
        return Err(OtpFailure::AlreadyConsumed);
    }
    if otp.expires_at < now {
        return Err(OtpFailure::Expired);
    }
    if otp.attempts >= max_attempts {
        return Err(OtpFailure::MaxAttemptsExceeded);
    }
    // Browser binding first: the code is never compared for a foreign browser
    if otp.browser_token_hash != presented_browser_token_hash {
        return Err(OtpFailure::BrowserTokenMismatch);
    }
    if otp.otp_hash != presented_otp_hash {
        return Err(OtpFailure::InvalidCode);
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    const MAX_ATTEMPTS: i32 = 5;

    fn otp(now: DateTime<Utc>) -> EmailOtp {
        EmailOtp {
            id: Uuid::new_v4(),
            otp_request_id: "otp_req_0123456789abcdef0123456789abcdef".into(),
            otp_hash: "sha256:code".into(),
            browser_token_hash: "sha256:browser".into(),
            email: "bob@ex.com".into(),
            user_id: Some(Uuid::new_v4()),
            host_id: Uuid::new_v4(),
            client_ip: None,
            user_agent: None,
            expires_at: now + Duration::seconds(300),
            attempts: 0,
            consumed: false,
            consumed_at: None,
            config_version: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_happy_path() {
        let now = Utc::now();
        let record = otp(now);
        assert_eq!(
            evaluate_attempt(&record, "sha256:code", "sha256:browser", now, MAX_ATTEMPTS),
            Ok(())
        );
    }

    #[test]
    fn test_consumed_beats_everything() {
        let now = Utc::now();
        let mut record = otp(now);
        record.consumed = true;
        record.expires_at = now - Duration::seconds(1);
        record.attempts = 99;
        let failure =
            evaluate_attempt(&record, "sha256:wrong", "sha256:wrong", now, MAX_ATTEMPTS)
                .unwrap_err();
        assert_eq!(failure, OtpFailure::AlreadyConsumed);
        assert!(!failure.increments_attempts());
    }

    #[test]
    fn test_expired_beats_lockout() {
        let now = Utc::now();
        let mut record = otp(now);
        record.expires_at = now - Duration::seconds(1);
        record.attempts = 99;
        assert_eq!(
            evaluate_attempt(&record, "sha256:code", "sha256:browser", now, MAX_ATTEMPTS),
            Err(OtpFailure::Expired)
        );
    }

    #[test]
    fn test_lockout_blocks_even_correct_credentials() {
        let now = Utc::now();
        let mut record = otp(now);
        record.attempts = MAX_ATTEMPTS;
        let failure =
            evaluate_attempt(&record, "sha256:code", "sha256:browser", now, MAX_ATTEMPTS)
                .unwrap_err();
        assert_eq!(failure, OtpFailure::MaxAttemptsExceeded);
        assert!(!failure.increments_attempts());
        assert_eq!(
            failure.audit_event(),
            (AuditEventType::EmailOtpLockout, Severity::Warning)
        );
    }

    #[test]
    fn test_browser_mismatch_checked_before_code() {
        let now = Utc::now();
        let record = otp(now);
        // Correct code, wrong browser: must fail on the browser binding
        let failure =
            evaluate_attempt(&record, "sha256:code", "sha256:other", now, MAX_ATTEMPTS)
                .unwrap_err();
        assert_eq!(failure, OtpFailure::BrowserTokenMismatch);
        assert!(failure.increments_attempts());
        assert_eq!(
            failure.audit_event(),
            (AuditEventType::EmailOtpBrowserMismatch, Severity::Warning)
        );
    }

    #[test]
    fn test_invalid_code_increments_attempts() {
        let now = Utc::now();
        let record = otp(now);
        let failure =
            evaluate_attempt(&record, "sha256:wrong", "sha256:browser", now, MAX_ATTEMPTS)
                .unwrap_err();
        assert_eq!(failure, OtpFailure::InvalidCode);
        assert!(failure.increments_attempts());
        assert_eq!(failure.audit_event(), (AuditEventType::EmailOtpFailed, Severity::Info));
    }

    #[test]
    fn test_error_codes_match_wire_contract() {
        assert_eq!(OtpFailure::HostNotFound.error_code(), "host_not_found");
        assert_eq!(OtpFailure::OtpNotFound.error_code(), "otp_not_found");
        assert_eq!(OtpFailure::AlreadyConsumed.error_code(), "already_consumed");
        assert_eq!(OtpFailure::Expired.error_code(), "expired");
        assert_eq!(OtpFailure::MaxAttemptsExceeded.error_code(), "max_attempts_exceeded");
        assert_eq!(OtpFailure::BrowserTokenMismatch.error_code(), "browser_token_mismatch");
        assert_eq!(OtpFailure::InvalidCode.error_code(), "invalid_code");
    }

    #[test]
    fn test_last_allowed_attempt_still_evaluated() {
        let now = Utc::now();
        let mut record = otp(now);
        record.attempts = MAX_ATTEMPTS - 1;
        // One attempt left: correct credentials still succeed
        assert!(
            evaluate_attempt(&record, "sha256:code", "sha256:browser", now, MAX_ATTEMPTS).is_ok()
        );
    }
}
