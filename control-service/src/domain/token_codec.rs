//! # Token Generation & Hashing
//!
//! Centralized generation and hashing of every secret the control plane
//! mints. Hashes are stored with an algorithm prefix (`sha512:`/`sha256:`)
//! so a future algorithm migration can coexist with old rows.
//!
//! | Secret | Shape | Stored as |
//! |--------|-------|-----------|
//! | Setup token | 9 dash-separated groups of 5 alphanumerics (~268 bits) | `sha512:<hex>` |
//! | Email OTP | `AAAA-BBBB` from a 32-char alphabet (~40 bits) | `sha256:<hex>` of normalized code |
//! | Browser token | `srbt_` + 32 hex chars (128 bits) | `sha256:<hex>` (hash computed by worker) |
//! | OTP request id | `otp_req_` + 32 hex chars | plain (not a secret) |
//! | API key | 43 URL-safe chars (~256 bits) | plain (worker needs it verbatim) |
//! | Webhook token | 32 alphanumerics | plain (worker needs it verbatim) |
//!
//! The OTP alphabet excludes visually confusable characters (0/O, I/L/1) so
//! codes survive being read over the phone; setup tokens are grouped in
//! fives for the same reason.

use rand::Rng;
use sha2::{Digest, Sha256, Sha512};

/// Character set for email OTP codes. 32 characters, no 0/O/I/L/1.
pub const OTP_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Character set for setup tokens and webhook tokens.
const ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// URL-safe character set for API keys (matches `secrets.token_urlsafe`).
const URL_SAFE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut buf = vec![0u8; bytes];
    rng.fill(buf.as_mut_slice());
    hex::encode(buf)
}

// =============================================================================
// Setup tokens
// =============================================================================

/// Generates a setup token: 45 alphanumerics in dash-separated groups of 5
/// for dictation (`XXXXX-XXXXX-…`, 9 groups, ~268 bits of entropy).
pub fn generate_setup_token() -> String {
    let raw = random_string(ALNUM, 45);
    raw.as_bytes()
        .chunks(5)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("-")
}

/// SHA-512 with storage prefix. Setup tokens are hashed over the formatted
/// value exactly as displayed (dashes included); workers do the same.
pub fn sha512_hex(value: &str) -> String {
    let digest = Sha512::digest(value.as_bytes());
    format!("sha512:{}", hex::encode(digest))
}

// =============================================================================
// Email OTPs
// =============================================================================

/// Generates an 8-character OTP code formatted `AAAA-BBBB`.
pub fn generate_otp_code() -> String {
    let raw = random_string(OTP_ALPHABET, 8);
    format!("{}-{}", &raw[..4], &raw[4..])
}

/// Normalizes an OTP code for hashing: strips dashes and spaces, uppercases.
pub fn normalize_otp_code(code: &str) -> String {
    code.replace(['-', ' '], "").to_uppercase()
}

/// SHA-256 with storage prefix.
pub fn sha256_hex(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

/// Hash of an OTP code as stored: normalize, then `sha256:<hex>`.
pub fn otp_hash(code: &str) -> String {
    sha256_hex(&normalize_otp_code(code))
}

/// Generates an OTP request identifier: `otp_req_` + 16 random bytes hex.
pub fn generate_otp_request_id() -> String {
    format!("otp_req_{}", random_hex(16))
}

/// Generates a browser binding token: `srbt_` + 16 random bytes hex.
///
/// In production the worker generates this and only transmits its SHA-256;
/// the control plane needs the generator for tests and tooling.
pub fn generate_browser_token() -> String {
    format!("srbt_{}", random_hex(16))
}

// =============================================================================
// API keys & webhook tokens
// =============================================================================

/// Generates a worker API key: 43 URL-safe characters (~256 bits), the same
/// shape as a 32-byte URL-safe random token.
pub fn generate_api_key() -> String {
    random_string(URL_SAFE, 43)
}

/// Generates a webhook token: 32 alphanumerics.
pub fn generate_webhook_token() -> String {
    random_string(ALNUM, 32)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_token_format() {
        let token = generate_setup_token();
        let groups: Vec<&str> = token.split('-').collect();
        assert_eq!(groups.len(), 9);
        for group in groups {
            assert_eq!(group.len(), 5);
            assert!(group.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_setup_tokens_are_unique() {
        assert_ne!(generate_setup_token(), generate_setup_token());
    }

    #[test]
    fn test_sha512_prefix_and_shape() {
        let hash = sha512_hex("hello");
        assert!(hash.starts_with("sha512:"));
        assert_eq!(hash.len(), "sha512:".len() + 128);
        // Deterministic
        assert_eq!(hash, sha512_hex("hello"));
        assert_ne!(hash, sha512_hex("hello2"));
    }

    #[test]
    fn test_otp_code_format_and_alphabet() {
        let code = generate_otp_code();
        assert_eq!(code.len(), 9);
        assert_eq!(&code[4..5], "-");
        for c in code.chars().filter(|c| *c != '-') {
            assert!(OTP_ALPHABET.contains(&(c as u8)), "unexpected char {c}");
        }
    }

    #[test]
    fn test_otp_alphabet_excludes_confusables() {
        for forbidden in [b'0', b'O', b'I', b'L', b'1'] {
            assert!(!OTP_ALPHABET.contains(&forbidden));
        }
        assert_eq!(OTP_ALPHABET.len(), 32);
    }

    #[test]
    fn test_normalize_otp_code() {
        assert_eq!(normalize_otp_code("a2b3-c4d5"), "A2B3C4D5");
        assert_eq!(normalize_otp_code(" A2B3 C4D5 "), "A2B3C4D5");
    }

    #[test]
    fn test_otp_hash_is_normalization_invariant() {
        assert_eq!(otp_hash("A2B3-C4D5"), otp_hash("a2b3 c4d5"));
        assert!(otp_hash("A2B3-C4D5").starts_with("sha256:"));
        assert_ne!(otp_hash("A2B3-C4D5"), otp_hash("A2B3-C4D6"));
    }

    #[test]
    fn test_request_and_browser_token_prefixes() {
        let request_id = generate_otp_request_id();
        assert!(request_id.starts_with("otp_req_"));
        assert_eq!(request_id.len(), "otp_req_".len() + 32);

        let browser = generate_browser_token();
        assert!(browser.starts_with("srbt_"));
        assert_eq!(browser.len(), "srbt_".len() + 32);
        assert!(browser["srbt_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_api_key_shape() {
        let key = generate_api_key();
        assert_eq!(key.len(), 43);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_webhook_token_shape() {
        let token = generate_webhook_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
