//! Credential hashing.
//!
//! Codes (PINs, RFID tag IDs) are stored and compared as salted MD5
//! digests. The hash cannot protect against brute force, since PINs are
//! short and older Mifare cards carry 32-bit IDs; it merely keeps plain
//! codes and their lengths out of the persisted file and the logs.

use md5::{Digest, Md5};

use crate::constants::{AUTH_CODE_SALT, MIN_CODE_LENGTH};

/// Digest of a plain credential code as stored in the user file.
#[must_use]
pub fn hash_auth_code(plain: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(AUTH_CODE_SALT.as_bytes());
    hasher.update(plain.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short scrub of a value for log lines: enough to correlate repeated
/// attempts, useless for recovering the input.
#[must_use]
pub fn scrub_log_value(value: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())[..6].to_string()
}

/// Gate applied before any lookup or enrollment touches a code.
#[must_use]
pub fn meets_min_code_length(code: &str) -> bool {
    code.len() >= MIN_CODE_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_fixed_width_hex() {
        let digest = hash_auth_code("123456");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_is_salted() {
        // Same input always maps to the same digest, different inputs differ.
        assert_eq!(hash_auth_code("123456"), hash_auth_code("123456"));
        assert_ne!(hash_auth_code("123456"), hash_auth_code("654321"));
        // And it is not the unsalted md5 of the input.
        let mut unsalted = Md5::new();
        unsalted.update(b"123456");
        assert_ne!(hash_auth_code("123456"), hex::encode(unsalted.finalize()));
    }

    #[test]
    fn scrub_is_six_hex_digits() {
        let scrub = scrub_log_value("super-secret");
        assert_eq!(scrub.len(), 6);
        assert!(scrub.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn minimum_length() {
        assert!(!meets_min_code_length(""));
        assert!(!meets_min_code_length("12345"));
        assert!(meets_min_code_length("123456"));
        assert!(meets_min_code_length("deadbeef"));
    }
}
