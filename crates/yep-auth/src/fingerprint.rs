//! Phone fingerprints: salted SHA-256 of the normalized number.

use sha2::{Digest, Sha256};

/// Derives the one-way key one-time codes are stored under.
///
/// Two spellings of the same number (`+1 555 0100`, `1-555-0100`) map to
/// the same fingerprint because only the digits are hashed.
#[derive(Debug, Clone)]
pub struct PhoneFingerprinter {
    salt: String,
}

impl PhoneFingerprinter {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Strips everything except ASCII digits.
    pub fn normalize(phone: &str) -> String {
        phone.chars().filter(char::is_ascii_digit).collect()
    }

    /// Returns the hex fingerprint, or `None` if the input has no digits.
    pub fn fingerprint(&self, phone: &str) -> Option<String> {
        let normalized = Self::normalize(phone);
        if normalized.is_empty() {
            return None;
        }
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update(self.salt.as_bytes());
        Some(hex::encode(hasher.finalize()))
    }
}
