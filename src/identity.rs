//! Keyed hashing of personal identifiers.
//!
//! Emails and phone numbers never enter a bucket key in clear text. They are
//! normalized and hashed with HMAC-SHA256 under a deployment secret, so the
//! same address always maps to the same key while the store only ever holds
//! opaque hex digests.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AuthgateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Hashes identifiers under a fixed secret.
#[derive(Clone)]
pub struct IdentifierHasher {
    mac: HmacSha256,
}

impl std::fmt::Debug for IdentifierHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierHasher")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl IdentifierHasher {
    /// Create a hasher. The secret must not be empty.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AuthgateError::Identity(
                "hashing secret must not be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AuthgateError::Identity(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Hash a raw value as-is.
    pub fn hash(&self, value: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Hash an email address after trimming and lowercasing it.
    pub fn hash_email(&self, email: &str) -> String {
        self.hash(&email.trim().to_lowercase())
    }

    /// Hash a phone number keeping only digits and a leading `+`.
    pub fn hash_phone(&self, phone: &str) -> String {
        let trimmed = phone.trim();
        let mut normalized = String::with_capacity(trimmed.len());
        if trimmed.starts_with('+') {
            normalized.push('+');
        }
        normalized.extend(trimmed.chars().filter(char::is_ascii_digit));
        self.hash(&normalized)
    }
}
