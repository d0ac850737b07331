//! One-time-code verification of phone ownership.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::{CodeCheck, CodeStore, UserStore, VerificationError};

/// Default lifetime of a delivered code.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(5 * 60);

/// Checks submitted codes and activates users on success.
///
/// Also the entry point for the out-of-band channel that delivers codes
/// to users ([`deliver_code`](Self::deliver_code)).
pub struct VerificationFlow<U, K> {
    users: Arc<U>,
    codes: Arc<K>,
    code_ttl: Duration,
}

impl<U: UserStore, K: CodeStore> VerificationFlow<U, K> {
    pub fn new(users: Arc<U>, codes: Arc<K>) -> Self {
        Self {
            users,
            codes,
            code_ttl: DEFAULT_CODE_TTL,
        }
    }

    /// Overrides how long delivered codes stay valid.
    pub fn with_code_ttl(mut self, ttl: Duration) -> Self {
        self.code_ttl = ttl;
        self
    }

    /// Checks `code` against the one stored for `fingerprint`.
    ///
    /// On a match the code is consumed and the user with that fingerprint
    /// becomes active. On any failure nothing in either store changes
    /// (an expired code is discarded by the store).
    pub async fn verify(&self, fingerprint: &str, code: &str) -> Result<(), VerificationError> {
        match self.codes.check_and_consume(fingerprint, code.trim()).await? {
            CodeCheck::Matched => {
                let activated = self.users.activate_by_fingerprint(fingerprint).await?;
                tracing::info!(activated, "phone verified");
                Ok(())
            }
            CodeCheck::Mismatch => Err(VerificationError::WrongCode),
            CodeCheck::Missing => Err(VerificationError::NoCode),
            CodeCheck::Expired => Err(VerificationError::CodeExpired),
        }
    }

    /// Stores a code produced by the delivery channel.
    ///
    /// # Errors
    /// [`VerificationError::UnknownFingerprint`] if no user is registered
    /// under the fingerprint.
    pub async fn deliver_code(&self, fingerprint: &str, code: &str) -> Result<(), VerificationError> {
        if self.users.by_fingerprint(fingerprint).await?.is_none() {
            return Err(VerificationError::UnknownFingerprint);
        }
        self.codes.put(fingerprint, code, self.code_ttl).await?;
        tracing::debug!("verification code stored");
        Ok(())
    }

    /// Throws away the code stored for `fingerprint`, if any. Used once a
    /// user has exhausted their attempts so the code cannot be guessed
    /// from another connection.
    pub async fn revoke_code(&self, fingerprint: &str) -> Result<(), VerificationError> {
        if self.codes.discard(fingerprint).await? {
            tracing::debug!("verification code revoked");
        }
        Ok(())
    }

    /// Generates a random six-digit code, stores it, and returns it for
    /// delivery.
    pub async fn issue_code(&self, fingerprint: &str) -> Result<String, VerificationError> {
        let code = format!("{:06}", rand::rng().random_range(0..1_000_000u32));
        self.deliver_code(fingerprint, &code).await?;
        Ok(code)
    }
}
