//! Registration and password login against the user store.

use std::sync::Arc;

use rand::Rng;
use yep_protocol::{Level, UserId, unix_now};

use crate::password::{hash_password, verify_password};
use crate::{AuthError, PhoneFingerprinter, StoreError, User, UserStore};

/// How a login names the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginIdentifier<'a> {
    Email(&'a str),
    Phone(&'a str),
}

impl<'a> LoginIdentifier<'a> {
    /// Picks the email if present, otherwise the phone.
    pub fn from_parts(email: &'a str, phone: &'a str) -> Option<Self> {
        if !email.trim().is_empty() {
            Some(LoginIdentifier::Email(email.trim()))
        } else if !phone.trim().is_empty() {
            Some(LoginIdentifier::Phone(phone))
        } else {
            None
        }
    }
}

/// Registers and authenticates users.
///
/// Decides whether a new user needs phone verification: anyone who
/// registers with a phone number starts inactive.
pub struct CredentialService<U> {
    users: Arc<U>,
    fingerprinter: PhoneFingerprinter,
}

impl<U: UserStore> CredentialService<U> {
    pub fn new(users: Arc<U>, fingerprinter: PhoneFingerprinter) -> Self {
        Self {
            users,
            fingerprinter,
        }
    }

    /// The fingerprinter used for phone numbers.
    pub fn fingerprinter(&self) -> &PhoneFingerprinter {
        &self.fingerprinter
    }

    /// Creates a new user.
    ///
    /// The user is inactive if a phone number was supplied and must then
    /// complete a one-time-code verification.
    ///
    /// # Errors
    /// - [`AuthError::InvalidInput`] — empty email or password
    /// - [`AuthError::AlreadyRegistered`] — email or phone taken
    pub async fn register(
        &self,
        email: &str,
        phone: &str,
        password: &str,
        level: Level,
    ) -> Result<User, AuthError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AuthError::InvalidInput("email is required".into()));
        }
        if password.is_empty() {
            return Err(AuthError::InvalidInput("password is required".into()));
        }
        if self.users.by_email(email).await?.is_some() {
            return Err(AuthError::AlreadyRegistered("email"));
        }

        let phone_fingerprint = if phone.trim().is_empty() {
            None
        } else {
            Some(self.fingerprinter.fingerprint(phone).ok_or_else(|| {
                AuthError::InvalidInput("phone number has no digits".into())
            })?)
        };

        let password_hash = hash_blocking(password.to_string()).await?;
        let user = User {
            id: generate_user_id(),
            email: email.to_string(),
            active: phone_fingerprint.is_none(),
            phone_fingerprint,
            password_hash,
            level,
            created_at: unix_now(),
            last_login: None,
        };

        self.users.create(user.clone()).await.map_err(|e| match e {
            StoreError::Duplicate(what) => AuthError::AlreadyRegistered(what),
            other => AuthError::Store(other),
        })?;

        tracing::info!(
            user_id = %user.id,
            level = %user.level,
            active = user.active,
            "user registered"
        );
        Ok(user)
    }

    /// Checks a password login. Returns the user whether or not it is
    /// active; the caller decides what an inactive account means.
    ///
    /// # Errors
    /// [`AuthError::InvalidCredentials`] for an unknown account or a wrong
    /// password alike.
    pub async fn login(
        &self,
        identifier: LoginIdentifier<'_>,
        password: &str,
    ) -> Result<User, AuthError> {
        let found = match identifier {
            LoginIdentifier::Email(email) => self.users.by_email(email).await?,
            LoginIdentifier::Phone(phone) => match self.fingerprinter.fingerprint(phone) {
                Some(fp) => self.users.by_fingerprint(&fp).await?,
                None => None,
            },
        };
        let Some(mut user) = found else {
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_blocking(user.password_hash.clone(), password.to_string()).await? {
            tracing::debug!(user_id = %user.id, "password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let now = unix_now();
        if let Err(e) = self.users.record_login(&user.id, now).await {
            tracing::warn!(user_id = %user.id, error = %e, "failed to record login");
        } else {
            user.last_login = Some(now);
        }
        Ok(user)
    }

    /// Fetches a user by identifier.
    pub async fn user(&self, id: &UserId) -> Result<User, AuthError> {
        self.users
            .by_id(id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(id.clone()))
    }

    /// Finds the user registered under a phone fingerprint. Used by the
    /// out-of-band code delivery channel to check a number is known.
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<User>, AuthError> {
        Ok(self.users.by_fingerprint(fingerprint).await?)
    }
}

async fn hash_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

async fn verify_blocking(hash: String, password: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || verify_password(&hash, &password))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// `yep_` followed by 16 random hex characters.
fn generate_user_id() -> UserId {
    let bytes: [u8; 8] = rand::rng().random();
    UserId(format!("yep_{}", hex::encode(bytes)))
}
