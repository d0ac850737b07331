//! The user record as the auth services see it.

use yep_protocol::{Level, UserId};

/// A registered user.
///
/// Raw phone numbers are never kept; only the salted fingerprint, which
/// is what one-time codes are keyed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Contact identity shown to other users.
    pub email: String,
    pub phone_fingerprint: Option<String>,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub level: Level,
    /// Inactive users must prove phone ownership before they can chat.
    pub active: bool,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds of the last successful login.
    pub last_login: Option<i64>,
}

impl User {
    /// The identity other users see in join notices and online lists.
    pub fn contact(&self) -> &str {
        &self.email
    }

    /// Returns `true` if the user can be activated with a one-time code.
    pub fn can_verify(&self) -> bool {
        self.phone_fingerprint.is_some()
    }
}
