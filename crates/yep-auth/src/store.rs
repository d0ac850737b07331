//! Storage seams for the auth services.
//!
//! The session core never talks to a database directly. It consumes user
//! records and one-time codes through these traits; production deployments
//! plug in their own backends, tests and the bundled binary use the
//! in-memory implementations from [`crate::memory`].

use std::future::Future;
use std::time::Duration;

use yep_protocol::UserId;

use crate::{StoreError, User};

/// Persistent user records.
pub trait UserStore: Send + Sync + 'static {
    /// Inserts a new user.
    ///
    /// # Errors
    /// [`StoreError::Duplicate`] if the email or phone fingerprint is
    /// already bound to another user.
    fn create(&self, user: User) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Looks a user up by identifier.
    fn by_id(
        &self,
        id: &UserId,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Looks a user up by email.
    fn by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Looks a user up by phone fingerprint.
    fn by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Marks every user with this fingerprint active. Returns how many
    /// records changed.
    fn activate_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Stamps a successful login.
    fn record_login(
        &self,
        id: &UserId,
        at: i64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Outcome of [`CodeStore::check_and_consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    /// The code matched and has been deleted.
    Matched,
    /// A code exists but differs. Nothing was changed.
    Mismatch,
    /// No code is stored for the fingerprint.
    Missing,
    /// The stored code had expired (and has been discarded).
    Expired,
}

/// Short-lived one-time codes keyed by phone fingerprint.
pub trait CodeStore: Send + Sync + 'static {
    /// Stores `code` for `fingerprint`, replacing any previous code.
    fn put(
        &self,
        fingerprint: &str,
        code: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically compares and, on match, deletes the stored code.
    ///
    /// A mismatch must leave the stored code untouched.
    fn check_and_consume(
        &self,
        fingerprint: &str,
        code: &str,
    ) -> impl Future<Output = Result<CodeCheck, StoreError>> + Send;

    /// Deletes any code stored for `fingerprint`. Returns `true` if one
    /// existed.
    fn discard(&self, fingerprint: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
