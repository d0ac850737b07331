//! Pending verifications: users who registered (or logged in) inactive
//! and still owe a one-time code.
//!
//! # Concurrency note
//!
//! `PendingVerifications` is NOT thread-safe by itself. The gatekeeper owns
//! it behind a `tokio::sync::Mutex` and never holds that lock across I/O.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use yep_protocol::UserId;

use crate::User;

/// One user waiting for phone verification.
#[derive(Debug, Clone)]
pub struct PendingVerification {
    /// The not-yet-activated user.
    pub user: User,
    /// Flipped when the code is accepted, just before the record is removed.
    pub verified: bool,
    pub created_at: Instant,
    /// Wrong codes submitted so far.
    pub failed_attempts: u32,
}

/// Table of pending verifications keyed by user identifier.
///
/// ## Lifecycle
///
/// ```text
/// insert() ──→ record_failure()* ──→ complete()   (verified, removed)
///    │
///    └──(ttl elapsed)──→ sweep()                 (abandoned, removed)
/// ```
#[derive(Debug)]
pub struct PendingVerifications {
    records: HashMap<UserId, PendingVerification>,
    ttl: Duration,
}

impl PendingVerifications {
    /// Creates an empty table whose records live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: HashMap::new(),
            ttl,
        }
    }

    /// Starts a pending verification for `user`, or joins the live one.
    ///
    /// A second login of the same inactive user while a record is live
    /// refreshes the user snapshot but keeps the record's age and attempt
    /// counter, so logging in again never buys more guesses. A stale record
    /// is replaced by a fresh one.
    pub fn insert(&mut self, user: User) -> &PendingVerification {
        let id = user.id.clone();
        let ttl = self.ttl;
        let record = self
            .records
            .entry(id.clone())
            .and_modify(|record| {
                if record.created_at.elapsed() >= ttl {
                    record.created_at = Instant::now();
                    record.failed_attempts = 0;
                }
            })
            .or_insert_with(|| PendingVerification {
                user: user.clone(),
                verified: false,
                created_at: Instant::now(),
                failed_attempts: 0,
            });
        record.user = user;
        tracing::debug!(user_id = %id, attempts = record.failed_attempts, "verification pending");
        record
    }

    /// Looks up a record that has not outlived the TTL.
    pub fn get_live(&self, id: &UserId) -> Option<&PendingVerification> {
        self.records
            .get(id)
            .filter(|record| record.created_at.elapsed() < self.ttl)
    }

    /// Counts one wrong code. Returns the new total, or `None` if no live
    /// record exists.
    pub fn record_failure(&mut self, id: &UserId) -> Option<u32> {
        let ttl = self.ttl;
        let record = self
            .records
            .get_mut(id)
            .filter(|record| record.created_at.elapsed() < ttl)?;
        record.failed_attempts += 1;
        Some(record.failed_attempts)
    }

    /// Consumes the record after a correct code and returns the user,
    /// now marked active.
    pub fn complete(&mut self, id: &UserId) -> Option<User> {
        let mut record = self.records.remove(id)?;
        record.verified = true;
        record.user.active = true;
        tracing::debug!(user_id = %id, "verification completed");
        Some(record.user)
    }

    /// Drops the record without activating the user.
    pub fn discard(&mut self, id: &UserId) -> Option<PendingVerification> {
        self.records.remove(id)
    }

    /// Removes every record older than the TTL and returns their IDs.
    pub fn sweep(&mut self) -> Vec<UserId> {
        let ttl = self.ttl;
        let mut expired = Vec::new();
        self.records.retain(|id, record| {
            if record.created_at.elapsed() >= ttl {
                expired.push(id.clone());
                false
            } else {
                true
            }
        });
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "swept abandoned verifications");
        }
        expired
    }

    /// Number of records, live or not yet swept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
