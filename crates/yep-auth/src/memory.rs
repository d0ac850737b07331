//! In-memory implementations of the storage seams.
//!
//! Nothing here survives a restart. Used by the test suites and by the
//! bundled server binary when no external backend is wired in.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use yep_protocol::UserId;

use crate::{CodeCheck, CodeStore, StoreError, User, UserStore};

/// Users held in a `HashMap` behind a `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Returns `true` if no users are stored.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

impl UserStore for MemoryUserStore {
    async fn create(&self, user: User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        for existing in users.values() {
            if existing.email == user.email {
                return Err(StoreError::Duplicate("email"));
            }
            if user.phone_fingerprint.is_some()
                && existing.phone_fingerprint == user.phone_fingerprint
            {
                return Err(StoreError::Duplicate("phone"));
            }
        }
        users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn by_id(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.phone_fingerprint.as_deref() == Some(fingerprint))
            .cloned())
    }

    async fn activate_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<usize, StoreError> {
        let mut users = self.users.write().await;
        let mut changed = 0;
        for user in users.values_mut() {
            if user.phone_fingerprint.as_deref() == Some(fingerprint) && !user.active {
                user.active = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn record_login(&self, id: &UserId, at: i64) -> Result<(), StoreError> {
        if let Some(user) = self.users.write().await.get_mut(id) {
            user.last_login = Some(at);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct CodeEntry {
    code: String,
    expires_at: Instant,
}

/// One-time codes held in a `HashMap` behind a `Mutex`.
///
/// The mutex makes check-and-consume atomic: two concurrent submissions of
/// the right code cannot both match.
#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    codes: Mutex<HashMap<String, CodeEntry>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a code (expired or not) is stored for the fingerprint.
    pub async fn contains(&self, fingerprint: &str) -> bool {
        self.codes.lock().await.contains_key(fingerprint)
    }
}

impl CodeStore for MemoryCodeStore {
    async fn put(
        &self,
        fingerprint: &str,
        code: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.codes.lock().await.insert(
            fingerprint.to_string(),
            CodeEntry {
                code: code.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn check_and_consume(
        &self,
        fingerprint: &str,
        code: &str,
    ) -> Result<CodeCheck, StoreError> {
        let mut codes = self.codes.lock().await;
        let Some(entry) = codes.get(fingerprint) else {
            return Ok(CodeCheck::Missing);
        };
        if Instant::now() >= entry.expires_at {
            codes.remove(fingerprint);
            return Ok(CodeCheck::Expired);
        }
        if entry.code != code {
            return Ok(CodeCheck::Mismatch);
        }
        codes.remove(fingerprint);
        Ok(CodeCheck::Matched)
    }

    async fn discard(&self, fingerprint: &str) -> Result<bool, StoreError> {
        Ok(self.codes.lock().await.remove(fingerprint).is_some())
    }
}
