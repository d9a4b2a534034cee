//! Per-user mutual exclusion for generation runs.
//!
//! Acquisition never waits: a second caller for the same user gets
//! `GenerationInProgress` at once. The lock is released when the guard
//! drops, on success, error or panic alike.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{TimelineError, TimelineResult};

#[derive(Debug, Clone)]
struct LockEntry {
    acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct UserLocks {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn try_acquire(&self, user_id: &str) -> TimelineResult<UserLockGuard> {
        let mut entries = self.entries();
        if entries.contains_key(user_id) {
            return Err(TimelineError::GenerationInProgress(user_id.to_string()));
        }
        entries.insert(
            user_id.to_string(),
            LockEntry {
                acquired_at: Utc::now(),
            },
        );

        Ok(UserLockGuard {
            locks: self.clone(),
            user_id: user_id.to_string(),
        })
    }

    pub fn is_locked(&self, user_id: &str) -> bool {
        self.entries().contains_key(user_id)
    }

    /// When the current holder took the lock, if any.
    pub fn held_since(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.entries().get(user_id).map(|entry| entry.acquired_at)
    }

    pub fn active_count(&self) -> usize {
        self.entries().len()
    }
}

#[derive(Debug)]
pub struct UserLockGuard {
    locks: UserLocks,
    user_id: String,
}

impl UserLockGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for UserLockGuard {
    fn drop(&mut self) {
        self.locks.entries().remove(&self.user_id);
    }
}
