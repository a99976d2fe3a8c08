// Copyright 2025 Locksmith Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{
    error::Result,
    store::{BlockingLockStore, LockStore},
    types::LockToken,
};

#[derive(Debug)]
struct Entry {
    token: String,
    deadline: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline > now
    }
}

/// In-memory lock store for single-process deployments and tests.
///
/// Expiry is evaluated lazily: an entry whose deadline has passed behaves as
/// absent for `try_set` and as a mismatch for `try_extend` and `try_delete`,
/// exactly as a store-side TTL would. Serves both scheduling models by
/// implementing both store traits over the same map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token currently stored under `key`, if the entry is still live
    pub fn stored_token(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries();
        entries.get(key).filter(|e| e.is_live(now)).map(|e| e.token.clone())
    }

    /// Force the entry under `key` to expire immediately, simulating a lease
    /// that lapsed. Returns whether a live entry was expired.
    pub fn expire_now(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.deadline = now;
                true
            }
            _ => false,
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_if_absent(&self, key: &str, token: &LockToken, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                token: token.as_str().to_string(),
                deadline: now + ttl,
            },
        );
        true
    }

    fn extend_if_owned(&self, key: &str, token: &LockToken, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
            return false;
        }
        match entries.get_mut(key) {
            Some(entry) if entry.token == token.as_str() => {
                entry.deadline = now + ttl;
                true
            }
            _ => false,
        }
    }

    fn delete_if_owned(&self, key: &str, token: &LockToken) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        let Some(entry) = entries.get(key) else {
            return false;
        };
        let live = entry.is_live(now);
        let owned = entry.token == token.as_str();
        if !live {
            entries.remove(key);
            return false;
        }
        if !owned {
            return false;
        }
        entries.remove(key);
        true
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_set(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        Ok(self.set_if_absent(key, token, ttl))
    }

    async fn try_extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        Ok(self.extend_if_owned(key, token, ttl))
    }

    async fn try_delete(&self, key: &str, token: &LockToken) -> Result<bool> {
        Ok(self.delete_if_owned(key, token))
    }
}

impl BlockingLockStore for MemoryStore {
    fn try_set(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        Ok(self.set_if_absent(key, token, ttl))
    }

    fn try_extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        Ok(self.extend_if_owned(key, token, ttl))
    }

    fn try_delete(&self, key: &str, token: &LockToken) -> Result<bool> {
        Ok(self.delete_if_owned(key, token))
    }
}
