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

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::{error::Result, types::LockToken};

/// Atomic primitives the backing store must provide.
///
/// Each operation must be a single round trip that the store executes
/// atomically (server-side compare-and-act, or an equivalent transaction).
/// A get-then-act sequence split across round trips reintroduces the race
/// this contract exists to prevent. No lock logic lives behind this trait;
/// the store is the sole arbiter of mutual exclusion across processes.
///
/// `Ok(false)` is a protocol outcome (key present, token mismatch); `Err` is
/// reserved for store unavailability.
#[async_trait]
pub trait LockStore: Send + Sync + std::fmt::Debug {
    /// Set `key` to `token` with expiry `ttl`, only if `key` is absent.
    /// Returns whether the set happened. No side effect on failure.
    async fn try_set(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool>;

    /// Reset the expiry of `key` to `ttl` from now, only if the stored value
    /// equals `token`. Returns whether the extension happened.
    async fn try_extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool>;

    /// Delete `key`, only if the stored value equals `token`.
    /// Returns whether the deletion happened.
    async fn try_delete(&self, key: &str, token: &LockToken) -> Result<bool>;
}

/// The same contract for stores driven from plain OS threads.
///
/// Adapters that can serve both scheduling models implement both traits over
/// the same connection handling.
pub trait BlockingLockStore: Send + Sync + std::fmt::Debug {
    /// Set `key` to `token` with expiry `ttl`, only if `key` is absent
    fn try_set(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool>;

    /// Reset the expiry of `key`, only if the stored value equals `token`
    fn try_extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool>;

    /// Delete `key`, only if the stored value equals `token`
    fn try_delete(&self, key: &str, token: &LockToken) -> Result<bool>;
}
