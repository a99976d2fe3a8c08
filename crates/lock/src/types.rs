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

use uuid::Uuid;

/// Ownership token proving which acquisition currently owns a lock key.
///
/// A fresh token is generated on every successful acquisition and stored both
/// in the backing store (as the value under the lock key) and in the guard
/// that acquired it. Renewal and release are valid only while the stored
/// value still equals this token, which is what keeps a holder whose lease
/// already lapsed from corrupting the next holder's lock.
///
/// The token belongs to exactly one guard. It is never placed in any shared
/// or thread-local location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a new random token.
    /// Each call produces a distinct value, even for the same lock key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The token value as stored in the backing store
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LockToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Observable lifecycle of one acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The lease is held and the watchdog is renewing it
    Held,
    /// The holder released the lock
    Released,
    /// A renewal or release found the token no longer stored; terminal for
    /// this acquisition. A new acquisition mints a new token and starts over.
    Lost,
}

impl LockState {
    /// Whether the acquisition still guards its critical section
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held)
    }
}
