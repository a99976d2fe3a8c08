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

//! Preemptive-model locks for callers running on plain OS threads.
//!
//! Same protocol and guarantees as the async API, but acquisition retries
//! with `thread::sleep` and lease renewal is multiplexed over a bounded,
//! process-wide worker pool instead of per-lock tasks. Cancellation uses an
//! explicit stop flag checked every renewal iteration, since preemptively
//! killing an arbitrary OS thread is not an option.

mod renewer;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::{
    config::LockConfig,
    error::{LockError, Result},
    store::BlockingLockStore,
    types::{LockState, LockToken},
};

use renewer::{RenewalHandle, RenewalTask, global_pool};

/// One named critical section, coordinated through the backing store.
///
/// Blocking counterpart of [`crate::Lock`]: every successful acquisition
/// mints a fresh ownership token and returns it inside a [`LockGuard`].
#[derive(Debug, Clone)]
pub struct Lock {
    store: Arc<dyn BlockingLockStore>,
    name: String,
    config: LockConfig,
}

impl Lock {
    /// Create a lock with default configuration
    pub fn new(store: Arc<dyn BlockingLockStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            config: LockConfig::default(),
        }
    }

    /// Create a lock with explicit configuration
    pub fn with_config(store: Arc<dyn BlockingLockStore>, name: impl Into<String>, config: LockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            name: name.into(),
            config,
        })
    }

    /// Lock name, shared by all contenders for the critical section
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Attempt acquisition once, without retrying.
    /// Returns `Ok(None)` when the lock is held by someone else.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        self.acquire_inner(false)
    }

    /// Attempt acquisition under the configured blocking policy
    pub fn acquire(&self) -> Result<Option<LockGuard>> {
        self.acquire_inner(self.config.blocking)
    }

    /// Acquire or fail with [`LockError::AcquireTimeout`]
    pub fn lock(&self) -> Result<LockGuard> {
        match self.acquire()? {
            Some(guard) => Ok(guard),
            None => Err(LockError::acquire_timeout(&self.name, self.config.acquire_timeout)),
        }
    }

    /// Run `section` while holding the lock.
    ///
    /// Releases on every exit path: explicitly on normal return, through the
    /// guard's drop path if the section panics.
    pub fn with_lock<T>(&self, section: impl FnOnce() -> T) -> Result<T> {
        let mut guard = self.lock()?;
        let value = section();
        guard.release()?;
        Ok(value)
    }

    fn acquire_inner(&self, blocking: bool) -> Result<Option<LockGuard>> {
        let token = LockToken::generate();
        let start = Instant::now();

        loop {
            match self.store.try_set(&self.name, &token, self.config.ttl) {
                Ok(true) => {
                    debug!("lock '{}' acquired", self.name);
                    return Ok(Some(LockGuard::new(
                        self.store.clone(),
                        self.name.clone(),
                        token,
                        &self.config,
                    )));
                }
                Ok(false) => {}
                Err(err) => {
                    warn!("acquisition attempt for '{}' failed against store: {err}", self.name);
                }
            }

            if !blocking || start.elapsed() >= self.config.acquire_timeout {
                return Ok(None);
            }
            thread::sleep(self.config.retry_interval);
        }
    }
}

/// Holds one successful acquisition in the preemptive model.
///
/// Dropping the guard raises the renewer's stop flag and performs a
/// best-effort token-guarded delete inline, so the lock is released on every
/// exit path of the critical section, including panics.
#[derive(Debug)]
pub struct LockGuard {
    store: Arc<dyn BlockingLockStore>,
    key: String,
    token: LockToken,
    ttl: Duration,
    renewal: Option<RenewalHandle>,
    lost: Arc<AtomicBool>,
    disarmed: bool,
}

impl LockGuard {
    fn new(store: Arc<dyn BlockingLockStore>, key: String, token: LockToken, config: &LockConfig) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let task = RenewalTask::new(
            key.clone(),
            token.clone(),
            config.ttl,
            config.renewal_interval(),
            store.clone(),
            lost.clone(),
        );
        let renewal = global_pool().register(task);

        Self {
            store,
            key,
            token,
            ttl: config.ttl,
            renewal: Some(renewal),
            lost,
            disarmed: false,
        }
    }

    /// Lock key this guard holds
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Ownership token minted for this acquisition
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Lease TTL attached to the stored key
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current state of this acquisition
    pub fn state(&self) -> LockState {
        if self.lost.load(Ordering::SeqCst) {
            LockState::Lost
        } else if self.disarmed {
            LockState::Released
        } else {
            LockState::Held
        }
    }

    /// Whether this acquisition still guards its critical section
    pub fn is_held(&self) -> bool {
        self.state().is_held()
    }

    fn cancel_renewal(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.cancel();
        }
    }

    /// Release the lock explicitly.
    ///
    /// Stops the renewer first so no renewal races the delete, then performs
    /// the token-guarded delete. A token mismatch surfaces as
    /// [`LockError::NotOwned`]; a store failure is accepted best-effort with
    /// the TTL as backstop. Idempotent.
    pub fn release(&mut self) -> Result<()> {
        if self.disarmed {
            return Ok(());
        }
        self.cancel_renewal();
        self.disarmed = true;

        if self.lost.load(Ordering::SeqCst) {
            return Err(LockError::not_owned(&self.key));
        }

        match self.store.try_delete(&self.key, &self.token) {
            Ok(true) => {
                debug!("lock '{}' released", self.key);
                Ok(())
            }
            Ok(false) => {
                self.lost.store(true, Ordering::SeqCst);
                Err(LockError::not_owned(&self.key))
            }
            Err(err) => {
                warn!("release of '{}' failed against store, relying on ttl expiry: {err}", self.key);
                Ok(())
            }
        }
    }

    /// Disarm the guard so dropping it stops the renewer but leaves the key
    /// to expire on its own
    pub fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.cancel_renewal();

        if self.disarmed || self.lost.load(Ordering::SeqCst) {
            return;
        }

        match self.store.try_delete(&self.key, &self.token) {
            Ok(true) => debug!("lock '{}' released on drop", self.key),
            Ok(false) => warn!("drop release for '{}' found the lease already reassigned", self.key),
            Err(err) => warn!("drop release for '{}' failed, relying on ttl expiry: {err}", self.key),
        }
    }
}
