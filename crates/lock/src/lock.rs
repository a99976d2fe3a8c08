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

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::{
    config::LockConfig,
    error::{LockError, Result},
    guard::LockGuard,
    store::LockStore,
    types::LockToken,
};

/// One named critical section, coordinated through the backing store.
///
/// The lock itself is cheap to clone and holds no acquisition state; every
/// successful [`Lock::acquire`] mints a fresh ownership token and returns it
/// inside a [`LockGuard`] that owns the running watchdog and the release
/// path. Contenders in other processes racing for the same name are
/// serialized only by the store's atomic primitives, never by anything
/// in-process.
#[derive(Debug, Clone)]
pub struct Lock {
    store: Arc<dyn LockStore>,
    name: String,
    config: LockConfig,
}

impl Lock {
    /// Create a lock with default configuration
    pub fn new(store: Arc<dyn LockStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            config: LockConfig::default(),
        }
    }

    /// Create a lock with explicit configuration
    pub fn with_config(store: Arc<dyn LockStore>, name: impl Into<String>, config: LockConfig) -> Result<Self> {
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
    pub async fn try_acquire(&self) -> Result<Option<LockGuard>> {
        self.acquire_inner(false).await
    }

    /// Attempt acquisition under the configured blocking policy.
    ///
    /// Generates a fresh token and retries `try_set` every retry interval
    /// until it succeeds or the acquire timeout elapses (`Ok(None)`). With
    /// `blocking` disabled the first contended attempt returns `Ok(None)`
    /// immediately. A store failure counts as a failed attempt, not a crash.
    pub async fn acquire(&self) -> Result<Option<LockGuard>> {
        self.acquire_inner(self.config.blocking).await
    }

    /// Acquire or fail with [`LockError::AcquireTimeout`].
    ///
    /// Entry point for scoped usage; the returned guard releases the lock on
    /// every exit path.
    pub async fn lock(&self) -> Result<LockGuard> {
        match self.acquire().await? {
            Some(guard) => Ok(guard),
            None => Err(LockError::acquire_timeout(&self.name, self.config.acquire_timeout)),
        }
    }

    /// Run `section` while holding the lock.
    ///
    /// Acquires (or fails with [`LockError::AcquireTimeout`]), awaits the
    /// critical section, then releases. Release runs on every exit path: an
    /// explicit release on normal completion, the guard's drop path if the
    /// section panics or the future is cancelled mid-flight. A lease already
    /// lost at release time surfaces as [`LockError::NotOwned`].
    pub async fn with_lock<T, Fut>(&self, section: impl FnOnce() -> Fut) -> Result<T>
    where
        Fut: Future<Output = T>,
    {
        let mut guard = self.lock().await?;
        let value = section().await;
        guard.release().await?;
        Ok(value)
    }

    async fn acquire_inner(&self, blocking: bool) -> Result<Option<LockGuard>> {
        let token = LockToken::generate();
        let start = Instant::now();

        loop {
            match self.store.try_set(&self.name, &token, self.config.ttl).await {
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
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }
}
