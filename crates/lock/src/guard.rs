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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::runtime::Builder;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    config::LockConfig,
    error::{LockError, Result},
    store::LockStore,
    types::{LockState, LockToken},
    watchdog::Watchdog,
};

#[derive(Debug)]
struct ReleaseJob {
    key: String,
    token: LockToken,
    store: Arc<dyn LockStore>,
}

// Background release worker running on a dedicated thread-bound Tokio runtime.
// Guards can therefore be dropped from any context, including a runtime that
// is already shutting down.
static RELEASE_TX: Lazy<mpsc::Sender<ReleaseJob>> = Lazy::new(|| {
    let (tx, mut rx) = mpsc::channel::<ReleaseJob>(1024);

    thread::Builder::new()
        .name("locksmith-release".to_string())
        .spawn(move || {
            // A lightweight current-thread runtime is sufficient here.
            let rt = Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime for background release jobs");

            rt.block_on(async move {
                while let Some(job) = rx.recv().await {
                    match job.store.try_delete(&job.key, &job.token).await {
                        Ok(true) => debug!("background release completed for '{}'", job.key),
                        Ok(false) => warn!("background release for '{}' found the lease already reassigned", job.key),
                        Err(err) => warn!("background release for '{}' failed, relying on ttl expiry: {err}", job.key),
                    }
                }
            });
        })
        .expect("failed to spawn release worker thread");

    tx
});

/// Holds one successful acquisition: the ownership token, the running
/// watchdog, and the release path.
///
/// Dropping the guard stops the watchdog immediately and hands the guarded
/// delete to a background worker, so the lock is released on every exit path
/// of the critical section, including panics and cancelled futures. Use
/// [`LockGuard::release`] to release explicitly and observe the outcome.
#[derive(Debug)]
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: String,
    token: LockToken,
    ttl: Duration,
    watchdog: Option<Watchdog>,
    lost: Arc<AtomicBool>,
    disarmed: bool,
}

impl LockGuard {
    pub(crate) fn new(store: Arc<dyn LockStore>, key: String, token: LockToken, config: &LockConfig) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::spawn(
            store.clone(),
            key.clone(),
            token.clone(),
            config.ttl,
            config.renewal_interval(),
            lost.clone(),
        );

        Self {
            store,
            key,
            token,
            ttl: config.ttl,
            watchdog: Some(watchdog),
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

    fn cancel_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.cancel();
        }
    }

    /// Release the lock explicitly.
    ///
    /// Cancels the watchdog first so no renewal races the delete, then
    /// performs the token-guarded delete. A token mismatch means the lease
    /// was already lost and surfaces as [`LockError::NotOwned`]; the guard
    /// still counts as released and will not retry the delete. A store
    /// failure is accepted best-effort, with the TTL as backstop. Idempotent:
    /// further calls are no-ops.
    pub async fn release(&mut self) -> Result<()> {
        if self.disarmed {
            return Ok(());
        }
        self.cancel_watchdog();
        self.disarmed = true;

        if self.lost.load(Ordering::SeqCst) {
            return Err(LockError::not_owned(&self.key));
        }

        match self.store.try_delete(&self.key, &self.token).await {
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

    /// Disarm the guard so dropping it stops the watchdog but leaves the key
    /// to expire on its own. Call this if the key was released elsewhere, or
    /// to deliberately abandon the lease.
    pub fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Stopping the watchdog is synchronous: no renewal survives the guard
        self.cancel_watchdog();

        if self.disarmed || self.lost.load(Ordering::SeqCst) {
            return;
        }

        let job = ReleaseJob {
            key: self.key.clone(),
            token: self.token.clone(),
            store: self.store.clone(),
        };

        // Non-blocking send to avoid panics in Drop
        if let Err(err) = RELEASE_TX.try_send(job) {
            // Channel full or closed; best-effort fallback on a short-lived thread
            warn!("release channel send failed ({err}), spawning fallback release thread for '{}'", self.key);

            let key = self.key.clone();
            let token = self.token.clone();
            let store = self.store.clone();
            let _ = thread::Builder::new()
                .name("locksmith-release-fallback".to_string())
                .spawn(move || {
                    if let Ok(rt) = Builder::new_current_thread().enable_all().build() {
                        rt.block_on(async move {
                            if let Err(err) = store.try_delete(&key, &token).await {
                                warn!("fallback release for '{key}' failed, relying on ttl expiry: {err}");
                            }
                        });
                    }
                });
        }
    }
}
