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
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::{store::LockStore, types::LockToken};

/// Number of consecutive failed renewal attempts after which the lease has
/// certainly lapsed and must not be extended further.
fn allowed_misses(ttl: Duration, interval: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    ((ttl.as_millis() + interval_ms - 1) / interval_ms).max(1) as u32
}

/// Background renewer bound 1:1 to a held lock.
///
/// Owned exclusively by the guard that spawned it and never outlives it:
/// the guard cancels the task on release and on drop. The task stops on its
/// own when a renewal finds the token no longer stored, raising the shared
/// `lost` flag instead of surfacing an error into unrelated callers.
#[derive(Debug)]
pub(crate) struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub(crate) fn spawn(
        store: Arc<dyn LockStore>,
        key: String,
        token: LockToken,
        ttl: Duration,
        interval: Duration,
        lost: Arc<AtomicBool>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let max_misses = allowed_misses(ttl, interval);
            let mut misses = 0u32;

            loop {
                tokio::time::sleep(interval).await;

                match store.try_extend(&key, &token, ttl).await {
                    Ok(true) => {
                        misses = 0;
                        debug!("lease renewed for '{}'", key);
                    }
                    Ok(false) => {
                        error!("lease lost for '{}': token no longer stored", key);
                        lost.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(err) => {
                        // Transient store failure: keep the renewal cadence
                        // rather than hammering the store, but once the missed
                        // attempts span the whole TTL the lease has lapsed and
                        // extending it would touch someone else's lock.
                        misses += 1;
                        warn!("lease renewal attempt {misses}/{max_misses} failed for '{}': {err}", key);
                        if misses >= max_misses {
                            error!("lease presumed lapsed for '{}' after {misses} missed renewals", key);
                            lost.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            }
        });

        Self { handle }
    }

    /// Stop the renewer. The cancellation takes effect at the task's next
    /// suspension point. Safe to call more than once and after the task has
    /// already finished on its own.
    pub(crate) fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
