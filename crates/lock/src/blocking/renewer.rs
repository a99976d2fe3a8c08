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

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tracing::{debug, error, warn};

use crate::{store::BlockingLockStore, types::LockToken};

/// Renewer threads shared by every blocking lock in the process
const DEFAULT_WORKERS: usize = 2;

// Process-wide pool; lock churn cannot grow background threads without bound.
static POOL: Lazy<RenewerPool> = Lazy::new(|| {
    let workers = std::env::var("LOCKSMITH_RENEWER_THREADS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|&workers| workers > 0)
        .unwrap_or(DEFAULT_WORKERS);
    RenewerPool::new(workers)
});

pub(crate) fn global_pool() -> &'static RenewerPool {
    &POOL
}

/// Renewal work for one held lock.
///
/// Exists at most once in the pool's schedule, and a worker holds it
/// exclusively while renewing, so renewal attempts for a given lock never
/// overlap. The stop flag is checked every iteration; once raised (or once
/// the lease is lost) the task is discarded instead of rescheduled.
#[derive(Debug)]
pub(crate) struct RenewalTask {
    key: String,
    token: LockToken,
    ttl: Duration,
    interval: Duration,
    store: Arc<dyn BlockingLockStore>,
    stopped: AtomicBool,
    lost: Arc<AtomicBool>,
    misses: AtomicU32,
}

impl RenewalTask {
    pub(crate) fn new(
        key: String,
        token: LockToken,
        ttl: Duration,
        interval: Duration,
        store: Arc<dyn BlockingLockStore>,
        lost: Arc<AtomicBool>,
    ) -> Self {
        Self {
            key,
            token,
            ttl,
            interval,
            store,
            stopped: AtomicBool::new(false),
            lost,
            misses: AtomicU32::new(0),
        }
    }

    fn is_finished(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.lost.load(Ordering::SeqCst)
    }

    fn renew(&self) {
        match self.store.try_extend(&self.key, &self.token, self.ttl) {
            Ok(true) => {
                self.misses.store(0, Ordering::SeqCst);
                debug!("lease renewed for '{}'", self.key);
            }
            Ok(false) => {
                error!("lease lost for '{}': token no longer stored", self.key);
                self.lost.store(true, Ordering::SeqCst);
            }
            Err(err) => {
                let interval_ms = self.interval.as_millis().max(1);
                let max_misses = ((self.ttl.as_millis() + interval_ms - 1) / interval_ms).max(1) as u32;
                let misses = self.misses.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("lease renewal attempt {misses}/{max_misses} failed for '{}': {err}", self.key);
                if misses >= max_misses {
                    error!("lease presumed lapsed for '{}' after {misses} missed renewals", self.key);
                    self.lost.store(true, Ordering::SeqCst);
                }
            }
        }
    }
}

/// Cancellation handle owned by the guard that registered the task.
///
/// Cancelling is raising the stop flag; the pool discards the task the next
/// time it surfaces. Idempotent, and safe when the task never ran.
#[derive(Debug)]
pub(crate) struct RenewalHandle {
    task: Arc<RenewalTask>,
}

impl RenewalHandle {
    pub(crate) fn cancel(&self) {
        self.task.stopped.store(true, Ordering::SeqCst);
    }
}

impl Drop for RenewalHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    task: Arc<RenewalTask>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Earliest deadline first on top of the max-heap
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due)
    }
}

#[derive(Debug)]
struct Shared {
    schedule: Mutex<BinaryHeap<Scheduled>>,
    wakeup: Condvar,
}

impl Shared {
    fn schedule(&self) -> MutexGuard<'_, BinaryHeap<Scheduled>> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded worker pool multiplexing lease renewals for all blocking locks.
///
/// A fixed set of OS threads pops the earliest-due task from a deadline
/// heap, performs the token-guarded extension, and reschedules the task one
/// interval later unless it was cancelled or the lease was lost.
#[derive(Debug)]
pub(crate) struct RenewerPool {
    shared: Arc<Shared>,
}

impl RenewerPool {
    pub(crate) fn new(workers: usize) -> Self {
        let shared = Arc::new(Shared {
            schedule: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
        });

        for index in 0..workers.max(1) {
            let shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("locksmith-renewer-{index}"))
                .spawn(move || worker_loop(&shared));
            if let Err(err) = spawned {
                error!("failed to spawn renewer worker {index}: {err}");
            }
        }

        Self { shared }
    }

    /// Schedule renewals for a newly held lock; the first attempt runs one
    /// interval from now.
    pub(crate) fn register(&self, task: RenewalTask) -> RenewalHandle {
        let task = Arc::new(task);
        let due = Instant::now() + task.interval;

        let mut schedule = self.shared.schedule();
        schedule.push(Scheduled { due, task: task.clone() });
        drop(schedule);
        self.shared.wakeup.notify_one();

        RenewalHandle { task }
    }
}

fn worker_loop(shared: &Shared) {
    enum Next {
        Idle,
        Sleep(Duration),
        Run,
    }

    let mut schedule = shared.schedule();
    loop {
        let now = Instant::now();
        let next = match schedule.peek() {
            None => Next::Idle,
            Some(scheduled) if scheduled.due > now => Next::Sleep(scheduled.due - now),
            Some(_) => Next::Run,
        };

        match next {
            Next::Idle => {
                schedule = shared.wakeup.wait(schedule).unwrap_or_else(PoisonError::into_inner);
            }
            Next::Sleep(wait) => {
                let (guard, _) = shared
                    .wakeup
                    .wait_timeout(schedule, wait)
                    .unwrap_or_else(PoisonError::into_inner);
                schedule = guard;
            }
            Next::Run => {
                let Some(scheduled) = schedule.pop() else { continue };
                drop(schedule);

                let task = scheduled.task;
                if !task.is_finished() {
                    task.renew();
                }

                schedule = shared.schedule();
                if !task.is_finished() {
                    schedule.push(Scheduled {
                        due: Instant::now() + task.interval,
                        task,
                    });
                    shared.wakeup.notify_one();
                }
            }
        }
    }
}
