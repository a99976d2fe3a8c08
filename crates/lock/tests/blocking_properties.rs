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

//! Cross-component properties of the preemptive-model lock, mirroring the
//! async suite over OS threads and the shared renewer pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use locksmith_lock::blocking::Lock;
use locksmith_lock::{BlockingLockStore, LockConfig, LockToken, MemoryStore, Result};

/// Store wrapper that counts extension calls reaching the backend
#[derive(Debug, Default)]
struct CountingStore {
    inner: MemoryStore,
    extends: AtomicUsize,
}

impl CountingStore {
    fn extend_calls(&self) -> usize {
        self.extends.load(Ordering::SeqCst)
    }
}

impl BlockingLockStore for CountingStore {
    fn try_set(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        BlockingLockStore::try_set(&self.inner, key, token, ttl)
    }

    fn try_extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        self.extends.fetch_add(1, Ordering::SeqCst);
        BlockingLockStore::try_extend(&self.inner, key, token, ttl)
    }

    fn try_delete(&self, key: &str, token: &LockToken) -> Result<bool> {
        BlockingLockStore::try_delete(&self.inner, key, token)
    }
}

fn contended_config() -> LockConfig {
    LockConfig::default()
        .with_ttl(Duration::from_millis(400))
        .with_retry_interval(Duration::from_millis(10))
        .with_acquire_timeout(Duration::from_secs(10))
}

#[test]
fn racing_threads_hold_one_at_a_time() {
    let store = Arc::new(MemoryStore::new());
    let in_section = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..6 {
        let lock = Lock::with_config(store.clone(), "race:key", contended_config()).unwrap();
        let in_section = in_section.clone();
        let completed = completed.clone();

        threads.push(thread::spawn(move || {
            for _ in 0..3 {
                lock.with_lock(|| {
                    assert!(!in_section.swap(true, Ordering::SeqCst), "two holders in the critical section");
                    thread::sleep(Duration::from_millis(5));
                    in_section.store(false, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }));
    }

    for handle in threads {
        handle.join().unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 18);
}

#[test]
fn lease_survives_critical_section_longer_than_ttl() {
    let store = Arc::new(MemoryStore::new());
    let config = LockConfig::default()
        .with_ttl(Duration::from_millis(300))
        .with_retry_interval(Duration::from_millis(20))
        .with_acquire_timeout(Duration::from_millis(100));
    let lock = Lock::with_config(store.clone(), "survive:key", config.clone()).unwrap();

    let mut guard = lock.acquire().unwrap().expect("uncontended acquire");

    let contender = Lock::with_config(store.clone(), "survive:key", config).unwrap();
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(200));
        assert!(guard.is_held());
        assert!(contender.try_acquire().unwrap().is_none(), "lease was reclaimable while held");
    }

    guard.release().unwrap();
    assert!(contender.try_acquire().unwrap().is_some());
}

#[test]
fn abandoned_lease_is_reclaimed_only_after_ttl() {
    let store = Arc::new(MemoryStore::new());
    let ttl = Duration::from_millis(300);
    let config = LockConfig::default()
        .with_ttl(ttl)
        .with_retry_interval(Duration::from_millis(20))
        .with_acquire_timeout(Duration::from_secs(5));
    let lock = Lock::with_config(store.clone(), "abandon:key", config).unwrap();

    let mut holder = lock.acquire().unwrap().expect("uncontended acquire");
    holder.disarm();
    drop(holder);
    let abandoned_at = Instant::now();

    assert!(lock.try_acquire().unwrap().is_none());

    let reacquired = lock.acquire().unwrap();
    assert!(reacquired.is_some(), "abandoned lease never became reclaimable");
    let waited = abandoned_at.elapsed();
    assert!(waited >= ttl / 2, "reclaimed after only {waited:?}");
    assert!(waited <= ttl + Duration::from_millis(500), "reclaim took {waited:?}");
}

#[test]
fn no_extension_calls_after_release_settles() {
    let store = Arc::new(CountingStore::default());
    let config = LockConfig::default()
        .with_ttl(Duration::from_millis(150))
        .with_retry_interval(Duration::from_millis(10))
        .with_acquire_timeout(Duration::from_millis(100));
    let lock = Lock::with_config(store.clone(), "terminate:key", config).unwrap();

    let mut guard = lock.acquire().unwrap().expect("uncontended acquire");

    thread::sleep(Duration::from_millis(300));
    assert!(store.extend_calls() >= 2);

    guard.release().unwrap();
    // A renewal popped just before the stop flag was raised may still land
    thread::sleep(Duration::from_millis(100));
    let after_release = store.extend_calls();

    thread::sleep(Duration::from_millis(300));
    assert_eq!(store.extend_calls(), after_release, "renewer extended the lease after release");
}

#[test]
fn release_without_contention_empties_store() {
    let store = Arc::new(MemoryStore::new());
    let lock = Lock::with_config(store.clone(), "empty:key", contended_config()).unwrap();

    let mut guard = lock.acquire().unwrap().expect("uncontended acquire");
    guard.release().unwrap();
    guard.release().unwrap();
    assert!(store.is_empty());
}
