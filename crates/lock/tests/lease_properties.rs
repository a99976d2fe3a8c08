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

//! Cross-component properties of the async lock: mutual exclusion, lease
//! survival and reclamation, and watchdog termination.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use locksmith_lock::{Lock, LockConfig, LockStore, LockToken, MemoryStore, Result};

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

#[async_trait]
impl LockStore for CountingStore {
    async fn try_set(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        LockStore::try_set(&self.inner, key, token, ttl).await
    }

    async fn try_extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        self.extends.fetch_add(1, Ordering::SeqCst);
        LockStore::try_extend(&self.inner, key, token, ttl).await
    }

    async fn try_delete(&self, key: &str, token: &LockToken) -> Result<bool> {
        LockStore::try_delete(&self.inner, key, token).await
    }
}

fn contended_config() -> LockConfig {
    LockConfig::default()
        .with_ttl(Duration::from_millis(400))
        .with_retry_interval(Duration::from_millis(10))
        .with_acquire_timeout(Duration::from_secs(10))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_acquirers_hold_one_at_a_time() {
    let store = Arc::new(MemoryStore::new());
    let in_section = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let lock = Lock::with_config(store.clone(), "race:key", contended_config()).unwrap();
        let in_section = in_section.clone();
        let completed = completed.clone();

        tasks.push(tokio::spawn(async move {
            for _ in 0..3 {
                lock.with_lock(|| async {
                    assert!(!in_section.swap(true, Ordering::SeqCst), "two holders in the critical section");
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_section.store(false, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 24);
}

#[tokio::test]
async fn non_blocking_contender_fails_while_held() {
    let store = Arc::new(MemoryStore::new());
    let lock = Lock::with_config(store.clone(), "race:key", contended_config()).unwrap();

    let _held = lock.acquire().await.unwrap().expect("uncontended acquire");
    assert!(lock.try_acquire().await.unwrap().is_none());
}

#[tokio::test]
async fn lease_survives_critical_section_longer_than_ttl() {
    let store = Arc::new(MemoryStore::new());
    let config = LockConfig::default()
        .with_ttl(Duration::from_millis(300))
        .with_retry_interval(Duration::from_millis(20))
        .with_acquire_timeout(Duration::from_millis(100));
    let lock = Lock::with_config(store.clone(), "survive:key", config.clone()).unwrap();

    let mut guard = lock.acquire().await.unwrap().expect("uncontended acquire");

    // Run well past several TTLs; the watchdog keeps the lease alive
    let contender = Lock::with_config(store.clone(), "survive:key", config).unwrap();
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(guard.is_held());
        assert!(contender.try_acquire().await.unwrap().is_none(), "lease was reclaimable while held");
    }

    guard.release().await.unwrap();
    assert!(contender.try_acquire().await.unwrap().is_some());
}

#[tokio::test]
async fn abandoned_lease_is_reclaimed_only_after_ttl() {
    let store = Arc::new(MemoryStore::new());
    let ttl = Duration::from_millis(300);
    let config = LockConfig::default()
        .with_ttl(ttl)
        .with_retry_interval(Duration::from_millis(20))
        .with_acquire_timeout(Duration::from_secs(5));
    let lock = Lock::with_config(store.clone(), "abandon:key", config).unwrap();

    // Simulate a crash: stop renewing without releasing
    let mut holder = lock.acquire().await.unwrap().expect("uncontended acquire");
    holder.disarm();
    drop(holder);
    let abandoned_at = Instant::now();

    // Never reclaimable before the TTL window opens
    assert!(lock.try_acquire().await.unwrap().is_none());

    let reacquired = lock.acquire().await.unwrap();
    assert!(reacquired.is_some(), "abandoned lease never became reclaimable");
    let waited = abandoned_at.elapsed();
    assert!(waited >= ttl / 2, "reclaimed after only {waited:?}");
    assert!(waited <= ttl + Duration::from_millis(500), "reclaim took {waited:?}");
}

#[tokio::test]
async fn no_extension_calls_after_release_returns() {
    let store = Arc::new(CountingStore::default());
    let config = LockConfig::default()
        .with_ttl(Duration::from_millis(150))
        .with_retry_interval(Duration::from_millis(10))
        .with_acquire_timeout(Duration::from_millis(100));
    let lock = Lock::with_config(store.clone(), "terminate:key", config).unwrap();

    let mut guard = lock.acquire().await.unwrap().expect("uncontended acquire");

    // Let several renewals land
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(store.extend_calls() >= 2);

    guard.release().await.unwrap();
    let after_release = store.extend_calls();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.extend_calls(), after_release, "watchdog extended the lease after release");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_critical_section_still_releases() {
    let store = Arc::new(MemoryStore::new());
    let config = LockConfig::default()
        .with_ttl(Duration::from_millis(300))
        .with_retry_interval(Duration::from_millis(20))
        .with_acquire_timeout(Duration::from_secs(1));
    let lock = Lock::with_config(store.clone(), "cancel:key", config).unwrap();

    let task = tokio::spawn({
        let lock = lock.clone();
        async move {
            lock.with_lock(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
            .await
        }
    });

    // Wait until the section is running, then cancel it mid-flight
    let deadline = Instant::now() + Duration::from_secs(2);
    while store.stored_token("cancel:key").is_none() {
        assert!(Instant::now() < deadline, "lock was never acquired");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    task.abort();

    // The guard's drop path must still release the key
    let deadline = Instant::now() + Duration::from_secs(2);
    while store.stored_token("cancel:key").is_some() {
        assert!(Instant::now() < deadline, "cancelled section never released the lock");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn sequential_tokens_are_distinct_in_store() {
    let store = Arc::new(MemoryStore::new());
    let lock = Lock::with_config(store.clone(), "tokens:key", contended_config()).unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let mut guard = lock.acquire().await.unwrap().expect("uncontended acquire");
        let stored = store.stored_token("tokens:key").expect("token must be stored while held");
        assert_eq!(stored, guard.token().as_str());
        assert!(!seen.contains(&stored));
        seen.push(stored);
        guard.release().await.unwrap();
    }
}
