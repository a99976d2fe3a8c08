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

//! Example demonstrating contending workers coordinated through one lock

use std::sync::Arc;
use std::time::Duration;

use locksmith_lock::{Lock, LockConfig, MemoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::new());
    let config = LockConfig::default()
        .with_ttl(Duration::from_secs(2))
        .with_retry_interval(Duration::from_millis(50))
        .with_acquire_timeout(Duration::from_secs(10));

    let mut workers = Vec::new();
    for id in 0..3 {
        let lock = Lock::with_config(store.clone(), "inventory:rebalance", config.clone())?;
        workers.push(tokio::spawn(async move {
            let outcome = lock
                .with_lock(|| async {
                    println!("worker {id} entered the critical section");
                    // Longer than the TTL: the watchdog keeps the lease alive
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    println!("worker {id} leaving the critical section");
                })
                .await;

            match outcome {
                Ok(()) => println!("worker {id} finished"),
                Err(err) => println!("worker {id} failed: {err}"),
            }
        }));
    }

    for worker in workers {
        worker.await?;
    }

    Ok(())
}
