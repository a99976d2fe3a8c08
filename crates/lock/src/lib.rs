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

//! Lease-based distributed locks with watchdog renewal.
//!
//! Callers across independent processes coordinate access to a named
//! critical section through a shared key-value store, which arbitrates
//! mutual exclusion with three atomic primitives (see [`LockStore`]). Every
//! acquisition mints a fresh [`LockToken`]; a background watchdog renews the
//! lease at a third of its TTL while the critical section runs, so a live
//! holder is never silently dispossessed, while a crashed holder's key still
//! expires on its own.
//!
//! ```
//! use std::sync::Arc;
//! use locksmith_lock::{Lock, MemoryStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> locksmith_lock::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let lock = Lock::new(store, "reports:rebuild");
//!
//! lock.with_lock(|| async {
//!     // exclusive across every process sharing the store
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Callers on plain OS threads use the [`blocking`] module, which shares the
//! same protocol but multiplexes renewals over a bounded worker pool.

pub mod blocking;
pub mod config;
pub mod error;
pub mod guard;
pub mod lock;
pub mod store;
pub mod types;

mod watchdog;

pub use crate::{
    config::LockConfig,
    error::{LockError, Result},
    guard::LockGuard,
    lock::Lock,
    store::{BlockingLockStore, LockStore, MemoryStore},
    types::{LockState, LockToken},
};

/// Current version of the lock crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
