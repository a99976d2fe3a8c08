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

//! Redis store adapter for locksmith distributed locks.
//!
//! Implements the store contract with single-round-trip atomic commands:
//! acquisition is `SET key token NX PX ttl`, and extension and deletion run
//! server-side Lua scripts that compare the stored token before acting, so a
//! holder whose lease already lapsed can never touch the next holder's key.
//!
//! ```no_run
//! use std::sync::Arc;
//! use locksmith_lock::Lock;
//! use locksmith_redis::RedisStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> locksmith_lock::Result<()> {
//! let store = Arc::new(RedisStore::connect("redis://127.0.0.1/").await?);
//! let lock = Lock::new(store, "reports:rebuild");
//!
//! lock.with_lock(|| async {
//!     // exclusive across every process sharing this Redis
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::debug;

use locksmith_lock::{BlockingLockStore, LockError, LockStore, LockToken, Result};

/// Namespace prefix applied to every lock key
pub const DEFAULT_KEY_PREFIX: &str = "locksmith:";

/// Extend the key's expiry only while it still holds the caller's token
const EXTEND_SRC: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
";

/// Delete the key only while it still holds the caller's token
const RELEASE_SRC: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
";

static EXTEND_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(EXTEND_SRC));
static RELEASE_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(RELEASE_SRC));

fn store_err(err: redis::RedisError) -> LockError {
    LockError::store_with(err.to_string(), err)
}

fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().max(1) as u64
}

/// Async Redis store using a managed, auto-reconnecting connection.
///
/// Cheap to share: the connection multiplexes commands from many
/// simultaneous locks without cross-contamination of in-flight commands.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Connect to the Redis instance at `url`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(store_err)?;
        let conn = client.get_connection_manager().await.map_err(store_err)?;
        debug!("redis lock store connected");
        Ok(Self {
            conn,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    /// Replace the key namespace prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("prefix", &self.prefix).finish()
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn try_set(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(reply.is_some())
    }

    async fn try_extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = EXTEND_SCRIPT
            .key(self.full_key(key))
            .arg(token.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(extended > 0)
    }

    async fn try_delete(&self, key: &str, token: &LockToken) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = RELEASE_SCRIPT
            .key(self.full_key(key))
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(deleted > 0)
    }
}

/// Blocking Redis store for the preemptive model.
///
/// Serializes commands over one synchronous connection; suitable for the
/// renewal cadence and acquisition retries of thread-based callers.
pub struct BlockingRedisStore {
    conn: Mutex<redis::Connection>,
    prefix: String,
}

impl BlockingRedisStore {
    /// Connect to the Redis instance at `url` and verify it responds
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(store_err)?;
        let mut conn = client.get_connection().map_err(store_err)?;
        let _: String = redis::cmd("PING").query(&mut conn).map_err(store_err)?;
        debug!("redis lock store connected");
        Ok(Self {
            conn: Mutex::new(conn),
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    /// Replace the key namespace prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn conn(&self) -> MutexGuard<'_, redis::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BlockingRedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingRedisStore").field("prefix", &self.prefix).finish()
    }
}

impl BlockingLockStore for BlockingRedisStore {
    fn try_set(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query(&mut *conn)
            .map_err(store_err)?;
        Ok(reply.is_some())
    }

    fn try_extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn();
        let extended: i64 = EXTEND_SCRIPT
            .key(self.full_key(key))
            .arg(token.as_str())
            .arg(ttl_millis(ttl))
            .invoke(&mut *conn)
            .map_err(store_err)?;
        Ok(extended > 0)
    }

    fn try_delete(&self, key: &str, token: &LockToken) -> Result<bool> {
        let mut conn = self.conn();
        let deleted: i64 = RELEASE_SCRIPT
            .key(self.full_key(key))
            .arg(token.as_str())
            .invoke(&mut *conn)
            .map_err(store_err)?;
        Ok(deleted > 0)
    }
}
