//! Fleet coordination: distributed locks and liveness heartbeat
//!
//! Locks are keyed by tenant id and owned by exactly one fleet member at a
//! time. Acquisition is always non-blocking; contention is a normal outcome,
//! not an error. Held locks carry a TTL and must be refreshed through the
//! coordinator heartbeat — the TTL expiring is the backstop that frees a
//! tenant when its holder dies mid-run.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use tollgate_common::{Result, TollgateError};

/// Default lock TTL; a heartbeat must land within this window
const DEFAULT_LOCK_TTL_MS: u64 = 30_000;

/// A fleet-wide mutual-exclusion token
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Non-blocking acquisition; false when another holder owns the lock
    async fn try_acquire(&self) -> Result<bool>;

    async fn release(&self) -> Result<()>;
}

/// Coordination backend handle: process-wide, started once, stopped once
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn get_lock(&self, name: &str) -> Arc<dyn DistributedLock>;

    /// Refresh liveness so held locks are not reclaimed
    async fn heartbeat(&self) -> Result<()>;
}

/// Build a coordinator from a connection URL.
///
/// `redis://` / `rediss://` select the Redis adapter, `memory://` the
/// in-process adapter used by tests and single-node runs.
pub fn get_coordinator(url: &str, member_id: &str) -> Result<Arc<dyn Coordinator>> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        Ok(Arc::new(RedisCoordinator::new(url, member_id)?))
    } else if url.starts_with("memory://") {
        Ok(Arc::new(MemoryCoordinator::new(member_id)))
    } else {
        Err(TollgateError::Coordination(format!(
            "unsupported coordination url '{}'",
            url
        )))
    }
}

// ---------------------------------------------------------------------------
// In-process coordinator
// ---------------------------------------------------------------------------

/// In-process lock table shared by every member cloned from it
pub struct MemoryCoordinator {
    member_id: String,
    locks: Arc<DashMap<String, String>>,
}

impl MemoryCoordinator {
    pub fn new(member_id: &str) -> Self {
        Self {
            member_id: member_id.to_string(),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Another fleet member sharing this coordinator's lock table.
    ///
    /// Lets tests simulate cross-process contention inside one process.
    pub fn peer(&self, member_id: &str) -> Self {
        Self {
            member_id: member_id.to_string(),
            locks: self.locks.clone(),
        }
    }
}

struct MemoryLock {
    name: String,
    member_id: String,
    locks: Arc<DashMap<String, String>>,
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn try_acquire(&self) -> Result<bool> {
        match self.locks.entry(self.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(self.member_id.clone());
                Ok(true)
            }
        }
    }

    async fn release(&self) -> Result<()> {
        self.locks
            .remove_if(&self.name, |_, holder| holder == &self.member_id);
        Ok(())
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Free everything this member still holds
        self.locks.retain(|_, holder| holder != &self.member_id);
        Ok(())
    }

    fn get_lock(&self, name: &str) -> Arc<dyn DistributedLock> {
        Arc::new(MemoryLock {
            name: name.to_string(),
            member_id: self.member_id.clone(),
            locks: self.locks.clone(),
        })
    }

    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redis coordinator
// ---------------------------------------------------------------------------

// Delete the key only while we still hold it
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

// Refresh the TTL only while we still hold the key
const REFRESH_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
"#;

struct RedisInner {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    member_id: String,
    prefix: String,
    ttl_ms: u64,
    // Lock keys currently held by this member, refreshed on heartbeat
    held: DashMap<String, ()>,
}

impl RedisInner {
    async fn get_connection(&self) -> Result<MultiplexedConnection> {
        let guard = self.connection.read().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        drop(guard);

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                TollgateError::Coordination(format!("failed to connect to coordination backend: {}", e))
            })?;

        *guard = Some(connection.clone());
        Ok(connection)
    }
}

/// Redis-backed coordinator: token locks with TTL, scripted release/refresh
pub struct RedisCoordinator {
    inner: Arc<RedisInner>,
}

impl RedisCoordinator {
    pub fn new(url: &str, member_id: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| {
            TollgateError::Coordination(format!("invalid coordination url: {}", e))
        })?;

        Ok(Self {
            inner: Arc::new(RedisInner {
                client,
                connection: RwLock::new(None),
                member_id: member_id.to_string(),
                prefix: "tollgate:lock".to_string(),
                ttl_ms: DEFAULT_LOCK_TTL_MS,
                held: DashMap::new(),
            }),
        })
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.ttl_ms = ttl_ms;
        }
        self
    }
}

struct RedisLock {
    inner: Arc<RedisInner>,
    key: String,
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self) -> Result<bool> {
        let mut conn = self.inner.get_connection().await?;
        // SET key member NX PX ttl
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.inner.member_id)
            .arg("NX")
            .arg("PX")
            .arg(self.inner.ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| TollgateError::Coordination(format!("lock acquire failed: {}", e)))?;

        let acquired = acquired.is_some();
        if acquired {
            self.inner.held.insert(self.key.clone(), ());
            debug!(key = %self.key, "acquired lock");
        }
        Ok(acquired)
    }

    async fn release(&self) -> Result<()> {
        let mut conn = self.inner.get_connection().await?;
        let released: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.inner.member_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| TollgateError::Coordination(format!("lock release failed: {}", e)))?;

        self.inner.held.remove(&self.key);
        if released == 0 {
            // TTL expiry already reclaimed it; the holder was too slow
            warn!(key = %self.key, "lock was no longer held at release");
        }
        Ok(())
    }
}

#[async_trait]
impl Coordinator for RedisCoordinator {
    async fn start(&self) -> Result<()> {
        // Connect eagerly so a bad URL fails startup, not the first lock
        self.inner.get_connection().await?;
        info!(member_id = %self.inner.member_id, "coordination started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let keys: Vec<String> = self
            .inner
            .held
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut conn = self.inner.get_connection().await?;
        for key in keys {
            let _: i64 = Script::new(RELEASE_SCRIPT)
                .key(&key)
                .arg(&self.inner.member_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| {
                    TollgateError::Coordination(format!("lock release failed: {}", e))
                })?;
            self.inner.held.remove(&key);
        }
        *self.inner.connection.write().await = None;
        info!(member_id = %self.inner.member_id, "coordination stopped");
        Ok(())
    }

    fn get_lock(&self, name: &str) -> Arc<dyn DistributedLock> {
        Arc::new(RedisLock {
            inner: self.inner.clone(),
            key: format!("{}:{}", self.inner.prefix, name),
        })
    }

    async fn heartbeat(&self) -> Result<()> {
        let keys: Vec<String> = self
            .inner
            .held
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.inner.get_connection().await?;
        for key in keys {
            let refreshed: i64 = Script::new(REFRESH_SCRIPT)
                .key(&key)
                .arg(&self.inner.member_id)
                .arg(self.inner.ttl_ms)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| {
                    TollgateError::Coordination(format!("heartbeat failed: {}", e))
                })?;
            if refreshed == 0 {
                warn!(key = %key, "held lock expired before heartbeat");
                self.inner.held.remove(&key);
            }
        }
        Ok(())
    }
}
