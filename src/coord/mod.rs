//! Coordination backend shared by every server instance.
//!
//! One trait, two implementations: Redis for real deployments, an
//! in-process map for tests and for degraded operation when Redis is
//! unreachable. Queue storage, pair locks and pub/sub all go through
//! here; nothing else is shared across instances.

pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

#[async_trait]
pub trait CoordBackend: Send + Sync {
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hash_del(&self, key: &str, field: &str) -> Result<bool>;
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;
    async fn set_del(&self, key: &str, member: &str) -> Result<bool>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;
    async fn set_size(&self, key: &str) -> Result<usize>;

    /// SET NX PX semantics: true iff the lock was taken by `token`.
    async fn try_lock(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool>;
    /// Delete only while still held by `token`.
    async fn unlock(&self, key: &str, token: &str) -> Result<()>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>>;

    async fn ping(&self) -> Result<()>;
}

/// Try Redis first, fall back to the local map and flag degraded mode.
macro_rules! routed {
    ($self:ident . $method:ident ( $($arg:expr),* )) => {{
        if let Some(r) = $self.healthy_redis() {
            match r.$method($($arg),*).await {
                Ok(v) => return Ok(v),
                Err(e) => $self.demote(stringify!($method), &e),
            }
        }
        $self.local.$method($($arg),*).await
    }};
}

/// Facade the rest of the server talks to.
///
/// Routes to Redis while it is healthy; any Redis error demotes to the
/// in-process backend (no cross-server safety, still internally
/// consistent) until the health probe sees Redis answer again.
pub struct Coordination {
    redis: Option<RedisBackend>,
    local: MemoryBackend,
    degraded: AtomicBool,
}

impl Coordination {
    pub fn new(redis: Option<RedisBackend>) -> Self {
        Coordination {
            redis,
            local: MemoryBackend::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn local_only() -> Self {
        Self::new(None)
    }

    pub fn is_degraded(&self) -> bool {
        self.redis.is_none() || self.degraded.load(Ordering::Relaxed)
    }

    fn healthy_redis(&self) -> Option<&RedisBackend> {
        if self.degraded.load(Ordering::Relaxed) {
            None
        } else {
            self.redis.as_ref()
        }
    }

    fn demote(&self, op: &str, err: &anyhow::Error) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            log::error!("coordination backend demoted to local mode ({op}): {err:?}");
            crate::metrics::DEGRADED_MODE.set(1);
        }
        crate::metrics::COORD_FALLBACKS.inc();
    }

    /// Periodically ping Redis and promote back once it answers.
    pub fn spawn_health_probe(self: Arc<Self>, interval: Duration) {
        let coord = self;
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(r) = coord.redis.as_ref() else { continue };
                match r.ping().await {
                    Ok(()) => {
                        if coord.degraded.swap(false, Ordering::Relaxed) {
                            log::info!("coordination backend promoted back to Redis");
                            crate::metrics::DEGRADED_MODE.set(0);
                        }
                    }
                    Err(e) => {
                        if !coord.degraded.swap(true, Ordering::Relaxed) {
                            log::error!("coordination health probe failed: {e:?}");
                            crate::metrics::DEGRADED_MODE.set(1);
                        }
                    }
                }
            }
        });
    }

    pub async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        routed!(self.hash_set(key, field, value))
    }

    pub async fn hash_del(&self, key: &str, field: &str) -> Result<bool> {
        routed!(self.hash_del(key, field))
    }

    pub async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        routed!(self.hash_get_all(key))
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        routed!(self.set_add(key, member))
    }

    pub async fn set_del(&self, key: &str, member: &str) -> Result<bool> {
        routed!(self.set_del(key, member))
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        routed!(self.set_members(key))
    }

    pub async fn set_size(&self, key: &str) -> Result<usize> {
        routed!(self.set_size(key))
    }

    pub async fn try_lock(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        routed!(self.try_lock(key, token, ttl_ms))
    }

    pub async fn unlock(&self, key: &str, token: &str) -> Result<()> {
        routed!(self.unlock(key, token))
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        routed!(self.set_ex(key, value, ttl_secs))
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        routed!(self.del(key))
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        routed!(self.publish(channel, payload))
    }

    pub async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        routed!(self.subscribe(channel))
    }

    pub async fn ping(&self) -> Result<()> {
        routed!(self.ping())
    }
}
