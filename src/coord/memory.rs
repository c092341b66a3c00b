//! In-process coordination backend.
//!
//! Same observable semantics as the Redis backend, minus cross-server
//! visibility. Used directly in tests and as the degraded-mode fallback.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use super::CoordBackend;

pub struct MemoryBackend {
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, HashSet<String>>,
    /// lock key → (holder token, expiry)
    locks: DashMap<String, (String, Instant)>,
    /// plain keys with optional expiry
    kv: DashMap<String, (String, Option<Instant>)>,
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            hashes: DashMap::new(),
            sets: DashMap::new(),
            locks: DashMap::new(),
            kv: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordBackend for MemoryBackend {
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self
            .hashes
            .get_mut(key)
            .map(|mut h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_del(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .get_mut(key)
            .map(|mut s| s.remove(member))
            .unwrap_or(false))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_size(&self, key: &str) -> Result<usize> {
        Ok(self.sets.get(key).map(|s| s.len()).unwrap_or(0))
    }

    async fn try_lock(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        let expiry = Instant::now() + std::time::Duration::from_millis(ttl_ms);
        let mut entry = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| (token.to_string(), expiry));
        if entry.0 == token {
            // fresh insert, or re-entry by the same holder: refresh TTL
            *entry = (token.to_string(), expiry);
            return Ok(true);
        }
        if entry.1 <= Instant::now() {
            // previous holder expired
            *entry = (token.to_string(), expiry);
            return Ok(true);
        }
        Ok(false)
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<()> {
        self.locks
            .remove_if(key, |_, (holder, _)| holder == token);
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let expiry = Instant::now() + std::time::Duration::from_secs(ttl_secs);
        self.kv
            .insert(key.to_string(), (value.to_string(), Some(expiry)));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.kv.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // no subscribers is not an error, same as Redis
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let mut rx = self.sender(channel).subscribe();
        let (tx, out) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(out)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
