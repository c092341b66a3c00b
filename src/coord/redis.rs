//! Redis-backed coordination: queue hashes/sets, pair locks, pub/sub.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{cmd, AsyncCommands, Client, Script};
use tokio::sync::mpsc;

use super::CoordBackend;

/// Release only while the token still matches the holder.
const UNLOCK_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

pub struct RedisBackend {
    client: Client,
}

impl RedisBackend {
    pub fn new(client: Client) -> Self {
        RedisBackend { client }
    }

    pub fn open(url: &str) -> Result<Self> {
        Ok(RedisBackend {
            client: Client::open(url)?,
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CoordBackend for RedisBackend {
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        let mut conn = self.conn().await?;
        let map: Vec<(String, String)> = conn.hgetall(key).await?;
        Ok(map)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn set_del(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn set_size(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        let size: usize = conn.scard(key).await?;
        Ok(size)
    }

    async fn try_lock(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.conn().await?;
        // SET key token NX PX ttl; nil reply means someone else holds it
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i32 = Script::new(UNLOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.ping::<String>().await?;
        Ok(())
    }
}
