use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{Client, Script};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::store::{BackingStore, Subscription};

/// Deletes the lock only while it still holds the caller's token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed [`BackingStore`].
///
/// Regular commands share one multiplexed connection. Blocking pops and
/// subscriptions open their own connection so they never stall the shared one.
pub struct RedisStore {
    client: Client,
    connection: MultiplexedConnection,
    unlock_script: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| Error::BackingStore(format!("Failed to create Redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| Error::BackingStore(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            client,
            connection,
            unlock_script: Script::new(UNLOCK_SCRIPT),
        })
    }

    async fn dedicated_connection(&self) -> Result<redis::aio::Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| Error::BackingStore(format!("Failed to open Redis connection: {}", e)))
    }
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| Error::BackingStore(format!("Ping failed: {}", e)))
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackingStore(format!("LRANGE {} failed: {}", key, e)))
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.connection.clone();
        redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackingStore(format!("LLEN {} failed: {}", key, e)))
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        redis::cmd("LPOP")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackingStore(format!("LPOP {} failed: {}", key, e)))
    }

    async fn blocking_pop_front(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.dedicated_connection().await?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackingStore(format!("BLPOP {} failed: {}", key, e)))?;
        Ok(popped.map(|(_, item)| item))
    }

    async fn upsert_front(&self, key: &str, item: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(item)
            .ignore()
            .cmd("LPUSH")
            .arg(key)
            .arg(item)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Error::BackingStore(format!("Upsert into {} failed: {}", key, e)))
    }

    async fn remove_item(&self, key: &str, item: &str) -> Result<usize> {
        let mut conn = self.connection.clone();
        redis::cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(item)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackingStore(format!("LREM {} failed: {}", key, e)))
    }

    async fn replace_list(&self, key: &str, items: &[String]) -> Result<()> {
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        if !items.is_empty() {
            pipe.cmd("RPUSH").arg(key).arg(items).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Error::BackingStore(format!("Failed to replace list {}: {}", key, e)))
    }

    async fn try_acquire_lock(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackingStore(format!("Failed to acquire lock {}: {}", key, e)))?;
        Ok(reply.is_some())
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let deleted: i64 = self
            .unlock_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::BackingStore(format!("Failed to release lock {}: {}", key, e)))?;
        Ok(deleted > 0)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async::<_, i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| Error::BackingStore(format!("PUBLISH {} failed: {}", channel, e)))
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self.dedicated_connection().await?.into_pubsub();
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| Error::BackingStore(format!("SUBSCRIBE {} failed: {}", channel, e)))?;
        Ok(Box::new(RedisSubscription { pubsub }))
    }
}

struct RedisSubscription {
    pubsub: PubSub,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>> {
        let mut messages = self.pubsub.on_message();
        match tokio::time::timeout(timeout, messages.next()).await {
            Err(_) => Ok(None),
            Ok(Some(msg)) => {
                let payload: String = msg.get_payload().map_err(|e| {
                    Error::BackingStore(format!("Malformed pub/sub payload: {}", e))
                })?;
                Ok(Some(payload))
            }
            Ok(None) => Err(Error::BackingStore("Subscription stream ended".into())),
        }
    }
}
