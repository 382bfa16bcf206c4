use redis::Client;
use std::time::Duration;

use crate::db::LockStore;
use crate::error::AppResult;

/// Deletes the key only while it still holds the caller's token
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock store on top of `SET key token NX EX ttl`
#[derive(Clone)]
pub struct RedisLockStore {
    redis_client: Client,
}

impl RedisLockStore {
    pub fn new(redis_client: Client) -> Self {
        Self { redis_client }
    }
}

#[async_trait::async_trait]
impl LockStore for RedisLockStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        let acquired = reply.is_some();
        tracing::debug!(key = %key, acquired, "Lock acquisition attempted");
        Ok(acquired)
    }

    async fn release(&self, key: &str, token: &str) -> AppResult<bool> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            tracing::warn!(key = %key, "Lock was no longer held by this owner");
        }
        Ok(deleted > 0)
    }
}
