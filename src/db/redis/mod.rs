pub mod documents;
pub mod keys;
pub mod lock;

pub use documents::RedisDocumentStore;
pub use keys::RedisKey;
pub use lock::RedisLockStore;

use redis::Client;

/// Creates a Redis client shared by the lock and document stores
///
/// Connections are multiplexed per call via `get_multiplexed_async_connection`.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}
