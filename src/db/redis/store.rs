use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, IntoConnectionInfo};

use crate::db::generation::StoreSlot;
use crate::db::store::KvStore;
use crate::error::{AppError, AppResult};

/// Keys written per pipeline round-trip during bulk loads
const PIPELINE_CHUNK: usize = 1000;

/// GET and DEL run server-side as one step
const DELETE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Creates a Redis client bound to the logical database `db`
pub fn create_redis_client(redis_url: &str, db: i64) -> anyhow::Result<Client> {
    let mut info = redis_url.into_connection_info()?;
    info.redis.db = db;
    let client = Client::open(info)?;
    Ok(client)
}

/// Redis-backed generational store.
///
/// Each slot maps to its own logical database (0 bookkeeping, 1 and 2 for the
/// generations) so a slot can be cleared with a single `FLUSHDB`.
#[derive(Clone)]
pub struct RedisStore {
    connections: [ConnectionManager; 3],
}

impl RedisStore {
    /// Opens one managed connection per slot
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let bookkeeping = ConnectionManager::new(create_redis_client(redis_url, 0)?).await?;
        let slot1 = ConnectionManager::new(create_redis_client(redis_url, 1)?).await?;
        let slot2 = ConnectionManager::new(create_redis_client(redis_url, 2)?).await?;

        tracing::info!("Connected generational store to Redis");

        Ok(Self {
            connections: [bookkeeping, slot1, slot2],
        })
    }

    fn conn(&self, slot: StoreSlot) -> ConnectionManager {
        self.connections[slot.index()].clone()
    }
}

/// Escapes glob metacharacters so a literal prefix can be used with `SCAN MATCH`
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait::async_trait]
impl KvStore for RedisStore {
    async fn get(&self, slot: StoreSlot, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn(slot);
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(
        &self,
        slot: StoreSlot,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> AppResult<()> {
        let mut conn = self.conn(slot);
        match ttl {
            Some(ttl) => {
                let _: () = conn.pset_ex(key, value, ttl.as_millis() as u64).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn set_if_absent(
        &self,
        slot: StoreSlot,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> AppResult<bool> {
        let mut conn = self.conn(slot);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn scan(&self, slot: StoreSlot, prefix: &str) -> AppResult<Vec<String>> {
        let mut conn = self.conn(slot);
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(glob_escape(prefix)).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn delete(&self, slot: StoreSlot, key: &str) -> AppResult<()> {
        let mut conn = self.conn(slot);
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_if_equals(
        &self,
        slot: StoreSlot,
        key: &str,
        expected: &str,
    ) -> AppResult<bool> {
        let mut conn = self.conn(slot);
        let deleted: i64 = redis::Script::new(DELETE_IF_EQUALS)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn flush(&self, slot: StoreSlot) -> AppResult<()> {
        if slot == StoreSlot::Bookkeeping {
            return Err(AppError::InvalidInput(
                "refusing to flush the bookkeeping slot".to_string(),
            ));
        }
        let mut conn = self.conn(slot);
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_many(&self, slot: StoreSlot, entries: Vec<(String, String)>) -> AppResult<()> {
        let mut conn = self.conn(slot);
        for chunk in entries.chunks(PIPELINE_CHUNK) {
            let mut pipe = redis::pipe();
            for (key, value) in chunk {
                pipe.set(key, value).ignore();
            }
            let _: () = pipe.query_async(&mut conn).await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// These tests need a running Redis; they use databases 1 and 2 of REDIS_URL.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::generation::Generation;

    async fn connect() -> Option<RedisStore> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        match RedisStore::connect(&redis_url).await {
            Ok(store) => Some(store),
            Err(e) => {
                eprintln!("skipping: Redis unavailable ({})", e);
                None
            }
        }
    }

    #[test]
    fn test_glob_escape() {
        assert_eq!(glob_escape("coinstall|"), "coinstall|*");
        assert_eq!(glob_escape("a*b?[c]"), "a\\*b\\?\\[c\\]*");
    }

    #[test]
    fn test_client_selects_database() {
        let client = create_redis_client("redis://localhost:6379", 2).unwrap();
        assert_eq!(client.get_connection_info().redis.db, 2);
    }

    #[tokio::test]
    async fn test_set_get_scan_flush() {
        let Some(store) = connect().await else {
            return;
        };
        let slot = StoreSlot::Data(Generation::Slot2);

        store
            .set_many(
                slot,
                vec![
                    ("test_scan|a".to_string(), "1".to_string()),
                    ("test_scan|b".to_string(), "2".to_string()),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            store.get(slot, "test_scan|a").await.unwrap(),
            Some("1".to_string())
        );
        let mut keys = store.scan(slot, "test_scan|").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["test_scan|a", "test_scan|b"]);

        store.flush(slot).await.unwrap();
        assert_eq!(store.get(slot, "test_scan|a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let Some(store) = connect().await else {
            return;
        };
        let slot = StoreSlot::Data(Generation::Slot1);
        store.delete(slot, "test_nx").await.unwrap();

        let ttl = Duration::from_secs(5);
        assert!(store.set_if_absent(slot, "test_nx", "x", ttl).await.unwrap());
        assert!(!store.set_if_absent(slot, "test_nx", "y", ttl).await.unwrap());
        assert_eq!(store.get(slot, "test_nx").await.unwrap(), Some("x".to_string()));

        store.delete(slot, "test_nx").await.unwrap();
    }
    #[tokio::test]
    async fn test_delete_if_equals() {
        let Some(store) = connect().await else {
            return;
        };
        let slot = StoreSlot::Data(Generation::Slot1);
        store.delete(slot, "test_cad").await.unwrap();

        let ttl = Duration::from_secs(5);
        assert!(store.set_if_absent(slot, "test_cad", "x", ttl).await.unwrap());
        assert!(!store.delete_if_equals(slot, "test_cad", "y").await.unwrap());
        assert_eq!(store.get(slot, "test_cad").await.unwrap(), Some("x".to_string()));
        assert!(store.delete_if_equals(slot, "test_cad", "x").await.unwrap());
        assert_eq!(store.get(slot, "test_cad").await.unwrap(), None);
    }
}
