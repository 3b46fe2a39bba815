use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::db::generation::StoreSlot;
use crate::db::store::KvStore;
use crate::error::AppResult;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store backend with per-key expiry.
///
/// Suitable for single-process deployments and tests; each slot is an
/// independent map behind its own lock.
pub struct MemoryStore {
    slots: [RwLock<HashMap<String, Entry>>; 3],
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: [
                RwLock::new(HashMap::new()),
                RwLock::new(HashMap::new()),
                RwLock::new(HashMap::new()),
            ],
        }
    }

    fn slot(&self, slot: StoreSlot) -> &RwLock<HashMap<String, Entry>> {
        &self.slots[slot.index()]
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, slot: StoreSlot, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        let map = self.slot(slot).read().await;
        Ok(map
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        slot: StoreSlot,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> AppResult<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.slot(slot).write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        slot: StoreSlot,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> AppResult<bool> {
        let now = Instant::now();
        let mut map = self.slot(slot).write().await;
        if map.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn scan(&self, slot: StoreSlot, prefix: &str) -> AppResult<Vec<String>> {
        let now = Instant::now();
        let map = self.slot(slot).read().await;
        Ok(map
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn delete(&self, slot: StoreSlot, key: &str) -> AppResult<()> {
        self.slot(slot).write().await.remove(key);
        Ok(())
    }

    async fn delete_if_equals(
        &self,
        slot: StoreSlot,
        key: &str,
        expected: &str,
    ) -> AppResult<bool> {
        let now = Instant::now();
        let mut map = self.slot(slot).write().await;
        if !map
            .get(key)
            .is_some_and(|entry| entry.is_live(now) && entry.value == expected)
        {
            return Ok(false);
        }
        map.remove(key);
        Ok(true)
    }

    async fn flush(&self, slot: StoreSlot) -> AppResult<()> {
        self.slot(slot).write().await.clear();
        Ok(())
    }

    async fn set_many(&self, slot: StoreSlot, entries: Vec<(String, String)>) -> AppResult<()> {
        let mut map = self.slot(slot).write().await;
        for (key, value) in entries {
            map.insert(
                key,
                Entry {
                    value,
                    expires_at: None,
                },
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
