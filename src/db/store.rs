use std::time::Duration;

use crate::db::generation::StoreSlot;
use crate::error::AppResult;

/// Key-value contract of the generational store.
///
/// Every operation is addressed to a slot; slot 0 holds bookkeeping, slots 1
/// and 2 hold the alternating datasets.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, slot: StoreSlot, key: &str) -> AppResult<Option<String>>;

    async fn set(
        &self,
        slot: StoreSlot,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> AppResult<()>;

    /// Sets `key` only if it is absent; returns whether this call wrote it
    async fn set_if_absent(
        &self,
        slot: StoreSlot,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> AppResult<bool>;

    /// Keys in `slot` that start with `prefix`
    async fn scan(&self, slot: StoreSlot, prefix: &str) -> AppResult<Vec<String>>;

    async fn delete(&self, slot: StoreSlot, key: &str) -> AppResult<()>;

    /// Deletes `key` only while it still holds `expected`, as one atomic step.
    /// Returns whether the key was deleted.
    async fn delete_if_equals(&self, slot: StoreSlot, key: &str, expected: &str)
        -> AppResult<bool>;

    /// Removes every key in `slot`
    async fn flush(&self, slot: StoreSlot) -> AppResult<()>;

    /// Bulk write without expiry.
    ///
    /// Default implementation writes one key at a time; backends with batching
    /// should override it.
    async fn set_many(&self, slot: StoreSlot, entries: Vec<(String, String)>) -> AppResult<()> {
        for (key, value) in entries {
            self.set(slot, &key, &value, None).await?;
        }
        Ok(())
    }

    /// Releases backend resources
    async fn close(&self) -> AppResult<()> {
        Ok(())
    }

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
