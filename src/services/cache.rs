use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::{CacheKey, Generation, GenerationPointer, KeyFamily, KvStore, StoreSlot};
use crate::error::AppResult;
use crate::models::CoinstallRow;
use crate::services::datasets::{DatasetCatalog, DatasetKind, DecodedDataset};
use crate::services::normalization::derive_tables;
use crate::services::source::{fetch_json, DatasetSource};

/// Summary of a completed refresh
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub generation: u8,
    /// Identifies this load of the slot
    pub epoch: String,
    /// Collections fetched fresh from the source
    pub loaded: Vec<String>,
    /// Collections whose fetch failed and were copied from the previous generation
    pub carried_over: Vec<String>,
    /// Collections whose fetch failed with nothing to carry over
    pub skipped: Vec<String>,
    pub coinstall_rows: usize,
    pub ranked_guids: usize,
    pub min_install_threshold: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Completed(RefreshReport),
    /// Another owner holds the refresh lease; nothing was done
    LeaseHeld,
}

/// Shared handle over the generational store.
///
/// A refresh writes a complete dataset and its derived tables into the
/// inactive slot, then flips the `active_generation` pointer. The flip is the
/// single point of publication.
///
/// Constructed explicitly with [`GenerationalCache::init`] and passed to every
/// consumer; [`GenerationalCache::close`] ends its lifecycle.
pub struct GenerationalCache {
    store: Arc<dyn KvStore>,
    source: Arc<dyn DatasetSource>,
    catalog: DatasetCatalog,
    owner_id: String,
    lease_ttl: Duration,
    /// Last generation this process observed
    last_seen: GenerationPointer,
    view: RwLock<Option<Arc<GenerationView>>>,
}

impl GenerationalCache {
    pub async fn init(
        store: Arc<dyn KvStore>,
        source: Arc<dyn DatasetSource>,
        catalog: DatasetCatalog,
        lease_ttl: Duration,
    ) -> AppResult<Self> {
        let cache = Self {
            store,
            source,
            catalog,
            owner_id: Uuid::new_v4().to_string(),
            lease_ttl,
            last_seen: GenerationPointer::new(),
            view: RwLock::new(None),
        };

        let active = cache.get_active_generation().await?;
        tracing::info!(
            store = cache.store.name(),
            source = cache.source.name(),
            owner_id = %cache.owner_id,
            active_generation = ?active.map(|g| g.id()),
            "Generational cache initialized"
        );

        Ok(cache)
    }

    /// Releases a lease this process still holds and drops local tables
    pub async fn close(&self) -> AppResult<()> {
        self.release_lease(&self.owner_id).await?;
        *self.view.write().await = None;
        self.last_seen.reset();
        self.store.close().await?;
        tracing::info!(owner_id = %self.owner_id, "Generational cache closed");
        Ok(())
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Reads the bookkeeping pointer; `None` means nothing was ever loaded
    pub async fn get_active_generation(&self) -> AppResult<Option<Generation>> {
        let raw = self
            .store
            .get(StoreSlot::Bookkeeping, &CacheKey::ActiveGeneration.to_string())
            .await?;

        Ok(raw.and_then(|raw| match raw.parse::<Generation>() {
            Ok(generation) => Some(generation),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable generation pointer");
                None
            }
        }))
    }

    /// Sets the lease only if absent.
    ///
    /// Returns whether `owner_id` holds the lease after the call. A lease that
    /// outlives a slow refresh may let a second refresh start; both write the
    /// same inactive slot and the flip is idempotent.
    pub async fn acquire_lease(&self, owner_id: &str, ttl: Duration) -> AppResult<bool> {
        let key = CacheKey::RefreshLease.to_string();
        if self
            .store
            .set_if_absent(StoreSlot::Bookkeeping, &key, owner_id, ttl)
            .await?
        {
            return Ok(true);
        }
        Ok(self.lease_holder().await?.as_deref() == Some(owner_id))
    }

    /// Deletes the lease if `owner_id` holds it.
    ///
    /// The holder check and the delete are one store operation, so a lease
    /// that expired and was re-acquired by another owner is left alone.
    pub async fn release_lease(&self, owner_id: &str) -> AppResult<bool> {
        self.store
            .delete_if_equals(
                StoreSlot::Bookkeeping,
                &CacheKey::RefreshLease.to_string(),
                owner_id,
            )
            .await
    }

    pub async fn lease_holder(&self) -> AppResult<Option<String>> {
        self.store
            .get(StoreSlot::Bookkeeping, &CacheKey::RefreshLease.to_string())
            .await
    }

    /// Loads every dataset into the inactive slot and publishes it.
    ///
    /// Returns [`RefreshOutcome::LeaseHeld`] without side effects when another
    /// owner is refreshing. A failed refresh leaves the pointer untouched.
    pub async fn refresh(&self) -> AppResult<RefreshOutcome> {
        if !self.acquire_lease(&self.owner_id, self.lease_ttl).await? {
            let holder = self.lease_holder().await.ok().flatten();
            tracing::info!(holder = ?holder, "Refresh lease held elsewhere, skipping refresh");
            return Ok(RefreshOutcome::LeaseHeld);
        }

        let result = self.load_generation().await;

        if let Err(e) = self.release_lease(&self.owner_id).await {
            tracing::warn!(error = %e, "Failed to release refresh lease; it will expire");
        }

        match &result {
            Ok(report) => tracing::info!(
                generation = report.generation,
                loaded = report.loaded.len(),
                carried_over = report.carried_over.len(),
                skipped = report.skipped.len(),
                coinstall_rows = report.coinstall_rows,
                "Refresh completed"
            ),
            Err(e) => tracing::error!(error = %e, "Refresh failed, active generation unchanged"),
        }

        result.map(RefreshOutcome::Completed)
    }

    async fn load_generation(&self) -> AppResult<RefreshReport> {
        let previous = self.get_active_generation().await?;
        let target = Generation::refresh_target(previous);
        let slot = StoreSlot::Data(target);

        tracing::info!(
            previous = ?previous.map(|g| g.id()),
            target = target.id(),
            "Starting refresh into inactive generation"
        );

        self.store.flush(slot).await?;

        let mut loaded = Vec::new();
        let mut carried_over = Vec::new();
        let mut skipped = Vec::new();
        let mut coinstall: Option<HashMap<String, CoinstallRow>> = None;
        let mut ranking: Option<HashMap<String, f64>> = None;

        for spec in &self.catalog.specs {
            let fetched = match fetch_json(self.source.as_ref(), &spec.bucket, &spec.key).await {
                Ok(Some(value)) => DecodedDataset::decode(&spec.kind, value).map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };

            match fetched {
                Ok(Some(decoded)) => {
                    self.store.set_many(slot, decoded.entries()?).await?;
                    match decoded {
                        DecodedDataset::Coinstall(rows) => coinstall = Some(rows),
                        DecodedDataset::Ranking(counts) => ranking = Some(counts),
                        DecodedDataset::Single(..) => {}
                    }
                    loaded.push(spec.kind.to_string());
                }
                outcome => {
                    match outcome {
                        Err(e) => tracing::warn!(
                            dataset = %spec.kind,
                            bucket = %spec.bucket,
                            key = %spec.key,
                            error = %e,
                            "Dataset fetch failed, skipping for this refresh"
                        ),
                        _ => tracing::warn!(
                            dataset = %spec.kind,
                            bucket = %spec.bucket,
                            key = %spec.key,
                            "Dataset not found, skipping for this refresh"
                        ),
                    }

                    let copied = match previous {
                        Some(previous) => self.carry_over(&spec.kind, previous, target).await?,
                        None => 0,
                    };
                    if copied > 0 {
                        carried_over.push(spec.kind.to_string());
                    } else {
                        skipped.push(spec.kind.to_string());
                    }
                }
            }
        }

        // Collections that were carried over are read back from the new slot
        let coinstall = match coinstall {
            Some(rows) => rows,
            None => self.load_family(slot, KeyFamily::Coinstall).await?,
        };
        let ranking = match ranking {
            Some(counts) => counts,
            None => self.load_family(slot, KeyFamily::Ranking).await?,
        };

        let tables = derive_tables(&coinstall, &ranking);
        let min_install_threshold = tables.min_install_threshold;
        self.store.set_many(slot, tables.into_entries()?).await?;

        let epoch = Uuid::new_v4().to_string();
        self.store
            .set(slot, &CacheKey::GenerationEpoch.to_string(), &epoch, None)
            .await?;

        // Publication: everything above is in the slot before the pointer moves
        self.store
            .set(
                StoreSlot::Bookkeeping,
                &CacheKey::ActiveGeneration.to_string(),
                &target.to_string(),
                None,
            )
            .await?;

        Ok(RefreshReport {
            generation: target.id(),
            epoch,
            loaded,
            carried_over,
            skipped,
            coinstall_rows: coinstall.len(),
            ranked_guids: ranking.len(),
            min_install_threshold,
            completed_at: Utc::now(),
        })
    }

    /// Copies one collection from `from` into `to`; returns the number of keys copied
    async fn carry_over(
        &self,
        kind: &DatasetKind,
        from: Generation,
        to: Generation,
    ) -> AppResult<usize> {
        let from = StoreSlot::Data(from);
        let keys = match (kind.family(), kind.single_key()) {
            (Some(family), _) => self.store.scan(from, family.prefix()).await?,
            (None, Some(key)) => vec![key.to_string()],
            (None, None) => Vec::new(),
        };

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.store.get(from, &key).await? {
                entries.push((key, value));
            }
        }

        let copied = entries.len();
        if copied > 0 {
            self.store.set_many(StoreSlot::Data(to), entries).await?;
            tracing::info!(dataset = %kind, keys = copied, "Carried over stale dataset");
        }
        Ok(copied)
    }

    async fn load_family<T: DeserializeOwned>(
        &self,
        slot: StoreSlot,
        family: KeyFamily,
    ) -> AppResult<HashMap<String, T>> {
        let mut collection = HashMap::new();
        for key in self.store.scan(slot, family.prefix()).await? {
            let Some(guid) = family.guid_of(&key) else {
                continue;
            };
            if let Some(raw) = self.store.get(slot, &key).await? {
                match serde_json::from_str(&raw) {
                    Ok(value) => {
                        collection.insert(guid.to_string(), value);
                    }
                    Err(e) => tracing::warn!(key = %key, error = %e, "Skipping corrupt entry"),
                }
            }
        }
        Ok(collection)
    }

    /// Resolves the active generation and returns this process's view of it.
    ///
    /// The local view is rebuilt at most once per published load. A view is
    /// reused only while both the active slot and that slot's epoch match, so
    /// a slot reloaded by two later refreshes is never served from old memos.
    /// Two tasks racing on the same change may both rebuild; the rebuilt views
    /// are interchangeable because the slot they read is immutable until the
    /// next-but-one refresh. Returns `None` when nothing was ever loaded.
    pub async fn ensure_fresh(&self) -> AppResult<Option<Arc<GenerationView>>> {
        let Some(active) = self.get_active_generation().await? else {
            return Ok(None);
        };
        let epoch = self
            .store
            .get(
                StoreSlot::Data(active),
                &CacheKey::GenerationEpoch.to_string(),
            )
            .await?;

        let current = self.view.read().await.clone();
        if let Some(view) = current {
            if view.generation() == active && view.epoch() == epoch.as_deref() {
                return Ok(Some(view));
            }
        }

        let seen = self.last_seen.load();
        let view = Arc::new(GenerationView::load(self.store.clone(), active, epoch).await?);
        *self.view.write().await = Some(view.clone());

        if self.last_seen.publish(seen, active) {
            tracing::info!(
                previous = ?seen.map(|g| g.id()),
                generation = active.id(),
                epoch = ?view.epoch(),
                min_install_threshold = view.min_install_threshold(),
                "Observed new active generation, rebuilt local tables"
            );
        } else {
            tracing::debug!(
                generation = active.id(),
                "Another task recorded a newer observation first"
            );
        }

        Ok(Some(view))
    }

    /// Generation of the local view, if one was built
    pub fn last_seen_generation(&self) -> Option<Generation> {
        self.last_seen.load()
    }
}

/// Read-only view of one published generation.
///
/// Lookups are memoized per guid; a new view (with empty memos) is built
/// whenever the active generation changes.
pub struct GenerationView {
    generation: Generation,
    epoch: Option<String>,
    store: Arc<dyn KvStore>,
    min_install_threshold: f64,
    filtered_rows: DashMap<String, Option<Arc<CoinstallRow>>>,
    rownorm_sums: DashMap<String, Option<f64>>,
    row_counts: DashMap<String, Option<f64>>,
    count_map: DashMap<String, Option<f64>>,
    ranking: DashMap<String, Option<f64>>,
}

impl GenerationView {
    async fn load(
        store: Arc<dyn KvStore>,
        generation: Generation,
        epoch: Option<String>,
    ) -> AppResult<Self> {
        let mut view = Self {
            generation,
            epoch,
            store,
            min_install_threshold: 0.0,
            filtered_rows: DashMap::new(),
            rownorm_sums: DashMap::new(),
            row_counts: DashMap::new(),
            count_map: DashMap::new(),
            ranking: DashMap::new(),
        };
        view.min_install_threshold = view
            .read_json::<f64>(&CacheKey::MinInstallThreshold)
            .await?
            .unwrap_or(0.0);
        Ok(view)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Epoch of the load this view reads; `None` for slots written without one
    pub fn epoch(&self) -> Option<&str> {
        self.epoch.as_deref()
    }

    pub fn min_install_threshold(&self) -> f64 {
        self.min_install_threshold
    }

    /// Reads and decodes a key of this generation; corrupt entries read as absent
    async fn read_json<T: DeserializeOwned>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        let raw = self
            .store
            .get(StoreSlot::Data(self.generation), &key.to_string())
            .await?;
        Ok(raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Ignoring corrupt cache entry");
                None
            }
        }))
    }

    async fn memoized<T: Clone + DeserializeOwned>(
        &self,
        memo: &DashMap<String, Option<T>>,
        family: KeyFamily,
        guid: &str,
    ) -> AppResult<Option<T>> {
        let cached = memo.get(guid).map(|hit| hit.value().clone());
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let value = self.read_json::<T>(&family.key(guid)).await?;
        memo.insert(guid.to_string(), value.clone());
        Ok(value)
    }

    /// Unfiltered coinstallation row
    pub async fn coinstall_row(&self, guid: &str) -> AppResult<Option<CoinstallRow>> {
        self.read_json(&KeyFamily::Coinstall.key(guid)).await
    }

    /// Coinstallation row without partners below the install threshold
    pub async fn filtered_row(&self, guid: &str) -> AppResult<Option<Arc<CoinstallRow>>> {
        let cached = self.filtered_rows.get(guid).map(|hit| hit.value().clone());
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let row = self
            .read_json::<CoinstallRow>(&KeyFamily::FilteredCoinstall.key(guid))
            .await?
            .map(Arc::new);
        self.filtered_rows.insert(guid.to_string(), row.clone());
        Ok(row)
    }

    pub async fn ranking(&self, guid: &str) -> AppResult<Option<f64>> {
        self.memoized(&self.ranking, KeyFamily::Ranking, guid).await
    }

    pub async fn row_count(&self, guid: &str) -> AppResult<Option<f64>> {
        self.memoized(&self.row_counts, KeyFamily::RowCount, guid)
            .await
    }

    pub async fn count_map(&self, guid: &str) -> AppResult<Option<f64>> {
        self.memoized(&self.count_map, KeyFamily::CountMap, guid)
            .await
    }

    /// Sum of the partner's row-normalized ratios over all rows
    pub async fn rownorm_sum(&self, guid: &str) -> AppResult<Option<f64>> {
        let cached = self.rownorm_sums.get(guid).map(|hit| *hit.value());
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let sum = self
            .read_json::<Vec<f64>>(&KeyFamily::RowNorm.key(guid))
            .await?
            .map(|ratios| ratios.iter().sum::<f64>());
        self.rownorm_sums.insert(guid.to_string(), sum);
        Ok(sum)
    }

    pub async fn ensemble_weights(&self) -> AppResult<Option<HashMap<String, f64>>> {
        self.read_json(&CacheKey::EnsembleWeights).await
    }

    pub async fn locale_table(&self) -> AppResult<Option<HashMap<String, Vec<(String, f64)>>>> {
        self.read_json(&CacheKey::LocaleTable).await
    }

    pub async fn curated_list(&self) -> AppResult<Option<Vec<String>>> {
        self.read_json(&CacheKey::CuratedList).await
    }

    pub async fn blob(&self, name: &str) -> AppResult<Option<serde_json::Value>> {
        self.read_json(&CacheKey::Blob(name.to_string())).await
    }
}
