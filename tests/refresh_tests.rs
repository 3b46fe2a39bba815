use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;

use addon_recs::db::{Generation, KvStore, MemoryStore, StoreSlot};
use addon_recs::error::AppResult;
use addon_recs::models::{ClientProfile, Normalization};
use addon_recs::services::{
    CoinstallEngine, CuratedRecommender, DatasetCatalog, DatasetKind, DatasetSource, DatasetSpec,
    EnsembleRecommender, GenerationView, GenerationalCache, Recommender, RefreshOutcome,
    StaticSource,
};

const BUCKET: &str = "bucket";

/// Pauses the next fetch of one key until released
struct GatedSource {
    inner: StaticSource,
    gated_key: &'static str,
    armed: AtomicBool,
    reached: Notify,
    release: Notify,
}

impl GatedSource {
    fn new(gated_key: &'static str) -> Self {
        Self {
            inner: StaticSource::new(),
            gated_key,
            armed: AtomicBool::new(false),
            reached: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait::async_trait]
impl DatasetSource for GatedSource {
    async fn fetch(&self, bucket: &str, key: &str) -> AppResult<Option<Vec<u8>>> {
        if key == self.gated_key && self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch(bucket, key).await
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

fn catalog() -> DatasetCatalog {
    DatasetCatalog {
        specs: vec![
            DatasetSpec::new(DatasetKind::Coinstall, BUCKET, "coinstall.json"),
            DatasetSpec::new(DatasetKind::Ranking, BUCKET, "ranking.json"),
        ],
    }
}

async fn init_cache(store: Arc<MemoryStore>, source: Arc<dyn DatasetSource>) -> Arc<GenerationalCache> {
    Arc::new(
        GenerationalCache::init(store, source, catalog(), Duration::from_secs(60))
            .await
            .unwrap(),
    )
}

async fn top_guid(engine: &CoinstallEngine) -> String {
    engine
        .recommend_with("a", Normalization::None, 1)
        .await
        .unwrap()
        .remove(0)
        .guid
}

#[tokio::test]
async fn test_generation_flip_is_all_or_nothing() {
    let source = Arc::new(GatedSource::new("ranking.json"));
    source
        .inner
        .put_json(BUCKET, "coinstall.json", &json!({"a": {"b": 10, "c": 5}}))
        .await;
    source
        .inner
        .put_json(BUCKET, "ranking.json", &json!({"a": 10, "b": 10, "c": 10}))
        .await;

    let store = Arc::new(MemoryStore::new());
    let cache = init_cache(store.clone(), source.clone()).await;
    let engine = CoinstallEngine::new(cache.clone());

    cache.refresh().await.unwrap();
    assert_eq!(top_guid(&engine).await, "b");

    // New upstream data, and a refresh paused after coinstall was written
    source
        .inner
        .put_json(BUCKET, "coinstall.json", &json!({"a": {"b": 1, "c": 50}}))
        .await;
    source.armed.store(true, Ordering::SeqCst);
    let refresh = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    source.reached.notified().await;

    // The new coinstall rows already sit in the inactive slot
    let staged = store
        .get(StoreSlot::Data(Generation::Slot2), "coinstall|a")
        .await
        .unwrap();
    assert!(staged.is_some());

    // Readers keep seeing the complete previous generation
    assert_eq!(
        cache.get_active_generation().await.unwrap(),
        Some(Generation::Slot1)
    );
    assert_eq!(top_guid(&engine).await, "b");
    let view = cache.ensure_fresh().await.unwrap().unwrap();
    assert_eq!(view.generation(), Generation::Slot1);
    assert_eq!(view.count_map("c").await.unwrap(), Some(5.0));

    source.release.notify_one();
    let outcome = tokio::time::timeout(Duration::from_secs(5), refresh)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, RefreshOutcome::Completed(ref r) if r.generation == 2));

    assert_eq!(top_guid(&engine).await, "c");
    let view = cache.ensure_fresh().await.unwrap().unwrap();
    assert_eq!(view.generation(), Generation::Slot2);
    assert_eq!(view.count_map("c").await.unwrap(), Some(50.0));
}

#[tokio::test]
async fn test_second_process_skips_refresh_while_lease_held() {
    let source = Arc::new(GatedSource::new("coinstall.json"));
    source
        .inner
        .put_json(BUCKET, "coinstall.json", &json!({"a": {"b": 1}}))
        .await;

    let store = Arc::new(MemoryStore::new());
    let writer = init_cache(store.clone(), source.clone()).await;
    let other = init_cache(store.clone(), source.clone()).await;
    assert_ne!(writer.owner_id(), other.owner_id());

    source.armed.store(true, Ordering::SeqCst);
    let refresh = tokio::spawn({
        let writer = writer.clone();
        async move { writer.refresh().await }
    });
    source.reached.notified().await;

    let outcome = other.refresh().await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::LeaseHeld));
    assert_eq!(
        other.lease_holder().await.unwrap().as_deref(),
        Some(writer.owner_id())
    );

    source.release.notify_one();
    refresh.await.unwrap().unwrap();

    // The other process observes the published generation
    assert_eq!(other.last_seen_generation(), None);
    let view = other.ensure_fresh().await.unwrap().unwrap();
    assert_eq!(view.generation(), Generation::Slot1);
    assert_eq!(other.last_seen_generation(), Some(Generation::Slot1));
}

#[tokio::test]
async fn test_expired_lease_allows_retry() {
    let source = Arc::new(StaticSource::new());
    source
        .put_json(BUCKET, "coinstall.json", &json!({"a": {"b": 1}}))
        .await;

    let store = Arc::new(MemoryStore::new());
    let cache = init_cache(store, source).await;

    // A crashed writer left its lease behind
    assert!(cache
        .acquire_lease("crashed-writer", Duration::from_millis(50))
        .await
        .unwrap());
    assert!(matches!(
        cache.refresh().await.unwrap(),
        RefreshOutcome::LeaseHeld
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        cache.refresh().await.unwrap(),
        RefreshOutcome::Completed(_)
    ));
    assert_eq!(
        cache.get_active_generation().await.unwrap(),
        Some(Generation::Slot1)
    );
}

#[tokio::test]
async fn test_slot_reloaded_after_two_refreshes_serves_new_data() {
    let source = Arc::new(StaticSource::new());
    source
        .put_json(BUCKET, "coinstall.json", &json!({"a": {"b": 10, "c": 5}}))
        .await;
    source
        .put_json(BUCKET, "ranking.json", &json!({"a": 10, "b": 10, "c": 10}))
        .await;

    let cache = init_cache(Arc::new(MemoryStore::new()), source.clone()).await;
    let engine = CoinstallEngine::new(cache.clone());

    cache.refresh().await.unwrap();
    assert_eq!(top_guid(&engine).await, "b");

    // Slot 1 is rewritten by the second of two refreshes
    source
        .put_json(BUCKET, "coinstall.json", &json!({"a": {"b": 1, "c": 50}}))
        .await;
    cache.refresh().await.unwrap();
    cache.refresh().await.unwrap();
    assert_eq!(
        cache.get_active_generation().await.unwrap(),
        Some(Generation::Slot1)
    );

    assert_eq!(top_guid(&engine).await, "c");
    let view = cache.ensure_fresh().await.unwrap().unwrap();
    assert_eq!(view.count_map("c").await.unwrap(), Some(50.0));
}

/// Ensemble member that publishes a new generation while the blend is running
struct RefreshingMember {
    cache: Arc<GenerationalCache>,
    fired: AtomicBool,
}

#[async_trait::async_trait]
impl Recommender for RefreshingMember {
    fn name(&self) -> &'static str {
        "locale"
    }

    async fn can_recommend(
        &self,
        _view: &GenerationView,
        _client: &ClientProfile,
    ) -> AppResult<bool> {
        Ok(true)
    }

    async fn recommend(
        &self,
        _view: &GenerationView,
        _client: &ClientProfile,
        _limit: usize,
    ) -> AppResult<Vec<(String, f64)>> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let outcome = self.cache.refresh().await?;
            assert!(matches!(outcome, RefreshOutcome::Completed(ref r) if r.generation == 2));
        }
        Ok(vec![("x".to_string(), 0.5)])
    }
}

#[tokio::test]
async fn test_blend_reads_one_generation_across_a_flip() {
    let source = Arc::new(StaticSource::new());
    source
        .put_json(
            BUCKET,
            "weights.json",
            &json!({"ensemble_weights": {"locale": 1.0, "curated": 1.0}}),
        )
        .await;
    source
        .put_json(BUCKET, "curated.json", &json!(["old1"]))
        .await;

    let catalog = DatasetCatalog {
        specs: vec![
            DatasetSpec::new(DatasetKind::EnsembleWeights, BUCKET, "weights.json"),
            DatasetSpec::new(DatasetKind::CuratedList, BUCKET, "curated.json"),
        ],
    };
    let cache = Arc::new(
        GenerationalCache::init(
            Arc::new(MemoryStore::new()),
            source.clone(),
            catalog,
            Duration::from_secs(60),
        )
        .await
        .unwrap(),
    );
    cache.refresh().await.unwrap();
    source
        .put_json(BUCKET, "curated.json", &json!(["new1"]))
        .await;

    let members: Vec<Arc<dyn Recommender>> = vec![
        Arc::new(RefreshingMember {
            cache: cache.clone(),
            fired: AtomicBool::new(false),
        }),
        Arc::new(CuratedRecommender),
    ];
    let ensemble = EnsembleRecommender::new(members, Duration::from_secs(300));
    let client = ClientProfile::new("client-1");

    let view = cache.ensure_fresh().await.unwrap().unwrap();
    assert_eq!(view.generation(), Generation::Slot1);
    let blended = ensemble.recommend(&view, &client, 10).await.unwrap();

    // The flip landed mid-blend, yet every member read generation 1
    assert_eq!(
        cache.get_active_generation().await.unwrap(),
        Some(Generation::Slot2)
    );
    let guids: Vec<&str> = blended.iter().map(|(g, _)| g.as_str()).collect();
    assert_eq!(guids, vec!["old1", "x"]);

    // The next request picks up the new generation
    let view = cache.ensure_fresh().await.unwrap().unwrap();
    assert_eq!(view.generation(), Generation::Slot2);
    let blended = ensemble.recommend(&view, &client, 10).await.unwrap();
    let guids: Vec<&str> = blended.iter().map(|(g, _)| g.as_str()).collect();
    assert_eq!(guids, vec!["new1", "x"]);
}
