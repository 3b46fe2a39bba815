use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use addon_recs::db::MemoryStore;
use addon_recs::models::{Normalization, Recommendation};
use addon_recs::services::{
    CoinstallEngine, DatasetCatalog, DatasetKind, DatasetSpec, GenerationalCache, StaticSource,
};

const BUCKET: &str = "bucket";

const ALL_MODES: [Normalization; 5] = [
    Normalization::None,
    Normalization::RowCount,
    Normalization::RowSum,
    Normalization::RownormSum,
    Normalization::Guidception,
];

async fn engine_with(coinstall: Value, ranking: Value) -> CoinstallEngine {
    let source = Arc::new(StaticSource::new());
    source.put_json(BUCKET, "coinstall.json", &coinstall).await;
    source.put_json(BUCKET, "ranking.json", &ranking).await;

    let catalog = DatasetCatalog {
        specs: vec![
            DatasetSpec::new(DatasetKind::Coinstall, BUCKET, "coinstall.json"),
            DatasetSpec::new(DatasetKind::Ranking, BUCKET, "ranking.json"),
        ],
    };
    let cache = GenerationalCache::init(
        Arc::new(MemoryStore::new()),
        source,
        catalog,
        Duration::from_secs(60),
    )
    .await
    .unwrap();
    cache.refresh().await.unwrap();

    CoinstallEngine::new(Arc::new(cache))
}

fn guids(recommendations: &[Recommendation]) -> Vec<&str> {
    recommendations.iter().map(|r| r.guid.as_str()).collect()
}

fn weights(recommendations: &[Recommendation]) -> Vec<f64> {
    recommendations
        .iter()
        .map(|r| r.weight().unwrap())
        .collect()
}

fn scenario_coinstall() -> Value {
    json!({
        "g1": {"g2": 1000, "g3": 100, "g4": 10, "g5": 1, "g6": 1},
        "g2": {"g1": 50, "g3": 40, "g4": 20, "g8": 30, "g9": 10},
        "g3": {"g1": 100, "g2": 40, "g4": 70},
        "g4": {"g2": 20},
        "g6": {"g1": 5, "g7": 100, "g8": 100, "g9": 100},
        "g8": {"g2": 30},
        "g9": {"g2": 10},
    })
}

fn scenario_ranking() -> Value {
    json!({
        "g1": 10, "g2": 9, "g3": 8, "g4": 7, "g5": 6,
        "g6": 5, "g7": 4, "g8": 3, "g9": 2,
    })
}

#[tokio::test]
async fn test_row_count_scenario() {
    let engine = engine_with(scenario_coinstall(), scenario_ranking()).await;

    let result = engine.recommend("g2", "row_count", 4).await.unwrap();

    assert_eq!(guids(&result), vec!["g3", "g1", "g8", "g4"]);
    let expected = [20.0, 50.0 / 3.0, 15.0, 20.0 / 3.0];
    for (actual, expected) in weights(&result).iter().zip(expected) {
        assert!((actual - expected).abs() < 1e-6, "{} != {}", actual, expected);
    }
    let first = serde_json::to_value(&result[0]).unwrap();
    assert_eq!(first["score"], "000000020.0000000000.0000000008");
}

#[tokio::test]
async fn test_default_normalization_is_rownorm_sum() {
    let engine = engine_with(scenario_coinstall(), scenario_ranking()).await;

    let by_name = engine.recommend("g2", "rownorm_sum", 10).await.unwrap();
    let by_default = engine
        .recommend_with("g2", Normalization::default(), 10)
        .await
        .unwrap();
    assert_eq!(by_name, by_default);
    assert!(!by_name.is_empty());
}

#[tokio::test]
async fn test_single_partner_orders_alike() {
    let engine = engine_with(
        json!({"x": {"y": 7}, "y": {"x": 7}}),
        json!({"x": 10, "y": 10}),
    )
    .await;

    let none = engine.recommend("x", "none", 10).await.unwrap();
    let rownorm = engine.recommend("x", "rownorm_sum", 10).await.unwrap();
    assert_eq!(guids(&none), vec!["y"]);
    assert_eq!(guids(&none), guids(&rownorm));
}

#[tokio::test]
async fn test_partners_below_threshold_never_recommended() {
    // Threshold: mean(100, 100, 100, 1) * 0.05 ~ 3.76; "ghost" has no ranking
    let engine = engine_with(
        json!({
            "a": {"b": 10, "c": 5, "rare": 50, "ghost": 80},
            "b": {"a": 10, "c": 4, "rare": 5},
            "c": {"a": 5, "b": 4, "ghost": 9},
            "rare": {"a": 50, "b": 5},
        }),
        json!({"a": 100, "b": 100, "c": 100, "rare": 1}),
    )
    .await;

    for mode in ALL_MODES {
        for seed in ["a", "b", "c"] {
            let result = engine.recommend_with(seed, mode, 10).await.unwrap();
            assert!(!result.is_empty(), "{} had no results under {}", seed, mode);
            for guid in guids(&result) {
                assert_ne!(guid, "rare", "seed {} under {}", seed, mode);
                assert_ne!(guid, "ghost", "seed {} under {}", seed, mode);
                assert_ne!(guid, seed);
            }
        }
    }
}

#[tokio::test]
async fn test_guidception_symmetric_dataset() {
    let engine = engine_with(
        json!({
            "a": {"b": 10, "c": 10, "d": 10},
            "b": {"a": 10, "c": 10, "d": 10},
            "c": {"a": 10, "b": 10, "d": 10},
            "d": {"a": 10, "b": 10, "c": 10},
        }),
        json!({"a": 9, "b": 5, "c": 7, "d": 3}),
    )
    .await;

    let result = engine.recommend("a", "guidception", 10).await.unwrap();

    // Equal weights, so popularity decides the order
    assert_eq!(guids(&result), vec!["c", "b", "d"]);
    let weights = weights(&result);
    assert!(weights.iter().all(|w| (w - weights[0]).abs() < 1e-9));
    assert!(weights[0] > 0.0 && weights[0] < 1.0);
}

#[tokio::test]
async fn test_unknown_normalization_is_empty() {
    let engine = engine_with(scenario_coinstall(), scenario_ranking()).await;
    let result = engine.recommend("g2", "row_product", 10).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_missing_or_empty_seed_cannot_recommend() {
    let engine = engine_with(
        json!({"a": {"b": 1}, "b": {"a": 1}, "empty": {}}),
        json!({"a": 1, "b": 1}),
    )
    .await;

    assert!(engine.can_recommend("a").await.unwrap());
    assert!(!engine.can_recommend("empty").await.unwrap());
    assert!(!engine.can_recommend("unknown").await.unwrap());

    assert!(engine.recommend("empty", "none", 10).await.unwrap().is_empty());
    assert!(engine.recommend("unknown", "none", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_no_active_generation_cannot_recommend() {
    let cache = GenerationalCache::init(
        Arc::new(MemoryStore::new()),
        Arc::new(StaticSource::new()),
        DatasetCatalog::default(),
        Duration::from_secs(60),
    )
    .await
    .unwrap();
    let engine = CoinstallEngine::new(Arc::new(cache));

    assert!(!engine.can_recommend("g2").await.unwrap());
    assert!(engine.recommend("g2", "none", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_limit_truncates_ranked_results() {
    let engine = engine_with(scenario_coinstall(), scenario_ranking()).await;

    let all = engine.recommend("g2", "none", 10).await.unwrap();
    let top = engine.recommend("g2", "none", 2).await.unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(top, all[..2].to_vec());
    assert_eq!(guids(&top), vec!["g1", "g3"]);
}
