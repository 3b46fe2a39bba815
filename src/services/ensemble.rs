use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::db::Generation;
use crate::error::AppResult;
use crate::models::ClientProfile;
use crate::services::cache::GenerationView;
use crate::services::recommenders::{CuratedRecommender, Recommender};

/// Merges per-recommender results into one ranking.
///
/// Each `(guid, weight)` is multiplied by its recommender's ensemble weight;
/// guids recommended by several recommenders accumulate. Recommenders without
/// an ensemble weight contribute nothing. Groups are sorted by summed weight
/// with a stable sort, so equal sums keep the order in which their guids were
/// first seen (recommenders in key order, then result order). That order is
/// stable for a given input but carries no meaning.
pub fn blend(
    per_recommender: &BTreeMap<String, Vec<(String, f64)>>,
    weights: &HashMap<String, f64>,
    exclude: &HashSet<String>,
    limit: usize,
) -> Vec<(String, f64)> {
    let mut order: HashMap<&str, usize> = HashMap::new();
    let mut grouped: Vec<(String, f64)> = Vec::new();

    for (key, results) in per_recommender {
        let Some(factor) = weights.get(key) else {
            tracing::warn!(recommender = %key, "No ensemble weight, ignoring its results");
            continue;
        };
        for (guid, weight) in results {
            let scaled = weight * factor;
            match order.get(guid.as_str()) {
                Some(&index) => grouped[index].1 += scaled,
                None => {
                    order.insert(guid.as_str(), grouped.len());
                    grouped.push((guid.clone(), scaled));
                }
            }
        }
    }

    grouped.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    grouped
        .into_iter()
        .filter(|(guid, _)| !exclude.contains(guid))
        .take(limit)
        .collect()
}

/// Alternates between two ranked lists, starting with `primary`.
///
/// Duplicates and excluded guids are skipped without consuming a turn; once a
/// list runs out the other fills the remaining places.
pub fn interleave(
    primary: &[(String, f64)],
    secondary: &[(String, f64)],
    exclude: &HashSet<String>,
    limit: usize,
) -> Vec<(String, f64)> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged = Vec::with_capacity(limit.min(primary.len() + secondary.len()));
    let mut lists = [primary.iter().peekable(), secondary.iter().peekable()];
    let mut turn = 0;

    while merged.len() < limit {
        if lists[0].peek().is_none() && lists[1].peek().is_none() {
            break;
        }
        let current = &mut lists[turn];
        for (guid, weight) in current.by_ref() {
            if exclude.contains(guid) || !seen.insert(guid.as_str()) {
                continue;
            }
            merged.push((guid.clone(), *weight));
            break;
        }
        turn = 1 - turn;
    }

    merged
}

struct CachedWeights {
    fetched_at: Instant,
    generation: Generation,
    epoch: Option<String>,
    weights: Arc<HashMap<String, f64>>,
}

impl CachedWeights {
    fn is_valid_for(&self, view: &GenerationView, ttl: Duration) -> bool {
        self.generation == view.generation()
            && self.epoch.as_deref() == view.epoch()
            && self.fetched_at.elapsed() < ttl
    }
}

/// Blends a fixed set of recommenders using the ensemble weights
pub struct EnsembleRecommender {
    members: Vec<Arc<dyn Recommender>>,
    weights_ttl: Duration,
    weights: RwLock<Option<CachedWeights>>,
}

impl EnsembleRecommender {
    pub fn new(members: Vec<Arc<dyn Recommender>>, weights_ttl: Duration) -> Self {
        Self {
            members,
            weights_ttl,
            weights: RwLock::new(None),
        }
    }

    /// Ensemble weights of `view`, re-read when older than the TTL or when
    /// `view` is a different load than the cached one
    pub async fn weights(
        &self,
        view: &GenerationView,
    ) -> AppResult<Option<Arc<HashMap<String, f64>>>> {
        if let Some(cached) = self.weights.read().await.as_ref() {
            if cached.is_valid_for(view, self.weights_ttl) {
                return Ok(Some(cached.weights.clone()));
            }
        }

        let Some(weights) = view.ensemble_weights().await? else {
            *self.weights.write().await = None;
            return Ok(None);
        };
        let weights = Arc::new(weights);
        *self.weights.write().await = Some(CachedWeights {
            fetched_at: Instant::now(),
            generation: view.generation(),
            epoch: view.epoch().map(str::to_string),
            weights: weights.clone(),
        });

        tracing::debug!(
            generation = view.generation().id(),
            recommenders = weights.len(),
            "Reloaded ensemble weights"
        );

        Ok(Some(weights))
    }
}

#[async_trait::async_trait]
impl Recommender for EnsembleRecommender {
    fn name(&self) -> &'static str {
        "ensemble"
    }

    async fn can_recommend(
        &self,
        view: &GenerationView,
        client: &ClientProfile,
    ) -> AppResult<bool> {
        if self.weights(view).await?.is_none() {
            return Ok(false);
        }
        for member in &self.members {
            if member.can_recommend(view, client).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn recommend(
        &self,
        view: &GenerationView,
        client: &ClientProfile,
        limit: usize,
    ) -> AppResult<Vec<(String, f64)>> {
        let Some(weights) = self.weights(view).await? else {
            tracing::info!(client_id = %client.client_id, "No ensemble weights loaded");
            return Ok(Vec::new());
        };

        // Ask for extra results so exclusion does not starve the blend
        let member_limit = limit.saturating_add(client.installed_addons.len());
        let mut per_recommender = BTreeMap::new();

        for member in &self.members {
            match member.can_recommend(view, client).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(recommender = member.name(), error = %e, "Recommender check failed");
                    continue;
                }
            }
            match member.recommend(view, client, member_limit).await {
                Ok(results) => {
                    per_recommender.insert(member.name().to_string(), results);
                }
                Err(e) => {
                    tracing::warn!(recommender = member.name(), error = %e, "Recommender failed");
                }
            }
        }

        let exclude: HashSet<String> = client.installed_addons.iter().cloned().collect();
        let blended = blend(&per_recommender, &weights, &exclude, limit);

        tracing::info!(
            client_id = %client.client_id,
            generation = view.generation().id(),
            recommenders = per_recommender.len(),
            results = blended.len(),
            "Blended ensemble recommendations"
        );

        Ok(blended)
    }
}

/// Interleaves personalized ensemble picks with the curated list
pub struct HybridRecommender {
    ensemble: Arc<EnsembleRecommender>,
    curated: Arc<CuratedRecommender>,
}

impl HybridRecommender {
    pub fn new(ensemble: Arc<EnsembleRecommender>, curated: Arc<CuratedRecommender>) -> Self {
        Self { ensemble, curated }
    }
}

#[async_trait::async_trait]
impl Recommender for HybridRecommender {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn can_recommend(
        &self,
        view: &GenerationView,
        client: &ClientProfile,
    ) -> AppResult<bool> {
        Ok(self.ensemble.can_recommend(view, client).await?
            || self.curated.can_recommend(view, client).await?)
    }

    async fn recommend(
        &self,
        view: &GenerationView,
        client: &ClientProfile,
        limit: usize,
    ) -> AppResult<Vec<(String, f64)>> {
        let personalized = self.ensemble.recommend(view, client, limit).await?;
        let curated = self.curated.recommend(view, client, limit).await?;
        let exclude: HashSet<String> = client.installed_addons.iter().cloned().collect();
        Ok(interleave(&personalized, &curated, &exclude, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs.iter().map(|(g, w)| (g.to_string(), *w)).collect()
    }

    fn guids(ranked: &[(String, f64)]) -> Vec<&str> {
        ranked.iter().map(|(g, _)| g.as_str()).collect()
    }

    #[test]
    fn test_blend_heavier_recommender_dominates() {
        let per_recommender = BTreeMap::from([
            ("a".to_string(), results(&[("a1", 0.9), ("a2", 0.5), ("a3", 0.3)])),
            ("b".to_string(), results(&[("b1", 3.0), ("b2", 1.0), ("b3", 0.03)])),
        ]);
        let weights = HashMap::from([("a".to_string(), 10.0), ("b".to_string(), 1.0)]);

        let blended = blend(&per_recommender, &weights, &HashSet::new(), 10);
        assert_eq!(guids(&blended), vec!["a1", "a2", "a3", "b1", "b2", "b3"]);
    }

    #[test]
    fn test_blend_accumulates_shared_guids() {
        let per_recommender = BTreeMap::from([
            ("a".to_string(), results(&[("x", 0.5), ("y", 0.6)])),
            ("b".to_string(), results(&[("x", 0.5)])),
        ]);
        let weights = HashMap::from([("a".to_string(), 1.0), ("b".to_string(), 1.0)]);

        let blended = blend(&per_recommender, &weights, &HashSet::new(), 10);
        assert_eq!(blended, results(&[("x", 1.0), ("y", 0.6)]));
    }

    #[test]
    fn test_blend_excludes_and_limits() {
        let per_recommender =
            BTreeMap::from([("a".to_string(), results(&[("x", 3.0), ("y", 2.0), ("z", 1.0)]))]);
        let weights = HashMap::from([("a".to_string(), 1.0)]);
        let exclude = HashSet::from(["x".to_string()]);

        let blended = blend(&per_recommender, &weights, &exclude, 1);
        assert_eq!(guids(&blended), vec!["y"]);
    }

    #[test]
    fn test_blend_ties_keep_first_seen_order() {
        let per_recommender = BTreeMap::from([
            ("a".to_string(), results(&[("p", 1.0), ("q", 1.0)])),
            ("b".to_string(), results(&[("r", 1.0)])),
        ]);
        let weights = HashMap::from([("a".to_string(), 1.0), ("b".to_string(), 1.0)]);

        let blended = blend(&per_recommender, &weights, &HashSet::new(), 10);
        assert_eq!(guids(&blended), vec!["p", "q", "r"]);
    }

    #[test]
    fn test_blend_ignores_unweighted_recommender() {
        let per_recommender = BTreeMap::from([
            ("a".to_string(), results(&[("x", 1.0)])),
            ("mystery".to_string(), results(&[("y", 100.0)])),
        ]);
        let weights = HashMap::from([("a".to_string(), 1.0)]);

        let blended = blend(&per_recommender, &weights, &HashSet::new(), 10);
        assert_eq!(guids(&blended), vec!["x"]);
    }

    #[test]
    fn test_interleave_alternates_and_dedupes() {
        let primary = results(&[("a", 0.9), ("b", 0.8), ("c", 0.7)]);
        let secondary = results(&[("b", 1.0), ("d", 0.5), ("e", 0.3)]);

        let merged = interleave(&primary, &secondary, &HashSet::new(), 10);
        assert_eq!(guids(&merged), vec!["a", "b", "c", "d", "e"]);
        // Each guid keeps the weight of the list it was taken from
        assert_eq!(merged[1], ("b".to_string(), 1.0));
    }

    #[test]
    fn test_interleave_respects_exclude_and_limit() {
        let primary = results(&[("a", 0.9), ("b", 0.8)]);
        let secondary = results(&[("x", 1.0), ("y", 0.5)]);
        let exclude = HashSet::from(["a".to_string()]);

        let merged = interleave(&primary, &secondary, &exclude, 3);
        assert_eq!(guids(&merged), vec!["b", "x", "y"]);
    }

    #[test]
    fn test_unbounded_limit_returns_everything() {
        let primary = results(&[("a", 0.9), ("b", 0.8)]);
        let secondary = results(&[("x", 1.0)]);
        let merged = interleave(&primary, &secondary, &HashSet::new(), usize::MAX);
        assert_eq!(guids(&merged), vec!["a", "x", "b"]);

        let per_recommender = BTreeMap::from([("a".to_string(), primary)]);
        let weights = HashMap::from([("a".to_string(), 1.0)]);
        let blended = blend(&per_recommender, &weights, &HashSet::new(), usize::MAX);
        assert_eq!(guids(&blended), vec!["a", "b"]);
    }

    #[test]
    fn test_interleave_drains_longer_list() {
        let primary = results(&[("a", 0.9)]);
        let secondary = results(&[("x", 1.0), ("y", 0.5), ("z", 0.1)]);

        let merged = interleave(&primary, &secondary, &HashSet::new(), 10);
        assert_eq!(guids(&merged), vec!["a", "x", "y", "z"]);
    }
}
