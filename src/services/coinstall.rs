use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{sortable_rank_key, Normalization, RankKey, Recommendation};
use crate::services::cache::{GenerationView, GenerationalCache};
use crate::services::normalization::normalize_row;

/// Depth of guidception propagation
pub const GUIDCEPTION_LEVELS: u32 = 3;

/// Damping applied to weights discovered at `level` (3 = seed's own row)
fn damping(level: u32) -> f64 {
    let hops = GUIDCEPTION_LEVELS.saturating_sub(level) as f64;
    (1.0 - hops / GUIDCEPTION_LEVELS as f64).powi(2)
}

/// Ranks the add-ons installed alongside a seed add-on.
///
/// Results are ordered by a fixed-width `weight.popularity` key, so ties on
/// weight fall back to install ranking.
pub struct CoinstallEngine {
    cache: Arc<GenerationalCache>,
}

impl CoinstallEngine {
    pub fn new(cache: Arc<GenerationalCache>) -> Self {
        Self { cache }
    }

    /// A seed is recommendable when a generation is active and the seed has a
    /// non-empty coinstallation row in it.
    pub async fn can_recommend(&self, seed_guid: &str) -> AppResult<bool> {
        let Some(view) = self.cache.ensure_fresh().await? else {
            return Ok(false);
        };
        Self::has_row(&view, seed_guid).await
    }

    async fn has_row(view: &GenerationView, seed_guid: &str) -> AppResult<bool> {
        Ok(view
            .coinstall_row(seed_guid)
            .await?
            .is_some_and(|row| !row.is_empty()))
    }

    /// Recommends by normalization name.
    ///
    /// Unknown names decline with an empty result.
    pub async fn recommend(
        &self,
        seed_guid: &str,
        normalization: &str,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        match normalization.parse::<Normalization>() {
            Ok(mode) => self.recommend_with(seed_guid, mode, limit).await,
            Err(e) => {
                tracing::warn!(seed_guid = %seed_guid, error = %e, "Declining recommendation");
                Ok(Vec::new())
            }
        }
    }

    pub async fn recommend_with(
        &self,
        seed_guid: &str,
        mode: Normalization,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        let Some(view) = self.cache.ensure_fresh().await? else {
            tracing::info!(seed_guid = %seed_guid, "No active generation, cannot recommend");
            return Ok(Vec::new());
        };

        if !Self::has_row(&view, seed_guid).await? {
            tracing::debug!(seed_guid = %seed_guid, "No coinstallation data for seed");
            return Ok(Vec::new());
        }

        let weights = Self::weights(&view, seed_guid, mode).await?;
        let ranked = Self::rank(&view, seed_guid, weights, limit).await?;

        tracing::debug!(
            seed_guid = %seed_guid,
            normalization = %mode,
            generation = view.generation().id(),
            results = ranked.len(),
            "Computed coinstallation recommendations"
        );

        Ok(ranked)
    }

    /// Partner weights for `seed_guid` under `mode`, before ranking.
    ///
    /// Partners without usable signal (zero or missing denominators) are
    /// dropped rather than reported as errors.
    pub(crate) async fn weights(
        view: &GenerationView,
        seed_guid: &str,
        mode: Normalization,
    ) -> AppResult<HashMap<String, f64>> {
        let Some(row) = view.filtered_row(seed_guid).await? else {
            return Ok(HashMap::new());
        };

        let mut weights = HashMap::with_capacity(row.len());
        match mode {
            Normalization::None => {
                weights.extend(row.iter().map(|(guid, count)| (guid.clone(), *count)));
            }
            Normalization::RowCount => {
                for (guid, count) in row.iter() {
                    if let Some(rows) = view.row_count(guid).await?.filter(|n| *n > 0.0) {
                        weights.insert(guid.clone(), count / rows);
                    }
                }
            }
            Normalization::RowSum => {
                for (guid, count) in row.iter() {
                    if let Some(total) = view.count_map(guid).await?.filter(|t| *t > 0.0) {
                        weights.insert(guid.clone(), count / total);
                    }
                }
            }
            Normalization::RownormSum => {
                let Some(normalized) = normalize_row(&row) else {
                    return Ok(weights);
                };
                for (guid, ratio) in normalized {
                    if let Some(sum) = view.rownorm_sum(&guid).await?.filter(|s| *s > 0.0) {
                        weights.insert(guid, ratio / sum);
                    }
                }
            }
            Normalization::Guidception => {
                if let Some(normalized) = normalize_row(&row) {
                    let totals = Self::propagate(view, normalized).await?;
                    weights = normalize_row(&totals).unwrap_or_default();
                }
            }
        }

        Ok(weights)
    }

    /// Multi-hop propagation over coinstallation rows.
    ///
    /// Each `(guid, level)` visit adds the damped weights of a row-normalized
    /// row to the running totals, then expands every partner one level deeper
    /// using that partner's own row. Depth is bounded by [`GUIDCEPTION_LEVELS`]
    /// only; cycles are revisited.
    async fn propagate(
        view: &GenerationView,
        seed_row: HashMap<String, f64>,
    ) -> AppResult<HashMap<String, f64>> {
        let mut totals: HashMap<String, f64> = HashMap::new();
        let mut pending: Vec<(Arc<HashMap<String, f64>>, u32)> =
            vec![(Arc::new(seed_row), GUIDCEPTION_LEVELS)];
        let mut normalized_rows: HashMap<String, Option<Arc<HashMap<String, f64>>>> =
            HashMap::new();

        while let Some((row, level)) = pending.pop() {
            let factor = damping(level);
            for (guid, weight) in row.iter() {
                *totals.entry(guid.clone()).or_default() += weight * factor;
            }

            if level <= 1 {
                continue;
            }

            for guid in row.keys() {
                let next = match normalized_rows.get(guid) {
                    Some(cached) => cached.clone(),
                    None => {
                        let next = view
                            .filtered_row(guid)
                            .await?
                            .and_then(|row| normalize_row(&row))
                            .map(Arc::new);
                        normalized_rows.insert(guid.clone(), next.clone());
                        next
                    }
                };
                if let Some(next) = next {
                    pending.push((next, level - 1));
                }
            }
        }

        Ok(totals)
    }

    /// Orders weighted partners by their sortable key, highest first
    async fn rank(
        view: &GenerationView,
        seed_guid: &str,
        weights: HashMap<String, f64>,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        let mut keyed = Vec::with_capacity(weights.len());
        for (guid, weight) in weights {
            if guid == seed_guid || !weight.is_finite() {
                continue;
            }
            let popularity = view.ranking(&guid).await?.unwrap_or(0.0).max(0.0) as u64;
            keyed.push((sortable_rank_key(weight, popularity), guid));
        }

        keyed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        keyed.truncate(limit);

        Ok(keyed
            .into_iter()
            .map(|(key, guid)| Recommendation {
                guid,
                score: RankKey::Sortable(key),
            })
            .collect())
    }
}
