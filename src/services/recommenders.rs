use std::collections::HashMap;

use crate::error::AppResult;
use crate::models::{ClientProfile, Normalization};
use crate::services::cache::GenerationView;
use crate::services::coinstall::CoinstallEngine;

/// Capability shared by every recommender the ensemble can blend.
///
/// Every call reads from the one [`GenerationView`] the caller resolved for
/// the request, so a blend never mixes two generations.
#[async_trait::async_trait]
pub trait Recommender: Send + Sync {
    /// Key used to look up this recommender's ensemble weight
    fn name(&self) -> &'static str;

    async fn can_recommend(&self, view: &GenerationView, client: &ClientProfile)
        -> AppResult<bool>;

    /// Weighted guids, highest first
    async fn recommend(
        &self,
        view: &GenerationView,
        client: &ClientProfile,
        limit: usize,
    ) -> AppResult<Vec<(String, f64)>>;
}

/// Sorts by weight descending and keeps the first `limit`
pub(crate) fn top_weighted(mut scored: Vec<(String, f64)>, limit: usize) -> Vec<(String, f64)> {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

/// Profile adapter over [`CoinstallEngine`]: every installed add-on is a seed,
/// and partner weights are summed across seeds.
#[derive(Debug, Default)]
pub struct CoinstallRecommender {
    normalization: Normalization,
}

impl CoinstallRecommender {
    pub fn new(normalization: Normalization) -> Self {
        Self { normalization }
    }
}

#[async_trait::async_trait]
impl Recommender for CoinstallRecommender {
    fn name(&self) -> &'static str {
        "coinstall"
    }

    async fn can_recommend(
        &self,
        view: &GenerationView,
        client: &ClientProfile,
    ) -> AppResult<bool> {
        for guid in &client.installed_addons {
            if view.coinstall_row(guid).await?.is_some_and(|row| !row.is_empty()) {
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
        let mut totals: HashMap<String, f64> = HashMap::new();
        for seed in &client.installed_addons {
            let weights = CoinstallEngine::weights(view, seed, self.normalization).await?;
            for (guid, weight) in weights {
                if weight.is_finite() {
                    *totals.entry(guid).or_default() += weight;
                }
            }
        }

        let scored = totals
            .into_iter()
            .filter(|(guid, _)| !client.has_installed(guid))
            .collect();
        Ok(top_weighted(scored, limit))
    }
}

/// Top add-ons per locale
#[derive(Debug, Default)]
pub struct LocaleRecommender;

impl LocaleRecommender {
    async fn entries(
        view: &GenerationView,
        client: &ClientProfile,
    ) -> AppResult<Vec<(String, f64)>> {
        let Some(locale) = client.locale.as_deref() else {
            return Ok(Vec::new());
        };
        let mut table = view.locale_table().await?.unwrap_or_default();
        Ok(table.remove(locale).unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl Recommender for LocaleRecommender {
    fn name(&self) -> &'static str {
        "locale"
    }

    async fn can_recommend(
        &self,
        view: &GenerationView,
        client: &ClientProfile,
    ) -> AppResult<bool> {
        Ok(!Self::entries(view, client).await?.is_empty())
    }

    async fn recommend(
        &self,
        view: &GenerationView,
        client: &ClientProfile,
        limit: usize,
    ) -> AppResult<Vec<(String, f64)>> {
        let scored = Self::entries(view, client)
            .await?
            .into_iter()
            .filter(|(guid, _)| !client.has_installed(guid))
            .collect();
        Ok(top_weighted(scored, limit))
    }
}

/// Editorially curated add-ons, weighted by list position
#[derive(Debug, Default)]
pub struct CuratedRecommender;

#[async_trait::async_trait]
impl Recommender for CuratedRecommender {
    fn name(&self) -> &'static str {
        "curated"
    }

    async fn can_recommend(
        &self,
        view: &GenerationView,
        _client: &ClientProfile,
    ) -> AppResult<bool> {
        Ok(view
            .curated_list()
            .await?
            .is_some_and(|list| !list.is_empty()))
    }

    async fn recommend(
        &self,
        view: &GenerationView,
        client: &ClientProfile,
        limit: usize,
    ) -> AppResult<Vec<(String, f64)>> {
        Ok(view
            .curated_list()
            .await?
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(position, guid)| (guid, 1.0 / (position as f64 + 1.0)))
            .filter(|(guid, _)| !client.has_installed(guid))
            .take(limit)
            .collect())
    }
}
