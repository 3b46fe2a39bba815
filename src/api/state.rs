use std::sync::Arc;

use crate::config::Config;
use crate::models::Normalization;
use crate::services::{
    CoinstallEngine, CoinstallRecommender, CuratedRecommender, EnsembleRecommender,
    GenerationalCache, HybridRecommender, LocaleRecommender, Recommender,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<GenerationalCache>,
    pub coinstall: Arc<CoinstallEngine>,
    pub ensemble: Arc<EnsembleRecommender>,
    pub hybrid: Arc<HybridRecommender>,
    pub default_limit: usize,
    /// Largest `limit` a request may ask for
    pub max_limit: usize,
}

impl AppState {
    /// Wires every recommender over one shared cache
    pub fn new(cache: Arc<GenerationalCache>, config: &Config) -> Self {
        let curated = Arc::new(CuratedRecommender);
        let members: Vec<Arc<dyn Recommender>> = vec![
            Arc::new(CoinstallRecommender::new(Normalization::default())),
            Arc::new(LocaleRecommender),
            curated.clone() as Arc<dyn Recommender>,
        ];
        let ensemble = Arc::new(EnsembleRecommender::new(
            members,
            config.ensemble_weights_ttl(),
        ));

        Self {
            coinstall: Arc::new(CoinstallEngine::new(cache.clone())),
            hybrid: Arc::new(HybridRecommender::new(ensemble.clone(), curated)),
            ensemble,
            cache,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }
}
