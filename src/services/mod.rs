pub mod cache;
pub mod coinstall;
pub mod datasets;
pub mod ensemble;
pub mod normalization;
pub mod recommenders;
pub mod scheduler;
pub mod source;

pub use cache::{GenerationView, GenerationalCache, RefreshOutcome, RefreshReport};
pub use coinstall::CoinstallEngine;
pub use datasets::{DatasetCatalog, DatasetKind, DatasetSpec};
pub use ensemble::{EnsembleRecommender, HybridRecommender};
pub use recommenders::{CoinstallRecommender, CuratedRecommender, LocaleRecommender, Recommender};
pub use scheduler::RefreshSchedulerHandle;
pub use source::{DatasetSource, HttpDatasetSource, StaticSource};
