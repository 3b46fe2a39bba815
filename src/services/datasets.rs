use std::collections::HashMap;
use std::fmt::Display;

use serde_json::Value;

use crate::config::Config;
use crate::db::{CacheKey, KeyFamily};
use crate::error::{AppError, AppResult};
use crate::models::CoinstallRow;

/// Collections loaded into every generation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    Coinstall,
    Ranking,
    EnsembleWeights,
    LocaleTable,
    CuratedList,
    /// Opaque model blob for another recommender, stored as-is
    Blob(String),
}

impl DatasetKind {
    /// Per-guid key family, for collections stored one key per guid
    pub fn family(&self) -> Option<KeyFamily> {
        match self {
            DatasetKind::Coinstall => Some(KeyFamily::Coinstall),
            DatasetKind::Ranking => Some(KeyFamily::Ranking),
            _ => None,
        }
    }

    /// Store key, for collections stored as a single value
    pub fn single_key(&self) -> Option<CacheKey> {
        match self {
            DatasetKind::Coinstall | DatasetKind::Ranking => None,
            DatasetKind::EnsembleWeights => Some(CacheKey::EnsembleWeights),
            DatasetKind::LocaleTable => Some(CacheKey::LocaleTable),
            DatasetKind::CuratedList => Some(CacheKey::CuratedList),
            DatasetKind::Blob(name) => Some(CacheKey::Blob(name.clone())),
        }
    }
}

impl Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetKind::Coinstall => write!(f, "coinstall"),
            DatasetKind::Ranking => write!(f, "ranking"),
            DatasetKind::EnsembleWeights => write!(f, "ensemble_weights"),
            DatasetKind::LocaleTable => write!(f, "locale"),
            DatasetKind::CuratedList => write!(f, "curated"),
            DatasetKind::Blob(name) => write!(f, "blob:{}", name),
        }
    }
}

/// Where a collection lives in object storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    pub kind: DatasetKind,
    pub bucket: String,
    pub key: String,
}

impl DatasetSpec {
    pub fn new(kind: DatasetKind, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind,
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Every collection a refresh loads
#[derive(Debug, Clone, Default)]
pub struct DatasetCatalog {
    pub specs: Vec<DatasetSpec>,
}

impl DatasetCatalog {
    pub fn from_config(config: &Config) -> Self {
        let bucket = config.dataset_bucket.as_str();
        let mut specs = vec![
            DatasetSpec::new(DatasetKind::Coinstall, bucket, &config.coinstall_key),
            DatasetSpec::new(DatasetKind::Ranking, bucket, &config.ranking_key),
            DatasetSpec::new(
                DatasetKind::EnsembleWeights,
                bucket,
                &config.ensemble_weights_key,
            ),
            DatasetSpec::new(DatasetKind::LocaleTable, bucket, &config.locale_key),
            DatasetSpec::new(DatasetKind::CuratedList, bucket, &config.curated_key),
        ];
        specs.extend(config.extra_blob_keys.iter().map(|key| {
            DatasetSpec::new(DatasetKind::Blob(blob_name(key)), bucket, key)
        }));
        Self { specs }
    }
}

/// Blob name derived from its object key: the file name without extensions
fn blob_name(key: &str) -> String {
    let file = key.rsplit('/').next().unwrap_or(key);
    file.split('.').next().unwrap_or(file).to_string()
}

/// A fetched collection, validated and ready to be written to a slot
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedDataset {
    Coinstall(HashMap<String, CoinstallRow>),
    Ranking(HashMap<String, f64>),
    Single(CacheKey, String),
}

impl DecodedDataset {
    /// Validates `value` against the shape `kind` requires
    pub fn decode(kind: &DatasetKind, value: Value) -> AppResult<Self> {
        let corrupt = |e: serde_json::Error| AppError::CorruptPayload(format!("{}: {}", kind, e));

        match kind {
            DatasetKind::Coinstall => Ok(DecodedDataset::Coinstall(
                serde_json::from_value(value).map_err(corrupt)?,
            )),
            DatasetKind::Ranking => Ok(DecodedDataset::Ranking(
                serde_json::from_value(value).map_err(corrupt)?,
            )),
            DatasetKind::EnsembleWeights => {
                // Published either bare or wrapped in {"ensemble_weights": {...}}
                let value = match value {
                    Value::Object(mut map) if map.contains_key("ensemble_weights") => map
                        .remove("ensemble_weights")
                        .unwrap_or(Value::Null),
                    other => other,
                };
                let weights: HashMap<String, f64> =
                    serde_json::from_value(value).map_err(corrupt)?;
                Ok(DecodedDataset::Single(
                    CacheKey::EnsembleWeights,
                    serde_json::to_string(&weights)?,
                ))
            }
            DatasetKind::LocaleTable => {
                let table: HashMap<String, Vec<(String, f64)>> =
                    serde_json::from_value(value).map_err(corrupt)?;
                Ok(DecodedDataset::Single(
                    CacheKey::LocaleTable,
                    serde_json::to_string(&table)?,
                ))
            }
            DatasetKind::CuratedList => {
                let guids: Vec<String> = serde_json::from_value(value).map_err(corrupt)?;
                Ok(DecodedDataset::Single(
                    CacheKey::CuratedList,
                    serde_json::to_string(&guids)?,
                ))
            }
            DatasetKind::Blob(name) => Ok(DecodedDataset::Single(
                CacheKey::Blob(name.clone()),
                value.to_string(),
            )),
        }
    }

    /// Store entries for this collection
    pub fn entries(&self) -> AppResult<Vec<(String, String)>> {
        match self {
            DecodedDataset::Coinstall(rows) => rows
                .iter()
                .map(|(guid, row)| {
                    Ok((
                        KeyFamily::Coinstall.key(guid).to_string(),
                        serde_json::to_string(row)?,
                    ))
                })
                .collect(),
            DecodedDataset::Ranking(ranking) => ranking
                .iter()
                .map(|(guid, count)| {
                    Ok((
                        KeyFamily::Ranking.key(guid).to_string(),
                        serde_json::to_string(count)?,
                    ))
                })
                .collect(),
            DecodedDataset::Single(key, value) => Ok(vec![(key.to_string(), value.clone())]),
        }
    }
}
