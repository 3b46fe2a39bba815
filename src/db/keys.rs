use std::fmt::Display;

/// Keys of the generational store.
///
/// `ActiveGeneration` and `RefreshLease` live in the bookkeeping slot; every
/// other key lives inside a generation slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ActiveGeneration,
    RefreshLease,
    /// Unique per refresh; tells two loads of the same slot apart
    GenerationEpoch,
    Coinstall(String),
    Ranking(String),
    FilteredCoinstall(String),
    CountMap(String),
    RowCount(String),
    RowNorm(String),
    MinInstallThreshold,
    EnsembleWeights,
    LocaleTable,
    CuratedList,
    Blob(String),
}

/// Families of per-guid keys, used to scan or carry over a whole collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Coinstall,
    Ranking,
    FilteredCoinstall,
    CountMap,
    RowCount,
    RowNorm,
}

impl KeyFamily {
    pub fn prefix(self) -> &'static str {
        match self {
            KeyFamily::Coinstall => "coinstall|",
            KeyFamily::Ranking => "ranking|",
            KeyFamily::FilteredCoinstall => "filtered_coinstall|",
            KeyFamily::CountMap => "countmap|",
            KeyFamily::RowCount => "rowcount|",
            KeyFamily::RowNorm => "rownorm|",
        }
    }

    pub fn key(self, guid: &str) -> CacheKey {
        let guid = guid.to_string();
        match self {
            KeyFamily::Coinstall => CacheKey::Coinstall(guid),
            KeyFamily::Ranking => CacheKey::Ranking(guid),
            KeyFamily::FilteredCoinstall => CacheKey::FilteredCoinstall(guid),
            KeyFamily::CountMap => CacheKey::CountMap(guid),
            KeyFamily::RowCount => CacheKey::RowCount(guid),
            KeyFamily::RowNorm => CacheKey::RowNorm(guid),
        }
    }

    /// Recovers the guid from a raw key belonging to this family
    pub fn guid_of(self, raw_key: &str) -> Option<&str> {
        raw_key.strip_prefix(self.prefix())
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::ActiveGeneration => write!(f, "active_generation"),
            CacheKey::RefreshLease => write!(f, "refresh_lease"),
            CacheKey::GenerationEpoch => write!(f, "generation_epoch"),
            CacheKey::Coinstall(guid) => write!(f, "{}{}", KeyFamily::Coinstall.prefix(), guid),
            CacheKey::Ranking(guid) => write!(f, "{}{}", KeyFamily::Ranking.prefix(), guid),
            CacheKey::FilteredCoinstall(guid) => {
                write!(f, "{}{}", KeyFamily::FilteredCoinstall.prefix(), guid)
            }
            CacheKey::CountMap(guid) => write!(f, "{}{}", KeyFamily::CountMap.prefix(), guid),
            CacheKey::RowCount(guid) => write!(f, "{}{}", KeyFamily::RowCount.prefix(), guid),
            CacheKey::RowNorm(guid) => write!(f, "{}{}", KeyFamily::RowNorm.prefix(), guid),
            CacheKey::MinInstallThreshold => write!(f, "min_install_threshold"),
            CacheKey::EnsembleWeights => write!(f, "ensemble_weights"),
            CacheKey::LocaleTable => write!(f, "locale_table"),
            CacheKey::CuratedList => write!(f, "curated_list"),
            CacheKey::Blob(name) => write!(f, "blob|{}", name),
        }
    }
}
