use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Partner counts of one coinstallation row: `partner_guid -> count`
pub type CoinstallRow = std::collections::HashMap<String, f64>;

/// Strategy used to turn raw coinstallation counts into weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    None,
    RowCount,
    RowSum,
    #[default]
    RownormSum,
    Guidception,
}

impl Normalization {
    pub fn as_str(self) -> &'static str {
        match self {
            Normalization::None => "none",
            Normalization::RowCount => "row_count",
            Normalization::RowSum => "row_sum",
            Normalization::RownormSum => "rownorm_sum",
            Normalization::Guidception => "guidception",
        }
    }
}

impl Display for Normalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Normalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Normalization::None),
            "row_count" => Ok(Normalization::RowCount),
            "row_sum" => Ok(Normalization::RowSum),
            "rownorm_sum" => Ok(Normalization::RownormSum),
            "guidception" => Ok(Normalization::Guidception),
            other => Err(format!("unknown normalization: {}", other)),
        }
    }
}

/// Ranking value attached to a recommended guid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RankKey {
    Weight(f64),
    /// Fixed-width `weight.popularity` string whose lexicographic order is
    /// the numeric order on `(weight, popularity)`
    Sortable(String),
}

/// Builds the sortable key: weight as a 20-character zero-padded fixed-point
/// number with 10 fractional digits, a `.`, then the popularity padded to 10
/// digits.
pub fn sortable_rank_key(weight: f64, popularity: u64) -> String {
    format!("{:020.10}.{:010}", weight, popularity)
}

/// A single `(guid, rank_key)` entry of a recommendation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub guid: String,
    pub score: RankKey,
}

impl Recommendation {
    pub fn weighted(guid: impl Into<String>, weight: f64) -> Self {
        Self {
            guid: guid.into(),
            score: RankKey::Weight(weight),
        }
    }

    pub fn weight(&self) -> Option<f64> {
        match &self.score {
            RankKey::Weight(w) => Some(*w),
            RankKey::Sortable(key) => key.get(..20).and_then(|w| w.parse().ok()),
        }
    }
}
