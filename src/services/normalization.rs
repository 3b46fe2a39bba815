use std::collections::HashMap;

use crate::db::{CacheKey, KeyFamily};
use crate::error::AppResult;
use crate::models::CoinstallRow;

/// Fraction of the mean install count a partner needs to be recommended
pub const MIN_INSTALL_FRACTION: f64 = 0.05;

/// Tables derived from a freshly written coinstall and ranking collection.
///
/// Stored in the same generation slot as the data they describe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedTables {
    /// Sum of a guid's counts over every row it appears in as a partner
    pub count_map: HashMap<String, f64>,
    /// Number of rows a guid appears in as a partner
    pub row_count: HashMap<String, u64>,
    /// `count / row_total` for every row a guid appears in as a partner
    pub row_norm: HashMap<String, Vec<f64>>,
    pub min_install_threshold: f64,
    /// Coinstallation rows without partners below the install threshold
    pub filtered_coinstall: HashMap<String, CoinstallRow>,
}

/// `mean(ranking) * MIN_INSTALL_FRACTION`, or 0 for an empty ranking
pub fn min_install_threshold(ranking: &HashMap<String, f64>) -> f64 {
    if ranking.is_empty() {
        return 0.0;
    }
    let mean = ranking.values().sum::<f64>() / ranking.len() as f64;
    mean * MIN_INSTALL_FRACTION
}

/// Divides every value of `row` by the row total.
///
/// Returns `None` when the total is not positive, since such a row carries no
/// usable signal.
pub fn normalize_row(row: &CoinstallRow) -> Option<CoinstallRow> {
    let total: f64 = row.values().sum();
    if !(total > 0.0) || !total.is_finite() {
        return None;
    }
    Some(
        row.iter()
            .map(|(guid, count)| (guid.clone(), count / total))
            .collect(),
    )
}

pub fn derive_tables(
    coinstall: &HashMap<String, CoinstallRow>,
    ranking: &HashMap<String, f64>,
) -> DerivedTables {
    let threshold = min_install_threshold(ranking);
    let mut tables = DerivedTables {
        min_install_threshold: threshold,
        ..Default::default()
    };

    // Sorted iteration keeps RowNorm vectors identical across refreshes of
    // identical data
    let mut seeds: Vec<&String> = coinstall.keys().collect();
    seeds.sort();

    for seed in seeds {
        let row = &coinstall[seed];
        let row_total: f64 = row.values().sum();

        let mut partners: Vec<(&String, &f64)> = row.iter().collect();
        partners.sort_by(|a, b| a.0.cmp(b.0));

        for (partner, count) in partners {
            *tables.count_map.entry(partner.clone()).or_default() += count;
            *tables.row_count.entry(partner.clone()).or_default() += 1;
            if row_total > 0.0 {
                tables
                    .row_norm
                    .entry(partner.clone())
                    .or_default()
                    .push(count / row_total);
            }
        }

        let filtered: CoinstallRow = row
            .iter()
            .filter(|(partner, _)| ranking.get(*partner).copied().unwrap_or(0.0) >= threshold)
            .map(|(partner, count)| (partner.clone(), *count))
            .collect();
        tables.filtered_coinstall.insert(seed.clone(), filtered);
    }

    tables
}

impl DerivedTables {
    /// Serializes the tables into store entries for a generation slot
    pub fn into_entries(self) -> AppResult<Vec<(String, String)>> {
        let mut entries = Vec::with_capacity(
            self.count_map.len()
                + self.row_count.len()
                + self.row_norm.len()
                + self.filtered_coinstall.len()
                + 1,
        );

        for (guid, total) in self.count_map {
            entries.push((
                KeyFamily::CountMap.key(&guid).to_string(),
                serde_json::to_string(&total)?,
            ));
        }
        for (guid, rows) in self.row_count {
            entries.push((KeyFamily::RowCount.key(&guid).to_string(), rows.to_string()));
        }
        for (guid, ratios) in self.row_norm {
            entries.push((
                KeyFamily::RowNorm.key(&guid).to_string(),
                serde_json::to_string(&ratios)?,
            ));
        }
        for (guid, row) in self.filtered_coinstall {
            entries.push((
                KeyFamily::FilteredCoinstall.key(&guid).to_string(),
                serde_json::to_string(&row)?,
            ));
        }
        entries.push((
            CacheKey::MinInstallThreshold.to_string(),
            serde_json::to_string(&self.min_install_threshold)?,
        ));

        Ok(entries)
    }
}
