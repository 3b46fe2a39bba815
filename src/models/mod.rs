mod profile;
mod recommendation;

pub use profile::ClientProfile;
pub use recommendation::{
    sortable_rank_key, CoinstallRow, Normalization, RankKey, Recommendation,
};
