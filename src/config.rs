use serde::Deserialize;
use std::time::Duration;

/// Which backend holds the generational store
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Redis connection URL (logical databases 0, 1 and 2 are used)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP endpoint fronting the object store, queried as `{base}/{bucket}/{key}`
    #[serde(default = "default_dataset_base_url")]
    pub dataset_base_url: String,

    #[serde(default = "default_dataset_bucket")]
    pub dataset_bucket: String,

    #[serde(default = "default_coinstall_key")]
    pub coinstall_key: String,

    #[serde(default = "default_ranking_key")]
    pub ranking_key: String,

    #[serde(default = "default_ensemble_weights_key")]
    pub ensemble_weights_key: String,

    #[serde(default = "default_locale_key")]
    pub locale_key: String,

    #[serde(default = "default_curated_key")]
    pub curated_key: String,

    /// Additional opaque model blobs stored alongside each generation
    #[serde(default)]
    pub extra_blob_keys: Vec<String>,

    /// How long a refresh lease lives before another process may take over
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Local re-fetch interval for ensemble weights
    #[serde(default = "default_ensemble_weights_ttl_secs")]
    pub ensemble_weights_ttl_secs: u64,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Requests asking for more results than this are rejected
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_dataset_base_url() -> String {
    "https://s3-us-west-2.amazonaws.com".to_string()
}

fn default_dataset_bucket() -> String {
    "telemetry-parquet".to_string()
}

fn default_coinstall_key() -> String {
    "taar/lite/guid_coinstallation.json".to_string()
}

fn default_ranking_key() -> String {
    "taar/lite/guid_install_ranking.json".to_string()
}

fn default_ensemble_weights_key() -> String {
    "taar/ensemble/ensemble_weight.json".to_string()
}

fn default_locale_key() -> String {
    "taar/locale/top10_dict.json.gz".to_string()
}

fn default_curated_key() -> String {
    "taar/whitelist/only_guids_top_200.json".to_string()
}

fn default_lease_ttl_secs() -> u64 {
    3600
}

fn default_refresh_interval_secs() -> u64 {
    3600
}

fn default_ensemble_weights_ttl_secs() -> u64 {
    300
}

fn default_limit() -> usize {
    10
}

fn default_max_limit() -> usize {
    1000
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn ensemble_weights_ttl(&self) -> Duration {
        Duration::from_secs(self.ensemble_weights_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            store_backend: default_store_backend(),
            host: default_host(),
            port: default_port(),
            dataset_base_url: default_dataset_base_url(),
            dataset_bucket: default_dataset_bucket(),
            coinstall_key: default_coinstall_key(),
            ranking_key: default_ranking_key(),
            ensemble_weights_key: default_ensemble_weights_key(),
            locale_key: default_locale_key(),
            curated_key: default_curated_key(),
            extra_blob_keys: Vec::new(),
            lease_ttl_secs: default_lease_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            ensemble_weights_ttl_secs: default_ensemble_weights_ttl_secs(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}
