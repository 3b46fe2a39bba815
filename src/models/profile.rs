use serde::{Deserialize, Serialize};

/// Client attributes supplied by the profile store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub client_id: String,
    #[serde(default)]
    pub installed_addons: Vec<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

impl ClientProfile {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    pub fn with_addons<I, S>(mut self, addons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.installed_addons = addons.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn has_installed(&self, guid: &str) -> bool {
        self.installed_addons.iter().any(|g| g == guid)
    }
}
