use serde::{Deserialize, Serialize};

/// Configuration for a [`DocumentHub`](crate::hub::DocumentHub) instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// The authority this provider answers for. Requests addressed to any
    /// other authority are rejected, never silently corrected.
    pub authority: String,
    /// Maximum number of rows returned by a search query.
    pub search_limit: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            authority: "dochub".to_string(),
            search_limit: 100,
        }
    }
}

impl HubConfig {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            ..Self::default()
        }
    }
}
