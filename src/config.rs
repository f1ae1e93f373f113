use serde_derive::{Deserialize, Serialize};

use crate::error::{FilterError, Result};
use crate::sta::StaResourceTypes;

pub const DEFAULT_PAGING: usize = 1000;
pub const DEFAULT_STA_EXPAND: &str =
    "Locations,Datastreams($expand=Observations($top=1;$orderby=phenomenonTime desc))";

/// Settings of the filter interfaces, handed over by the portal as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    /// Features per answer if a question does not set `commands.paging`.
    pub default_paging: usize,
    /// `$top` of STA requests if a question does not set `commands.paging`.
    pub sta_page_size: usize,
    pub sta_expand: String,
    pub wfs_version: String,
    /// Ignored on wasm, the browser decides.
    pub http_timeout_secs: u64,
    /// Most verbose level written to the browser console.
    pub log_level: String,
    /// Replaces the resource type table compiled into the crate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sta_resource_types: Option<StaResourceTypes>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            default_paging: DEFAULT_PAGING,
            sta_page_size: DEFAULT_PAGING,
            sta_expand: DEFAULT_STA_EXPAND.to_string(),
            wfs_version: "2.0.0".to_string(),
            http_timeout_secs: 30,
            log_level: "warn".to_string(),
            sta_resource_types: None,
        }
    }
}

impl FilterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let config = serde_json::from_str::<Self>(json)?;
        if config.default_paging == 0 || config.sta_page_size == 0 {
            return Err(FilterError::Config("paging must be at least 1".to_string()));
        }
        Ok(config)
    }

    pub fn resource_types(&self) -> StaResourceTypes {
        match &self.sta_resource_types {
            Some(s) => s.clone(),
            None => StaResourceTypes::builtin(),
        }
    }
}
