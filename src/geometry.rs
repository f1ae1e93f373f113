//! Additional geometries: features of extra WFS layers a filter can use as
//! spatial restriction.

use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};
use serde_json::Map;

use crate::error::{FilterError, Result};
use crate::feature::Feature;
use crate::gml::parse_feature_collection;
use crate::http::HttpClient;
use crate::value::Value;

/// Entry of the raw layer list, as configured in the portal's services file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLayer {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub feature_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

pub trait RawLayerLookup {
    fn get_raw_layer(&self, layer_id: &str) -> Option<RawLayer>;
}

impl RawLayerLookup for BTreeMap<String, RawLayer> {
    fn get_raw_layer(&self, layer_id: &str) -> Option<RawLayer> {
        self.get(layer_id).cloned()
    }
}

impl<F: Fn(&str) -> Option<RawLayer>> RawLayerLookup for F {
    fn get_raw_layer(&self, layer_id: &str) -> Option<RawLayer> {
        (self)(layer_id)
    }
}

/// One configured additional geometry. Fields other than `layerId` are
/// kept as they are and handed back with the features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalGeometry {
    pub layer_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalGeometryFeatures {
    #[serde(flatten)]
    pub descriptor: AdditionalGeometry,
    pub features: Vec<Feature>,
}

pub fn get_feature_url(raw_layer: &RawLayer) -> Result<String> {
    let version = raw_layer.version.as_deref().unwrap_or("1.1.0");
    let typename_key = if version.starts_with('2') { "TYPENAMES" } else { "TYPENAME" };
    let params = [
        ("SERVICE", "WFS"),
        ("VERSION", version),
        ("REQUEST", "GetFeature"),
        (typename_key, raw_layer.feature_type.as_str()),
    ];
    reqwest::Url::parse_with_params(&raw_layer.url, &params)
        .map(|u| u.to_string())
        .map_err(|e| FilterError::Config(format!("invalid url {}: {e}", raw_layer.url)))
}

async fn fetch_features(raw_layer: &RawLayer, http: &dyn HttpClient) -> Result<Vec<Feature>> {
    let url = get_feature_url(raw_layer)?;
    tracing::debug!(url = url.as_str(), layer_id = raw_layer.id.as_str(), "fetching additional geometry");
    let body = http.get(&url).await?.into_body()?;
    Ok(parse_feature_collection(&body)?.features)
}

/// Fetches the features of every entry whose layer can be resolved.
///
/// Entries keep their input order. Unknown layers and failed requests are
/// skipped.
pub async fn get_features_of_additional_geometries(
    list: &[AdditionalGeometry],
    raw_layers: &dyn RawLayerLookup,
    http: &dyn HttpClient,
) -> Vec<AdditionalGeometryFeatures> {
    let futures = list.iter().map(|entry| async move {
        let raw_layer = match raw_layers.get_raw_layer(&entry.layer_id) {
            Some(s) => s,
            None => {
                tracing::warn!(layer_id = entry.layer_id.as_str(), "additional geometry: unknown layer");
                return None;
            }
        };
        match fetch_features(&raw_layer, http).await {
            Ok(features) => Some(AdditionalGeometryFeatures {
                descriptor: entry.clone(),
                features,
            }),
            Err(e) => {
                tracing::warn!(layer_id = entry.layer_id.as_str(), error = %e, "additional geometry: fetch failed");
                None
            }
        }
    });

    futures::future::join_all(futures)
        .await
        .into_iter()
        .flatten()
        .collect()
}
