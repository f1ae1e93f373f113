use serde_json::Map;
use wasm_bindgen::prelude::*;

use crate::legend::{DiagonalHatch, LegendEntry};
use crate::rule::Rule;
use crate::snippet::Snippet;
use crate::sta::StaResourceTypes;
use crate::value::Value;

pub mod config;
pub mod date;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod gml;
pub mod http;
pub mod interface;
pub mod legend;
pub mod logging;
pub mod predicate;
pub mod register;
pub mod rule;
pub mod snippet;
pub mod sta;
pub mod value;
pub mod wfs_extern;
pub mod wfs_intern;
pub mod xml;

#[cfg(target_arch = "wasm32")]
pub mod bindings;

pub use config::FilterConfig;
pub use error::{FilterError, Result};
pub use interface::{FilterInterface, FilterService, FilterStream};

/// GeoJSON features are filtered by their properties, plain objects as they are.
fn item_attributes(item: Value) -> Value {
    let is_feature = item.get("type").and_then(|t| t.as_str()) == Some("Feature");
    match item {
        Value::Object(mut o) if is_feature => match o.remove("properties") {
            Some(p @ Value::Object(_)) => p,
            _ => Value::Object(Map::new()),
        },
        other => other,
    }
}

/// Returns `false` for malformed snippets or items and a non-numeric page.
#[wasm_bindgen]
pub fn lib_get_snippet_adjustments(snippets: String, items: String, page: f64, total: f64) -> String {
    let snippets = match serde_json::from_str::<Vec<Snippet>>(&snippets) {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!("snippet adjustments: invalid snippets: {e}");
            return "false".to_string();
        }
    };
    let items = match serde_json::from_str::<Vec<Value>>(&items) {
        Ok(o) => o.into_iter().map(item_attributes).collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!("snippet adjustments: invalid items: {e}");
            return "false".to_string();
        }
    };
    if !page.is_finite() {
        return "false".to_string();
    }
    let page = page.max(0.0) as usize;
    // NaN never reaches the last page
    let total = if total.is_nan() { usize::MAX } else { total.max(0.0) as usize };

    let adjustments = crate::snippet::get_snippet_adjustments(&snippets, &items, page, total);
    serde_json::to_string(&adjustments).unwrap_or_else(|_| "false".to_string())
}

#[wasm_bindgen]
pub fn lib_get_min_max_from_unique_values(list: String, min: bool, max: bool) -> String {
    let list = serde_json::from_str::<Vec<Value>>(&list).unwrap_or_default();
    let min_max = crate::interface::get_min_max_from_unique_values(&list, min, max);
    serde_json::to_string(&min_max).unwrap_or_else(|_| "{}".to_string())
}

#[wasm_bindgen]
pub fn lib_split_list_with_delimiter(list: String, delimiter: String) -> String {
    let list = serde_json::from_str::<Vec<Value>>(&list).unwrap_or_default();
    let split = crate::value::split_list_with_delimiter(&list, &delimiter);
    serde_json::to_string(&split).unwrap_or_else(|_| "[]".to_string())
}

#[wasm_bindgen]
pub fn lib_check_rules(rules: String, item: String) -> bool {
    let rules = match serde_json::from_str::<Vec<Rule>>(&rules) {
        Ok(o) => o,
        Err(_) => return false,
    };
    let item = match serde_json::from_str::<Value>(&item) {
        Ok(o) => item_attributes(o),
        Err(_) => return false,
    };
    crate::predicate::check_rules(&rules, &item)
}

/// `resource_types` may be empty, the built-in table is used then. Returns
/// `{}` if it is not a valid table.
#[wasm_bindgen]
pub fn lib_get_attr_types_by_all_fetched_properties(all_fetched_properties: String, resource_types: String) -> String {
    let props = serde_json::from_str::<Vec<Map<String, Value>>>(&all_fetched_properties).unwrap_or_default();
    let resource_types = if resource_types.trim().is_empty() {
        StaResourceTypes::builtin()
    } else {
        match serde_json::from_str::<StaResourceTypes>(&resource_types) {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!("attr types: invalid resource types: {e}");
                return "{}".to_string();
            }
        }
    };
    let types = crate::sta::get_attr_types_by_all_fetched_properties(&props, &resource_types);
    serde_json::to_string(&types).unwrap_or_else(|_| "{}".to_string())
}

#[wasm_bindgen]
pub fn lib_get_icon_list_from_legend(legend: String) -> String {
    let legend = serde_json::from_str::<Vec<LegendEntry>>(&legend).unwrap_or_default();
    let icons = crate::legend::get_icon_list_from_legend(&legend, &DiagonalHatch);
    serde_json::to_string(&icons).unwrap_or_else(|_| "{}".to_string())
}
