//! `FilterEngine`, the stateful side of the wasm module.
//!
//! Results are handed to JS callbacks as JSON strings, one `onsuccess` per
//! answer page or one `onerror` with the error message.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use futures::StreamExt;
use js_sys::Function;
use serde_derive::Deserialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::console::log_1;

use crate::config::FilterConfig;
use crate::feature::{Extent, Feature, InMemoryFeatureProvider};
use crate::geometry::{get_features_of_additional_geometries, AdditionalGeometry, RawLayer};
use crate::http::ReqwestClient;
use crate::interface::{FilterInterface, FilterService};
use crate::rule::{FilterQuestion, Service};

#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureInput {
    Collection { features: Vec<Feature> },
    List(Vec<Feature>),
}

fn call(f: &Function, s: &str) {
    if let Err(e) = f.call1(&JsValue::NULL, &JsValue::from_str(s)) {
        log_1(&e);
    }
}

fn call_json<T: serde::Serialize>(onsuccess: &Function, onerror: &Function, value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => call(onsuccess, &s),
        Err(e) => call(onerror, &e.to_string()),
    }
}

fn parse<T: serde::de::DeserializeOwned>(s: &str, onerror: &Function) -> Option<T> {
    match serde_json::from_str::<T>(s) {
        Ok(o) => Some(o),
        Err(e) => {
            call(onerror, &e.to_string());
            None
        }
    }
}

#[wasm_bindgen]
pub struct FilterEngine {
    interface: Rc<FilterInterface>,
    provider: Rc<InMemoryFeatureProvider>,
    http: Rc<ReqwestClient>,
    raw_layers: Rc<RefCell<BTreeMap<String, RawLayer>>>,
}

#[wasm_bindgen]
impl FilterEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(config: String) -> Result<FilterEngine, JsValue> {
        let config = FilterConfig::from_json(&config).map_err(|e| JsValue::from_str(&e.to_string()))?;
        crate::logging::init(|line| log_1(&JsValue::from_str(line)), crate::logging::parse_level(&config.log_level));
        let http = Rc::new(ReqwestClient::new(&config).map_err(|e| JsValue::from_str(&e.to_string()))?);
        let provider = Rc::new(InMemoryFeatureProvider::new());
        let interface = FilterInterface::new(config, provider.clone(), http.clone());
        Ok(FilterEngine {
            interface: Rc::new(interface),
            provider,
            http,
            raw_layers: Rc::new(RefCell::new(BTreeMap::new())),
        })
    }

    /// GeoJSON `FeatureCollection` or a list of features.
    #[wasm_bindgen(js_name = setLayerFeatures)]
    pub fn set_layer_features(&self, layer_id: String, features: String) -> Result<(), JsValue> {
        let features = match serde_json::from_str::<FeatureInput>(&features) {
            Ok(FeatureInput::Collection { features }) | Ok(FeatureInput::List(features)) => features,
            Err(e) => return Err(JsValue::from_str(&e.to_string())),
        };
        log_1(&format!("layer {layer_id}: {} features", features.len()).into());
        self.provider.set_layer_features(&layer_id, features);
        Ok(())
    }

    #[wasm_bindgen(js_name = removeLayer)]
    pub fn remove_layer(&self, layer_id: String) {
        self.provider.remove_layer(&layer_id);
    }

    /// `[minX, minY, maxX, maxY]`, or `null` to disable the extent check.
    #[wasm_bindgen(js_name = setMapExtent)]
    pub fn set_map_extent(&self, extent: String) {
        let extent = serde_json::from_str::<Option<Extent>>(&extent).unwrap_or_default();
        self.provider.set_map_extent(extent);
    }

    #[wasm_bindgen(js_name = setRawLayers)]
    pub fn set_raw_layers(&self, raw_layers: String) -> Result<(), JsValue> {
        let list = serde_json::from_str::<Vec<RawLayer>>(&raw_layers).map_err(|e| JsValue::from_str(&e.to_string()))?;
        *self.raw_layers.borrow_mut() = list.into_iter().map(|l| (l.id.clone(), l)).collect();
        Ok(())
    }

    pub fn filter(&self, question: String, onsuccess: Function, onerror: Function) {
        let question = match parse::<FilterQuestion>(&question, &onerror) {
            Some(s) => s,
            None => return,
        };
        let mut answers = self.interface.filter(question);
        spawn_local(async move {
            while let Some(answer) = answers.next().await {
                match answer {
                    Ok(a) => call_json(&onsuccess, &onerror, &a),
                    Err(e) => call(&onerror, &e.to_string()),
                }
            }
        });
    }

    /// Calls `onsuccess` in any case, also if nothing was running.
    pub fn stop(&self, filter_id: f64, onsuccess: Function) {
        self.interface.stop(filter_id as u64);
        call(&onsuccess, "true");
    }

    /// Drops everything cached for a closed filter panel.
    pub fn forget(&self, filter_id: f64) {
        self.interface.forget(filter_id as u64);
    }

    #[wasm_bindgen(js_name = getAttrTypes)]
    pub fn get_attr_types(&self, service: String, filter_id: f64, onsuccess: Function, onerror: Function) {
        let service = match parse::<Service>(&service, &onerror) {
            Some(s) => s,
            None => return,
        };
        let interface = self.interface.clone();
        spawn_local(async move {
            match interface.get_attr_types(&service, filter_id as u64).await {
                Ok(types) => call_json(&onsuccess, &onerror, &types),
                Err(e) => call(&onerror, &e.to_string()),
            }
        });
    }

    #[wasm_bindgen(js_name = getMinMax)]
    #[allow(clippy::too_many_arguments)]
    pub fn get_min_max(
        &self,
        service: String,
        attr_name: String,
        min: bool,
        max: bool,
        filter_id: f64,
        onsuccess: Function,
        onerror: Function,
    ) {
        let service = match parse::<Service>(&service, &onerror) {
            Some(s) => s,
            None => return,
        };
        let interface = self.interface.clone();
        spawn_local(async move {
            match interface
                .get_min_max(&service, &attr_name, min, max, filter_id as u64)
                .await
            {
                Ok(mm) => call_json(&onsuccess, &onerror, &mm),
                Err(e) => call(&onerror, &e.to_string()),
            }
        });
    }

    #[wasm_bindgen(js_name = getUniqueValues)]
    pub fn get_unique_values(
        &self,
        service: String,
        attr_name: String,
        filter_id: f64,
        onsuccess: Function,
        onerror: Function,
    ) {
        let service = match parse::<Service>(&service, &onerror) {
            Some(s) => s,
            None => return,
        };
        let interface = self.interface.clone();
        spawn_local(async move {
            match interface
                .get_unique_values(&service, &attr_name, filter_id as u64)
                .await
            {
                Ok(values) => call_json(&onsuccess, &onerror, &values),
                Err(e) => call(&onerror, &e.to_string()),
            }
        });
    }

    #[wasm_bindgen(js_name = getFeaturesOfAdditionalGeometries)]
    pub fn get_features_of_additional_geometries(&self, list: String, onsuccess: Function) {
        let list = serde_json::from_str::<Vec<AdditionalGeometry>>(&list).unwrap_or_default();
        let raw_layers = self.raw_layers.clone();
        let http = self.http.clone();
        spawn_local(async move {
            let lookup = raw_layers.borrow().clone();
            let result = get_features_of_additional_geometries(&list, &lookup, http.as_ref()).await;
            match serde_json::to_string(&result) {
                Ok(s) => call(&onsuccess, &s),
                Err(e) => log_1(&e.to_string().into()),
            }
        });
    }
}
