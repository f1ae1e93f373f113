//! SensorThings API backend.
//!
//! Things (or any other root entity) are fetched page by page with their
//! locations and the latest observation of each datastream, converted to
//! features and filtered like loaded layers. Everything fetched for a
//! filter is remembered as flattened `@`-paths to answer `get_attr_types`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_derive::{Deserialize, Serialize};
use serde_json::Map;

use crate::config::FilterConfig;
use crate::error::{FilterError, Result};
use crate::feature::{feature_intersects, Feature, Geometry};
use crate::http::HttpClient;
use crate::interface::{
    get_min_max_from_unique_values, register_stream, AttrType, AttrTypes, FilterService, FilterStream, MinMax,
};
use crate::predicate::check_rules;
use crate::register::IntervalRegister;
use crate::rule::{FilterAnswer, FilterId, FilterQuestion, Service};
use crate::value::{value_of, UniqueValues, Value};

pub const DEFAULT_ROOT_ENTITY: &str = "Things";

/// Attribute types known for STA resources: observation type URIs and the
/// fields of each entity set.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StaResourceTypes {
    pub observation_types: BTreeMap<String, String>,
    pub entities: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaResourceTypes {
    /// The table compiled from `src/sta_resource_types.json`.
    pub fn builtin() -> Self {
        include!(concat!(env!("OUT_DIR"), "/sta_resource_types.rs"))
    }

    pub fn observation_type(&self, uri: &str) -> Option<AttrType> {
        self.observation_types
            .get(uri)
            .and_then(|t| AttrType::from_name(t))
    }

    pub fn field_type(&self, entity: &str, field: &str) -> Option<AttrType> {
        self.entities
            .get(entity)
            .and_then(|fields| fields.get(field))
            .and_then(|t| AttrType::from_name(t))
    }
}

/// One page of an entity set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StaPage {
    #[serde(default, rename = "@iot.count")]
    pub count: Option<usize>,
    #[serde(default)]
    pub value: Vec<Map<String, Value>>,
}

fn geometry_of_location(location: &Value) -> Option<Geometry> {
    let geometry = match location.get("type").and_then(|t| t.as_str()) {
        Some("Feature") => location.get("geometry")?,
        _ => location,
    };
    serde_json::from_value(geometry.clone()).ok()
}

/// Entity fields copied into the feature properties. `observationType`,
/// `unitOfMeasurement` and `Observations` only exist on datastreams.
const ENTITY_FIELDS: &[&str] = &[
    "@iot.id",
    "name",
    "description",
    "observationType",
    "unitOfMeasurement",
    "Datastreams",
    "Observations",
];

/// Converts an STA entity (a thing, or a datastream when that is the root
/// entity) into a feature: its `properties` plus the [`ENTITY_FIELDS`].
pub fn sta_entity_to_feature(entity: &Map<String, Value>) -> Feature {
    let mut properties = match entity.get("properties") {
        Some(Value::Object(o)) => o.clone(),
        _ => Map::new(),
    };
    for key in ENTITY_FIELDS.iter().copied() {
        if let Some(v) = entity.get(key) {
            properties.insert(key.to_string(), v.clone());
        }
    }

    let geometry = entity
        .get("Locations")
        .and_then(|l| l.as_array())
        .and_then(|l| l.iter().find_map(|loc| loc.get("location").and_then(geometry_of_location)))
        .or_else(|| entity.get("location").and_then(geometry_of_location));

    Feature {
        id: entity.get("@iot.id").cloned(),
        properties,
        geometry,
    }
}

/// Flattens nested objects and arrays into `@`-paths, e.g.
/// `@Datastreams.0.Observations.0.result`. Top level scalars keep their name.
pub fn flatten_properties(properties: &Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    for (key, value) in properties.iter() {
        match value {
            Value::Object(_) | Value::Array(_) => flatten_into(&format!("@{key}"), value, &mut flat),
            Value::Null => continue,
            _ => {
                flat.insert(key.clone(), value.clone());
            }
        }
    }
    flat
}

fn flatten_into(prefix: &str, value: &Value, target: &mut Map<String, Value>) {
    match value {
        Value::Object(o) => {
            for (k, v) in o.iter() {
                flatten_into(&format!("{prefix}.{k}"), v, target);
            }
        }
        Value::Array(a) => {
            for (i, v) in a.iter().enumerate() {
                flatten_into(&format!("{prefix}.{i}"), v, target);
            }
        }
        Value::Null => {}
        _ => {
            target.insert(prefix.to_string(), value.clone());
        }
    }
}

/// Entity set, field and datastream path of a flattened `@`-path:
/// `@Datastreams.0.Observations.1.result` gives
/// `("Observations", "result", "@Datastreams.0")`.
fn split_resource_path(key: &str) -> Option<(&str, String, String)> {
    let segments = key.strip_prefix('@')?.split('.').collect::<Vec<_>>();
    let last_index = segments.iter().rposition(|s| s.parse::<usize>().is_ok())?;
    if last_index == 0 || last_index + 1 >= segments.len() {
        return None;
    }
    let entity = segments[last_index - 1];
    let field = segments[last_index + 1..].join(".");
    let parent = if last_index >= 2 {
        format!("@{}", segments[..last_index - 1].join("."))
    } else {
        String::new()
    };
    Some((entity, field, parent))
}

/// Resource path without indexes, `Datastreams.Observations.result`.
fn resource_path(key: &str) -> String {
    key.trim_start_matches('@')
        .split('.')
        .filter(|s| s.parse::<usize>().is_err())
        .collect::<Vec<_>>()
        .join(".")
}

fn attr_types_with<F>(all_fetched_properties: &[Map<String, Value>], resource_types: &StaResourceTypes, mut observation_type: F) -> AttrTypes
where
    F: FnMut(&str, &str) -> Option<AttrType>,
{
    let mut types = AttrTypes::new();
    for props in all_fetched_properties {
        for (key, value) in props.iter() {
            if types.contains_key(key) {
                continue;
            }
            let known = split_resource_path(key).and_then(|(entity, field, parent)| {
                if entity == "Observations" && field == "result" {
                    // the datastream is the root entity if there is no parent path
                    let uri_key = if parent.is_empty() {
                        "observationType".to_string()
                    } else {
                        format!("{parent}.observationType")
                    };
                    let uri = props.get(&uri_key)?.as_str()?;
                    return observation_type(uri, &resource_path(key));
                }
                resource_types.field_type(entity, &field)
            });
            if let Some(t) = known.or_else(|| AttrType::of_value(value)) {
                types.insert(key.clone(), t);
            }
        }
    }
    types
}

/// Attribute types of everything fetched so far: types from the resource
/// table where it knows the path, the type of the first value otherwise.
pub fn get_attr_types_by_all_fetched_properties(
    all_fetched_properties: &[Map<String, Value>],
    resource_types: &StaResourceTypes,
) -> AttrTypes {
    attr_types_with(all_fetched_properties, resource_types, |uri, _| {
        resource_types.observation_type(uri)
    })
}

#[derive(Debug, Default)]
struct StaCache {
    /// One entry per fetched entity, in order of first fetch.
    all_fetched_properties: Vec<Map<String, Value>>,
    /// Entity key to its index in `all_fetched_properties`.
    fetched_entities: BTreeMap<String, usize>,
    observation_types: BTreeMap<(String, String), Option<AttrType>>,
}

/// STA backend for one filter. Clones share the caches.
#[derive(Clone)]
pub struct StaExtern {
    config: Rc<FilterConfig>,
    http: Rc<dyn HttpClient>,
    register: IntervalRegister,
    resource_types: Rc<StaResourceTypes>,
    cache: Rc<RefCell<StaCache>>,
}

impl StaExtern {
    pub fn new(config: Rc<FilterConfig>, http: Rc<dyn HttpClient>, register: IntervalRegister) -> Self {
        let resource_types = Rc::new(config.resource_types());
        Self {
            config,
            http,
            register,
            resource_types,
            cache: Rc::new(RefCell::new(StaCache::default())),
        }
    }

    pub fn build_url(&self, service: &Service, top: usize, skip: usize) -> Result<String> {
        let url = service
            .url
            .as_deref()
            .ok_or_else(|| FilterError::MissingUrl(service.layer_id.clone()))?;
        let root = service.root_entity.as_deref().unwrap_or(DEFAULT_ROOT_ENTITY);
        let base = format!("{}/{}", url.trim_end_matches('/'), root);

        let top = top.to_string();
        let skip = skip.to_string();
        let mut params = vec![
            ("$top", top.as_str()),
            ("$skip", skip.as_str()),
            ("$count", "true"),
            ("$expand", self.config.sta_expand.as_str()),
        ];
        if let Some(f) = service.sta_filter.as_deref() {
            params.push(("$filter", f));
        }
        let url = reqwest::Url::parse_with_params(&base, &params)
            .map_err(|e| FilterError::Config(format!("invalid url {base}: {e}")))?;
        Ok(url.to_string())
    }

    async fn fetch_page(&self, service: &Service, top: usize, skip: usize) -> Result<StaPage> {
        let url = self.build_url(service, top, skip)?;
        tracing::debug!(url = url.as_str(), "fetching STA page");
        let body = self.http.get(&url).await?.into_body()?;
        Ok(serde_json::from_str::<StaPage>(&body)?)
    }

    /// Fetches a page, converts its entities and remembers their properties.
    async fn fetch_features(&self, service: &Service, top: usize, skip: usize) -> Result<(Vec<Feature>, Option<usize>)> {
        let page = self.fetch_page(service, top, skip).await?;
        let features = page.value.iter().map(sta_entity_to_feature).collect::<Vec<_>>();
        self.remember(&features);
        Ok((features, page.count))
    }

    /// Stores the flattened properties of `features`. An entity fetched
    /// again replaces its earlier entry.
    fn remember(&self, features: &[Feature]) {
        let mut cache = self.cache.borrow_mut();
        for feature in features {
            let flat = flatten_properties(&feature.properties);
            let key = match &feature.id {
                Some(id) => id.to_string(),
                None => Value::Object(flat.clone()).to_string(),
            };
            match cache.fetched_entities.get(&key).copied() {
                Some(i) => cache.all_fetched_properties[i] = flat,
                None => {
                    let i = cache.all_fetched_properties.len();
                    cache.all_fetched_properties.push(flat);
                    cache.fetched_entities.insert(key, i);
                }
            }
        }
    }

    /// Every feature of the entity set, page by page.
    async fn fetch_all(&self, service: &Service) -> Result<Vec<Feature>> {
        let top = self.config.sta_page_size.max(1);
        let mut all = Vec::new();
        loop {
            let (features, count) = self.fetch_features(service, top, all.len()).await?;
            let fetched = features.len();
            all.extend(features);
            let done = match count {
                Some(c) => all.len() >= c,
                None => fetched < top,
            };
            if done || fetched == 0 {
                return Ok(all);
            }
        }
    }

    pub fn all_fetched_properties(&self) -> Vec<Map<String, Value>> {
        self.cache.borrow().all_fetched_properties.clone()
    }

    /// Read-through lookup of the observation type cache.
    fn cached_observation_type(&self, uri: &str, path: &str) -> Option<AttrType> {
        let key = (uri.to_string(), path.to_string());
        if let Some(t) = self.cache.borrow().observation_types.get(&key) {
            return *t;
        }
        let t = self.resource_types.observation_type(uri);
        self.cache.borrow_mut().observation_types.insert(key, t);
        t
    }

    pub fn cached_observation_types(&self) -> usize {
        self.cache.borrow().observation_types.len()
    }
}

#[async_trait(?Send)]
impl FilterService for StaExtern {
    async fn get_attr_types(&self, service: &Service, _filter_id: FilterId) -> Result<AttrTypes> {
        if self.cache.borrow().all_fetched_properties.is_empty() {
            self.fetch_features(service, self.config.sta_page_size.max(1), 0)
                .await?;
        }
        let props = self.all_fetched_properties();
        Ok(attr_types_with(&props, &self.resource_types, |uri, path| {
            self.cached_observation_type(uri, path)
        }))
    }

    async fn get_min_max(
        &self,
        service: &Service,
        attr_name: &str,
        min: bool,
        max: bool,
        filter_id: FilterId,
    ) -> Result<MinMax> {
        let values = self.get_unique_values(service, attr_name, filter_id).await?;
        Ok(get_min_max_from_unique_values(&values, min, max))
    }

    async fn get_unique_values(
        &self,
        service: &Service,
        attr_name: &str,
        _filter_id: FilterId,
    ) -> Result<Vec<Value>> {
        let features = self.fetch_all(service).await?;
        let mut values = UniqueValues::new();
        for feature in features.iter() {
            if let Some(v) = value_of(feature, attr_name) {
                values.insert(v.clone());
            }
        }
        Ok(values.into_vec())
    }

    fn filter(&self, question: FilterQuestion) -> FilterStream {
        let (registration, ticket) = self.register.start(question.filter_id);
        let top = question
            .commands
            .paging
            .unwrap_or(self.config.sta_page_size)
            .max(1);
        let this = self.clone();
        let question = Rc::new(question);

        let pages = stream::unfold(Some(0usize), move |skip| {
            let this = this.clone();
            let question = question.clone();
            async move {
                let skip = skip?;
                let page = skip / top + 1;
                let fetched = match this.fetch_page(&question.service, top, skip).await {
                    Ok(s) => s,
                    Err(e) => return Some((Err(e), None)),
                };
                let total = match fetched.count {
                    Some(c) => c.div_ceil(top).max(1),
                    None if fetched.value.len() < top => page,
                    None => page + 1,
                };
                let features = fetched.value.iter().map(sta_entity_to_feature).collect::<Vec<_>>();
                // a replaced run must not touch the caches of the new one
                if !this.register.is_current(&ticket) {
                    return None;
                }
                this.remember(&features);

                let items = features
                    .into_iter()
                    .filter(|f| check_rules(&question.rules, f))
                    .filter(|f| match &question.commands.geometry {
                        Some(g) => feature_intersects(f, g),
                        None => true,
                    })
                    .collect::<Vec<_>>();
                tracing::debug!(filter_id = question.filter_id, page, total, items = items.len(), "STA page");
                let next = if page >= total { None } else { Some(skip + top) };
                let answer = FilterAnswer {
                    filter_id: question.filter_id,
                    service: question.service.clone(),
                    items,
                    page,
                    total,
                };
                Some((Ok(answer), next))
            }
        });
        register_stream(pages, &self.register, ticket, registration)
    }

    fn stop(&self, filter_id: FilterId) {
        self.register.stop(filter_id);
    }
}
