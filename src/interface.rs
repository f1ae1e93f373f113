//! The capability every backend offers and the façade dispatching to them.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, AbortRegistration, Abortable, LocalBoxStream, Stream, StreamExt};
use serde_derive::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::error::{FilterError, Result};
use crate::feature::FeatureProvider;
use crate::http::HttpClient;
use crate::register::{IntervalRegister, Ticket};
use crate::rule::{FilterAnswer, FilterId, FilterQuestion, Service, ServiceKind};
use crate::snippet::numeric_bounds;
use crate::sta::StaExtern;
use crate::value::Value;
use crate::wfs_extern::WfsExtern;
use crate::wfs_intern::WfsIntern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    String,
    Number,
    Boolean,
    Date,
    Object,
}

impl AttrType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(AttrType::String),
            "number" => Some(AttrType::Number),
            "boolean" => Some(AttrType::Boolean),
            "date" => Some(AttrType::Date),
            "object" => Some(AttrType::Object),
            _ => None,
        }
    }

    /// Type of a value as seen by the filter UI. `null` has none.
    pub fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(AttrType::Boolean),
            Value::Number(_) => Some(AttrType::Number),
            Value::String(_) => Some(AttrType::String),
            Value::Array(_) | Value::Object(_) => Some(AttrType::Object),
        }
    }
}

pub type AttrTypes = BTreeMap<String, AttrType>;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
}

/// Min and max of a list of raw values, each only if asked for.
///
/// Numeric values (numbers and numeric strings) win, strings are compared
/// as text only if the list has no numeric value at all.
pub fn get_min_max_from_unique_values(list: &[Value], min: bool, max: bool) -> MinMax {
    let bounds = numeric_bounds(list).or_else(|| {
        let mut strings = list.iter().filter_map(|v| v.as_str());
        let first = strings.next()?;
        let (lo, hi) = strings.fold((first, first), |(lo, hi), s| (lo.min(s), hi.max(s)));
        Some((Value::String(lo.to_string()), Value::String(hi.to_string())))
    });
    match bounds {
        Some((lo, hi)) => MinMax {
            min: if min { Some(lo) } else { None },
            max: if max { Some(hi) } else { None },
        },
        None => MinMax::default(),
    }
}

/// Answers of one `filter` call, page by page. Ends after the last page,
/// after the first error, or when the run is stopped or replaced.
pub type FilterStream = LocalBoxStream<'static, Result<FilterAnswer>>;

#[async_trait(?Send)]
pub trait FilterService {
    async fn get_attr_types(&self, service: &Service, filter_id: FilterId) -> Result<AttrTypes>;

    async fn get_min_max(
        &self,
        service: &Service,
        attr_name: &str,
        min: bool,
        max: bool,
        filter_id: FilterId,
    ) -> Result<MinMax>;

    async fn get_unique_values(
        &self,
        service: &Service,
        attr_name: &str,
        filter_id: FilterId,
    ) -> Result<Vec<Value>>;

    fn filter(&self, question: FilterQuestion) -> FilterStream;

    /// Cancels the running `filter` of `filter_id`, if any.
    fn stop(&self, filter_id: FilterId);
}

/// Wraps the answers of one run so that nothing is yielded once the run is
/// no longer current, and unregisters the run after its last answer.
pub(crate) fn register_stream<S>(
    stream: S,
    register: &IntervalRegister,
    ticket: Ticket,
    registration: AbortRegistration,
) -> FilterStream
where
    S: Stream<Item = Result<FilterAnswer>> + 'static,
{
    let current = register.clone();
    let done = register.clone();
    let stream = stream
        .take_while(move |_| future::ready(current.is_current(&ticket)))
        .inspect(move |answer| {
            let last = match answer {
                Ok(a) => a.is_last(),
                Err(_) => true,
            };
            if last {
                done.finish(&ticket);
            }
        });
    Abortable::new(stream, registration).boxed_local()
}

fn unknown(service: &Service) -> FilterError {
    tracing::warn!(layer_id = service.layer_id.as_str(), "unknown service type");
    FilterError::UnknownService(service.layer_id.clone())
}

/// Dispatches on [`ServiceKind`]. All backends share one register, STA
/// backends are created per filter so their caches stay separate.
pub struct FilterInterface {
    config: Rc<FilterConfig>,
    register: IntervalRegister,
    http: Rc<dyn HttpClient>,
    wfs_intern: WfsIntern,
    wfs_extern: WfsExtern,
    sta: RefCell<BTreeMap<FilterId, StaExtern>>,
}

impl FilterInterface {
    pub fn new(config: FilterConfig, provider: Rc<dyn FeatureProvider>, http: Rc<dyn HttpClient>) -> Self {
        let config = Rc::new(config);
        let register = IntervalRegister::new();
        Self {
            wfs_intern: WfsIntern::new(config.clone(), provider, register.clone()),
            wfs_extern: WfsExtern::new(config.clone(), http.clone(), register.clone()),
            sta: RefCell::new(BTreeMap::new()),
            config,
            register,
            http,
        }
    }

    pub fn register(&self) -> &IntervalRegister {
        &self.register
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    fn sta(&self, filter_id: FilterId) -> StaExtern {
        self.sta
            .borrow_mut()
            .entry(filter_id)
            .or_insert_with(|| StaExtern::new(self.config.clone(), self.http.clone(), self.register.clone()))
            .clone()
    }

    /// Drops the STA caches of a closed filter.
    pub fn forget(&self, filter_id: FilterId) {
        self.stop(filter_id);
        self.sta.borrow_mut().remove(&filter_id);
    }
}

#[async_trait(?Send)]
impl FilterService for FilterInterface {
    async fn get_attr_types(&self, service: &Service, filter_id: FilterId) -> Result<AttrTypes> {
        match service.kind {
            ServiceKind::Wfs => self.wfs_intern.get_attr_types(service, filter_id).await,
            ServiceKind::WfsExtern => self.wfs_extern.get_attr_types(service, filter_id).await,
            ServiceKind::Sta => self.sta(filter_id).get_attr_types(service, filter_id).await,
            ServiceKind::Unknown => Err(unknown(service)),
        }
    }

    async fn get_min_max(
        &self,
        service: &Service,
        attr_name: &str,
        min: bool,
        max: bool,
        filter_id: FilterId,
    ) -> Result<MinMax> {
        match service.kind {
            ServiceKind::Wfs => {
                self.wfs_intern
                    .get_min_max(service, attr_name, min, max, filter_id)
                    .await
            }
            ServiceKind::WfsExtern => {
                self.wfs_extern
                    .get_min_max(service, attr_name, min, max, filter_id)
                    .await
            }
            ServiceKind::Sta => {
                self.sta(filter_id)
                    .get_min_max(service, attr_name, min, max, filter_id)
                    .await
            }
            ServiceKind::Unknown => Err(unknown(service)),
        }
    }

    async fn get_unique_values(
        &self,
        service: &Service,
        attr_name: &str,
        filter_id: FilterId,
    ) -> Result<Vec<Value>> {
        match service.kind {
            ServiceKind::Wfs => {
                self.wfs_intern
                    .get_unique_values(service, attr_name, filter_id)
                    .await
            }
            ServiceKind::WfsExtern => {
                self.wfs_extern
                    .get_unique_values(service, attr_name, filter_id)
                    .await
            }
            ServiceKind::Sta => {
                self.sta(filter_id)
                    .get_unique_values(service, attr_name, filter_id)
                    .await
            }
            ServiceKind::Unknown => Err(unknown(service)),
        }
    }

    fn filter(&self, question: FilterQuestion) -> FilterStream {
        tracing::debug!(
            filter_id = question.filter_id,
            layer_id = question.service.layer_id.as_str(),
            "filter"
        );
        match question.service.kind {
            ServiceKind::Wfs => self.wfs_intern.filter(question),
            ServiceKind::WfsExtern => self.wfs_extern.filter(question),
            ServiceKind::Sta => self.sta(question.filter_id).filter(question),
            ServiceKind::Unknown => {
                let err = unknown(&question.service);
                stream::once(future::ready(Err(err))).boxed_local()
            }
        }
    }

    fn stop(&self, filter_id: FilterId) {
        self.register.stop(filter_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn min_max_of_numbers() {
        let list = vec![json!(20), json!(9), json!(30), json!(1)];
        let both = get_min_max_from_unique_values(&list, true, true);
        assert_eq!(serde_json::to_value(&both).unwrap(), json!({"min": 1, "max": 30}));
        let min_only = get_min_max_from_unique_values(&list, true, false);
        assert_eq!(serde_json::to_value(&min_only).unwrap(), json!({"min": 1}));
        let max_only = get_min_max_from_unique_values(&list, false, true);
        assert_eq!(serde_json::to_value(&max_only).unwrap(), json!({"max": 30}));
    }

    #[test]
    fn min_max_prefers_numbers_over_text() {
        let list = vec![json!("b"), json!("12"), json!(3), json!("a")];
        let mm = get_min_max_from_unique_values(&list, true, true);
        assert_eq!(mm.min, Some(json!(3)));
        assert_eq!(mm.max, Some(json!(12.0)));

        let text = vec![json!("Wandsbek"), json!("Altona"), json!("Mitte")];
        let mm = get_min_max_from_unique_values(&text, true, true);
        assert_eq!(mm.min, Some(json!("Altona")));
        assert_eq!(mm.max, Some(json!("Wandsbek")));
    }

    #[test]
    fn min_max_of_nothing_is_empty() {
        assert_eq!(get_min_max_from_unique_values(&[], true, true), MinMax::default());
        assert_eq!(
            serde_json::to_value(get_min_max_from_unique_values(&[json!(true)], true, true)).unwrap(),
            json!({})
        );
    }

    #[test]
    fn attr_types_of_values() {
        assert_eq!(AttrType::of_value(&json!("x")), Some(AttrType::String));
        assert_eq!(AttrType::of_value(&json!(1.5)), Some(AttrType::Number));
        assert_eq!(AttrType::of_value(&json!(false)), Some(AttrType::Boolean));
        assert_eq!(AttrType::of_value(&json!({"a": 1})), Some(AttrType::Object));
        assert_eq!(AttrType::of_value(&Value::Null), None);
        assert_eq!(AttrType::from_name("date"), Some(AttrType::Date));
        assert_eq!(serde_json::to_value(AttrType::Boolean).unwrap(), json!("boolean"));
    }

    struct Offline;

    #[async_trait(?Send)]
    impl HttpClient for Offline {
        async fn get(&self, url: &str) -> Result<crate::http::HttpResponse> {
            Err(FilterError::Network(format!("offline: {url}")))
        }
    }

    #[test]
    fn unknown_service_types_are_errors() {
        use crate::feature::InMemoryFeatureProvider;
        use futures::executor::block_on;

        let service: Service = serde_json::from_value(json!({ "type": "geojson", "layerId": "bezirke" })).unwrap();
        assert_eq!(service.kind, ServiceKind::Unknown);

        let interface = FilterInterface::new(
            FilterConfig::default(),
            Rc::new(InMemoryFeatureProvider::new()),
            Rc::new(Offline),
        );
        let err = block_on(interface.get_attr_types(&service, 1)).unwrap_err();
        assert!(matches!(err, FilterError::UnknownService(ref id) if id == "bezirke"));
        assert!(block_on(interface.get_unique_values(&service, "name", 1)).is_err());
        assert!(block_on(interface.get_min_max(&service, "name", true, true, 1)).is_err());

        let answers = block_on(interface.filter(FilterQuestion::new(1, service, Vec::new())).collect::<Vec<_>>());
        assert_eq!(answers.len(), 1);
        assert!(matches!(answers[0], Err(FilterError::UnknownService(_))));
        assert!(!interface.register().is_registered(1));
    }
}
