mod common;

use std::rc::Rc;

use common::CannedHttp;
use futures::executor::block_on;
use futures::StreamExt;
use portal_filter::feature::InMemoryFeatureProvider;
use portal_filter::interface::AttrType;
use portal_filter::register::IntervalRegister;
use portal_filter::sta::StaExtern;
use portal_filter::rule::{FilterQuestion, Operator, Rule, Service, ServiceKind};
use portal_filter::{FilterConfig, FilterError, FilterInterface, FilterService};
use serde_json::{json, Value};

const MEASUREMENT: &str = "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement";

fn thing(id: u64, name: &str, free: u64) -> Value {
    json!({
        "@iot.id": id,
        "name": name,
        "description": "Ladestation",
        "properties": { "ownerThing": "Stromnetz Hamburg", "assetID": format!("E{id}") },
        "Locations": [{ "location": { "type": "Point", "coordinates": [10.0 + id as f64 / 100.0, 53.5] } }],
        "Datastreams": [{
            "@iot.id": id * 10,
            "name": "freie Ladepunkte",
            "observationType": MEASUREMENT,
            "Observations": [{ "@iot.id": id * 100, "result": free, "phenomenonTime": "2024-05-01T10:00:00Z" }]
        }]
    })
}

fn page(count: usize, things: Vec<Value>) -> String {
    json!({ "@iot.count": count, "value": things }).to_string()
}

fn http() -> CannedHttp {
    CannedHttp::new()
        .route(
            &["/v1.1/Things", "$top=2", "$skip=0", "$count=true"],
            200,
            &page(3, vec![thing(1, "Jungfernstieg", 0), thing(2, "Rathausmarkt", 2)]),
        )
        .route(
            &["/v1.1/Things", "$top=2", "$skip=2"],
            200,
            &page(3, vec![thing(3, "Mönckebergstraße", 1)]),
        )
}

fn service() -> Service {
    Service::new(ServiceKind::Sta, "sta-layer").with_url("https://iot.hamburg.de/v1.1/")
}

fn config() -> FilterConfig {
    FilterConfig {
        sta_page_size: 2,
        ..FilterConfig::default()
    }
}

fn interface(http: Rc<CannedHttp>) -> FilterInterface {
    FilterInterface::new(config(), Rc::new(InMemoryFeatureProvider::new()), http)
}

#[test]
fn filter_pages_through_things() {
    let http = Rc::new(http());
    let interface = interface(http.clone());
    let question = FilterQuestion::new(
        1,
        service(),
        vec![Rule::new("@Datastreams.0.Observations.0.result", Operator::Gt, json!(0))],
    )
    .with_paging(2);

    let answers = block_on(interface.filter(question).collect::<Vec<_>>())
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert_eq!(answers.len(), 2);
    assert_eq!((answers[0].page, answers[0].total), (1, 2));
    assert_eq!((answers[1].page, answers[1].total), (2, 2));
    assert!(answers[1].is_last());

    let names = answers
        .iter()
        .flat_map(|a| a.items.iter())
        .map(|f| f.properties["name"].clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec![json!("Rathausmarkt"), json!("Mönckebergstraße")]);
    assert!(!interface.register().is_registered(1));
    assert!(http.requests.borrow()[0].contains("$expand=Locations,Datastreams($expand=Observations($top=1;$orderby=phenomenonTime desc))"));
}

#[test]
fn attr_types_use_what_the_filter_fetched() {
    let http = Rc::new(http());
    let interface = interface(http.clone());
    block_on(interface.filter(FilterQuestion::new(2, service(), Vec::new()).with_paging(2)).collect::<Vec<_>>());
    let requests = http.request_count();

    let types = block_on(interface.get_attr_types(&service(), 2)).unwrap();
    assert_eq!(http.request_count(), requests);
    assert_eq!(types["@Datastreams.0.Observations.0.result"], AttrType::Number);
    assert_eq!(types["@Datastreams.0.Observations.0.phenomenonTime"], AttrType::Date);
    assert_eq!(types["assetID"], AttrType::String);

    // another filter has its own caches and has to fetch
    block_on(interface.get_attr_types(&service(), 3)).unwrap();
    assert_eq!(http.request_count(), requests + 1);
}

#[test]
fn unique_values_and_min_max_fetch_every_page() {
    let http = Rc::new(http());
    let interface = interface(http.clone());
    let values = block_on(interface.get_unique_values(&service(), "@Datastreams.0.Observations.0.result", 4)).unwrap();
    assert_eq!(values, vec![json!(0), json!(2), json!(1)]);
    assert_eq!(http.request_count(), 2);

    let mm = block_on(interface.get_min_max(&service(), "@Datastreams.0.Observations.0.result", true, true, 4)).unwrap();
    assert_eq!((mm.min, mm.max), (Some(json!(0)), Some(json!(2))));

    let owners = block_on(interface.get_unique_values(&service(), "ownerThing", 4)).unwrap();
    assert_eq!(owners, vec![json!("Stromnetz Hamburg")]);
}

#[test]
fn newer_question_silences_the_older_one() {
    let http = Rc::new(http());
    let interface = interface(http.clone());
    let old = interface.filter(FilterQuestion::new(5, service(), Vec::new()).with_paging(2));
    let new = interface.filter(FilterQuestion::new(5, service(), Vec::new()).with_paging(2));

    assert!(block_on(old.collect::<Vec<_>>()).is_empty());
    assert_eq!(block_on(new.collect::<Vec<_>>()).len(), 2);
    assert_eq!(http.request_count(), 2);
}

#[test]
fn stop_twice_leaves_nothing_registered() {
    let http = Rc::new(http());
    let interface = interface(http.clone());
    let mut answers = interface.filter(FilterQuestion::new(6, service(), Vec::new()).with_paging(2));
    let first = block_on(answers.next());
    assert!(matches!(first, Some(Ok(_))));

    interface.stop(6);
    interface.stop(6);
    assert!(!interface.register().is_registered(6));
    assert!(block_on(answers.next()).is_none());
    assert_eq!(http.request_count(), 1);
}

#[test]
fn server_errors_end_the_stream() {
    let http = Rc::new(CannedHttp::new().route(&["/Things"], 500, "Internal Server Error"));
    let interface = interface(http);
    let answers = block_on(interface.filter(FilterQuestion::new(7, service(), Vec::new())).collect::<Vec<_>>());
    assert_eq!(answers.len(), 1);
    assert!(matches!(answers[0], Err(FilterError::Http { status: 500, .. })));
    assert!(!interface.register().is_registered(7));
}

#[test]
fn missing_url_is_an_error() {
    let interface = interface(Rc::new(CannedHttp::new()));
    let service = Service::new(ServiceKind::Sta, "no-url");
    let err = block_on(interface.get_attr_types(&service, 8)).unwrap_err();
    assert!(matches!(err, FilterError::MissingUrl(_)));
}

#[test]
fn refetched_things_replace_their_cached_properties() {
    let http = Rc::new(http());
    let sta = StaExtern::new(Rc::new(config()), http.clone(), IntervalRegister::new());
    for _ in 0..3 {
        let answers = block_on(sta.filter(FilterQuestion::new(9, service(), Vec::new()).with_paging(2)).collect::<Vec<_>>());
        assert_eq!(answers.len(), 2);
        assert_eq!(sta.all_fetched_properties().len(), 3);
    }
    block_on(sta.get_unique_values(&service(), "name", 9)).unwrap();
    assert_eq!(sta.all_fetched_properties().len(), 3);
    assert_eq!(http.request_count(), 8);
}

#[test]
fn datastreams_as_root_entity() {
    let datastreams = json!({
        "@iot.count": 1,
        "value": [{
            "@iot.id": 40,
            "name": "Wasserstand St. Pauli",
            "observationType": MEASUREMENT,
            "Observations": [{ "@iot.id": 400, "result": 512.5, "phenomenonTime": "2024-05-01T10:00:00Z" }]
        }]
    })
    .to_string();
    let http = Rc::new(CannedHttp::new().route(&["/v1.1/Datastreams"], 200, &datastreams));
    let interface = interface(http.clone());
    let mut service = service();
    service.root_entity = Some("Datastreams".to_string());

    let types = block_on(interface.get_attr_types(&service, 10)).unwrap();
    assert_eq!(types["@Observations.0.result"], AttrType::Number);
    assert_eq!(types["observationType"], AttrType::String);

    let levels = block_on(interface.get_unique_values(&service, "@Observations.0.result", 10)).unwrap();
    assert_eq!(levels, vec![json!(512.5)]);
}
