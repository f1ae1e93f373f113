//! WFS 2.0 backend: rules are sent to the server as an FES 2.0 filter.

use std::rc::Rc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::config::FilterConfig;
use crate::date::parse_date_str;
use crate::error::{FilterError, Result};
use crate::feature::{Feature, Geometry, Position};
use crate::gml::{parse_describe_feature_type, parse_feature_collection, FeatureCollection};
use crate::http::HttpClient;
use crate::interface::{
    get_min_max_from_unique_values, register_stream, AttrTypes, FilterService, FilterStream, MinMax,
};
use crate::register::IntervalRegister;
use crate::rule::{FilterAnswer, FilterId, FilterQuestion, Operator, Rule, Service};
use crate::value::{as_text, value_of, UniqueValues, Value};

const FES_NS: &str = "http://www.opengis.net/fes/2.0";
const GML_NS: &str = "http://www.opengis.net/gml/3.2";

fn escape(s: &str) -> String {
    html_escape::encode_text(s).to_string()
}

fn attr(s: &str) -> String {
    html_escape::encode_double_quoted_attribute(s).to_string()
}

/// Rule values as the server expects them, dates in ISO 8601.
fn literal(value: &Value, format: Option<&str>) -> Option<String> {
    let text = as_text(value)?;
    if let Some(fmt) = format {
        if let Some(date) = parse_date_str(&text, fmt) {
            let iso = if fmt.contains('H') || fmt.contains('h') {
                date.format("%Y-%m-%dT%H:%M:%S").to_string()
            } else {
                date.format("%Y-%m-%d").to_string()
            };
            return Some(iso);
        }
    }
    Some(text.into_owned())
}

fn value_reference(name: &str) -> String {
    format!("<fes:ValueReference>{}</fes:ValueReference>", escape(name))
}

fn comparison(tag: &str, name: &str, literal: &str) -> String {
    format!(
        "<fes:{tag}>{}<fes:Literal>{}</fes:Literal></fes:{tag}>",
        value_reference(name),
        escape(literal)
    )
}

fn like(name: &str, pattern: &str) -> String {
    format!(
        "<fes:PropertyIsLike wildCard=\"*\" singleChar=\".\" escapeChar=\"!\" matchCase=\"false\">{}<fes:Literal>{}</fes:Literal></fes:PropertyIsLike>",
        value_reference(name),
        escape(pattern)
    )
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '.' | '!') {
            out.push('!');
        }
        out.push(c);
    }
    out
}

fn between(name: &str, lower: &str, upper: &str) -> String {
    format!(
        "<fes:PropertyIsBetween>{}<fes:LowerBoundary><fes:Literal>{}</fes:Literal></fes:LowerBoundary><fes:UpperBoundary><fes:Literal>{}</fes:Literal></fes:UpperBoundary></fes:PropertyIsBetween>",
        value_reference(name),
        escape(lower),
        escape(upper)
    )
}

fn combine(tag: &str, mut parts: Vec<String>) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(format!("<fes:{tag}>{}</fes:{tag}>", parts.concat())),
    }
}

fn rule_values(rule: &Rule) -> Vec<String> {
    let format = rule.format.as_deref();
    match &rule.value {
        Value::Array(a) => a.iter().filter_map(|v| literal(v, format)).collect(),
        v => literal(v, format).into_iter().collect(),
    }
}

fn rule_for_name(rule: &Rule, name: &str, values: &[String]) -> Option<String> {
    let first = values.first()?;
    let each = |f: &dyn Fn(&str) -> String| values.iter().map(|v| f(v.as_str())).collect::<Vec<_>>();
    match rule.operator {
        Operator::Eq => match rule.delimiter.as_deref() {
            Some(_) => combine("Or", each(&|v: &str| like(name, &format!("*{}*", escape_like(v))))),
            None => combine("Or", each(&|v: &str| comparison("PropertyIsEqualTo", name, v))),
        },
        Operator::Ne => combine("And", each(&|v: &str| comparison("PropertyIsNotEqualTo", name, v))),
        Operator::Gt => Some(comparison("PropertyIsGreaterThan", name, first)),
        Operator::Ge => Some(comparison("PropertyIsGreaterThanOrEqualTo", name, first)),
        Operator::Lt => Some(comparison("PropertyIsLessThan", name, first)),
        Operator::Le => Some(comparison("PropertyIsLessThanOrEqualTo", name, first)),
        Operator::In => combine("Or", each(&|v: &str| like(name, &format!("*{}*", escape_like(v))))),
        Operator::StartsWith => combine("Or", each(&|v: &str| like(name, &format!("{}*", escape_like(v))))),
        Operator::EndsWith => combine("Or", each(&|v: &str| like(name, &format!("*{}", escape_like(v))))),
        Operator::Between | Operator::Intersects => match values {
            [lower, upper] => Some(between(name, lower, upper)),
            _ => Some(comparison("PropertyIsEqualTo", name, first)),
        },
    }
}

/// FES expression of one rule, `None` for rules without a value.
pub fn rule_to_fes(rule: &Rule) -> Option<String> {
    if !rule.is_set() {
        return None;
    }
    let values = rule_values(rule);
    if let (Some((from, until)), [lower, upper]) = (rule.attr_name.as_range(), values.as_slice()) {
        match rule.operator {
            Operator::Between => {
                return combine(
                    "And",
                    vec![
                        comparison("PropertyIsGreaterThanOrEqualTo", from, lower),
                        comparison("PropertyIsLessThanOrEqualTo", until, upper),
                    ],
                )
            }
            Operator::Intersects => {
                return combine(
                    "And",
                    vec![
                        comparison("PropertyIsLessThanOrEqualTo", from, upper),
                        comparison("PropertyIsGreaterThanOrEqualTo", until, lower),
                    ],
                )
            }
            _ => {}
        }
    }
    let parts = rule
        .attr_name
        .names()
        .iter()
        .filter_map(|name| rule_for_name(rule, name, &values))
        .collect::<Vec<_>>();
    combine("Or", parts)
}

fn pos_list(points: &[Position]) -> String {
    points
        .iter()
        .flat_map(|p| p.iter().take(2))
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn gml_polygon(rings: &[Vec<Position>]) -> String {
    let mut out = String::from("<gml:Polygon>");
    for (i, ring) in rings.iter().enumerate() {
        let tag = if i == 0 { "exterior" } else { "interior" };
        out.push_str(&format!(
            "<gml:{tag}><gml:LinearRing><gml:posList>{}</gml:posList></gml:LinearRing></gml:{tag}>",
            pos_list(ring)
        ));
    }
    out.push_str("</gml:Polygon>");
    out
}

fn gml_line(points: &[Position]) -> String {
    format!("<gml:LineString><gml:posList>{}</gml:posList></gml:LineString>", pos_list(points))
}

fn gml_point(p: &Position) -> String {
    format!("<gml:Point><gml:pos>{}</gml:pos></gml:Point>", pos_list(std::slice::from_ref(p)))
}

/// GML 3.2 encoding of a GeoJSON geometry.
pub fn geometry_to_gml(geometry: &Geometry, srs_name: Option<&str>) -> String {
    let gml = match geometry {
        Geometry::Point(p) => gml_point(p),
        Geometry::LineString(l) => gml_line(l),
        Geometry::Polygon(rings) => gml_polygon(rings),
        Geometry::MultiPoint(ps) => format!(
            "<gml:MultiPoint>{}</gml:MultiPoint>",
            ps.iter()
                .map(|p| format!("<gml:pointMember>{}</gml:pointMember>", gml_point(p)))
                .collect::<String>()
        ),
        Geometry::MultiLineString(ls) => format!(
            "<gml:MultiCurve>{}</gml:MultiCurve>",
            ls.iter()
                .map(|l| format!("<gml:curveMember>{}</gml:curveMember>", gml_line(l)))
                .collect::<String>()
        ),
        Geometry::MultiPolygon(ps) => format!(
            "<gml:MultiSurface>{}</gml:MultiSurface>",
            ps.iter()
                .map(|p| format!("<gml:surfaceMember>{}</gml:surfaceMember>", gml_polygon(p)))
                .collect::<String>()
        ),
    };
    match srs_name {
        // srsName goes on the outermost element only
        Some(srs) => {
            let tag_end = gml.find('>').unwrap_or(0);
            format!("{} srsName=\"{}\"{}", &gml[..tag_end], attr(srs), &gml[tag_end..])
        }
        None => gml,
    }
}

/// Complete `fes:Filter` document for a question, `None` if nothing filters.
pub fn build_filter(rules: &[Rule], geometry: Option<&Geometry>, service: &Service) -> Option<String> {
    let mut parts = rules.iter().filter_map(rule_to_fes).collect::<Vec<_>>();
    if let Some(g) = geometry {
        let name = service.geometry_name.as_deref().unwrap_or("geom");
        parts.push(format!(
            "<fes:Intersects>{}{}</fes:Intersects>",
            value_reference(name),
            geometry_to_gml(g, service.srs_name.as_deref())
        ));
    }
    let inner = combine("And", parts)?;
    Some(format!(
        "<fes:Filter xmlns:fes=\"{FES_NS}\" xmlns:gml=\"{GML_NS}\">{inner}</fes:Filter>"
    ))
}

fn not_null(attr_name: &str) -> String {
    format!(
        "<fes:Filter xmlns:fes=\"{FES_NS}\"><fes:Not><fes:PropertyIsNull>{}</fes:PropertyIsNull></fes:Not></fes:Filter>",
        value_reference(attr_name)
    )
}

pub struct WfsExtern {
    config: Rc<FilterConfig>,
    http: Rc<dyn HttpClient>,
    register: IntervalRegister,
}

impl WfsExtern {
    pub fn new(config: Rc<FilterConfig>, http: Rc<dyn HttpClient>, register: IntervalRegister) -> Self {
        Self { config, http, register }
    }

    /// Request url for `request` with the additional `params`.
    pub fn build_url(&self, service: &Service, request: &str, params: &[(&str, String)]) -> Result<String> {
        let url = service
            .url
            .as_deref()
            .ok_or_else(|| FilterError::MissingUrl(service.layer_id.clone()))?;
        let typename = service
            .typename
            .as_deref()
            .ok_or_else(|| FilterError::Config(format!("service for layer {} has no typename", service.layer_id)))?;
        let mut all = vec![
            ("SERVICE", "WFS".to_string()),
            ("VERSION", self.config.wfs_version.clone()),
            ("REQUEST", request.to_string()),
            ("TYPENAMES", typename.to_string()),
        ];
        all.extend(params.iter().map(|(k, v)| (*k, v.clone())));
        let url = reqwest::Url::parse_with_params(url, &all)
            .map_err(|e| FilterError::Config(format!("invalid url {url}: {e}")))?;
        Ok(url.to_string())
    }

    async fn get_features(&self, service: &Service, params: &[(&str, String)]) -> Result<FeatureCollection> {
        let url = self.build_url(service, "GetFeature", params)?;
        tracing::debug!(url = url.as_str(), "GetFeature");
        let body = self.http.get(&url).await?.into_body()?;
        parse_feature_collection(&body)
    }

    /// First value of `attr_name` in the given sort order.
    async fn first_sorted(&self, service: &Service, attr_name: &str, order: &str) -> Result<Option<Value>> {
        let params = [
            ("PROPERTYNAME", attr_name.to_string()),
            ("SORTBY", format!("{attr_name} {order}")),
            ("COUNT", "1".to_string()),
            ("FILTER", not_null(attr_name)),
        ];
        let fc = self.get_features(service, &params).await?;
        Ok(fc
            .features
            .first()
            .and_then(|f| value_of(f, attr_name))
            .cloned())
    }
}

#[async_trait(?Send)]
impl FilterService for WfsExtern {
    async fn get_attr_types(&self, service: &Service, _filter_id: FilterId) -> Result<AttrTypes> {
        let url = self.build_url(service, "DescribeFeatureType", &[])?;
        tracing::debug!(url = url.as_str(), "DescribeFeatureType");
        let body = self.http.get(&url).await?.into_body()?;
        parse_describe_feature_type(&body)
    }

    async fn get_min_max(
        &self,
        service: &Service,
        attr_name: &str,
        min: bool,
        max: bool,
        _filter_id: FilterId,
    ) -> Result<MinMax> {
        let mut result = MinMax::default();
        if min {
            if let Some(v) = self.first_sorted(service, attr_name, "ASC").await? {
                result.min = get_min_max_from_unique_values(&[v], true, false).min;
            }
        }
        if max {
            if let Some(v) = self.first_sorted(service, attr_name, "DESC").await? {
                result.max = get_min_max_from_unique_values(&[v], false, true).max;
            }
        }
        Ok(result)
    }

    async fn get_unique_values(
        &self,
        service: &Service,
        attr_name: &str,
        _filter_id: FilterId,
    ) -> Result<Vec<Value>> {
        let fc = self
            .get_features(service, &[("PROPERTYNAME", attr_name.to_string())])
            .await?;
        let mut values = UniqueValues::new();
        for feature in fc.features.iter() {
            if let Some(v) = value_of(feature, attr_name) {
                values.insert(v.clone());
            }
        }
        Ok(values.into_vec())
    }

    fn filter(&self, question: FilterQuestion) -> FilterStream {
        let (registration, ticket) = self.register.start(question.filter_id);
        let paging = question
            .commands
            .paging
            .unwrap_or(self.config.default_paging)
            .max(1);
        let filter = build_filter(&question.rules, question.commands.geometry.as_ref(), &question.service);
        let this = Rc::new(WfsExtern::new(self.config.clone(), self.http.clone(), self.register.clone()));
        let question = Rc::new(question);

        let pages = stream::unfold(Some(0usize), move |start| {
            let this = this.clone();
            let question = question.clone();
            let filter = filter.clone();
            async move {
                let start = start?;
                let page = start / paging + 1;
                let mut params = vec![
                    ("COUNT", paging.to_string()),
                    ("STARTINDEX", start.to_string()),
                ];
                if let Some(srs) = question.service.srs_name.as_deref() {
                    params.push(("SRSNAME", srs.to_string()));
                }
                if let Some(f) = filter {
                    params.push(("FILTER", f));
                }
                let fc = match this.get_features(&question.service, &params).await {
                    Ok(s) => s,
                    Err(e) => return Some((Err(e), None)),
                };
                let total = match fc.number_matched {
                    Some(n) => n.div_ceil(paging).max(1),
                    None if fc.features.len() < paging => page,
                    None => page + 1,
                };
                let items: Vec<Feature> = fc.features;
                tracing::debug!(filter_id = question.filter_id, page, total, items = items.len(), "WFS page");
                let next = if page >= total { None } else { Some(start + paging) };
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
