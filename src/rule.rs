//! Filter questions, answers and the rules inside them.

use serde_derive::{Deserialize, Serialize};

use crate::feature::{Feature, Geometry};
use crate::value::Value;

/// Correlation key between a filter panel and the interfaces.
pub type FilterId = u64;

pub type SnippetId = u64;

/// One attribute name, or several whose values are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrName {
    Single(String),
    Multi(Vec<String>),
}

impl AttrName {
    pub fn names(&self) -> &[String] {
        match self {
            AttrName::Single(s) => std::slice::from_ref(s),
            AttrName::Multi(v) => v.as_slice(),
        }
    }

    /// The two attribute names of a range (`[from, until]`), if this is one.
    pub fn as_range(&self) -> Option<(&str, &str)> {
        match self {
            AttrName::Multi(v) if v.len() == 2 => Some((v[0].as_str(), v[1].as_str())),
            _ => None,
        }
    }
}

impl From<&str> for AttrName {
    fn from(s: &str) -> Self {
        AttrName::Single(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    StartsWith,
    EndsWith,
    Between,
    Intersects,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "EQ",
            Operator::Ne => "NE",
            Operator::Gt => "GT",
            Operator::Ge => "GE",
            Operator::Lt => "LT",
            Operator::Le => "LE",
            Operator::In => "IN",
            Operator::StartsWith => "STARTSWITH",
            Operator::EndsWith => "ENDSWITH",
            Operator::Between => "BETWEEN",
            Operator::Intersects => "INTERSECTS",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single condition, produced by one snippet of the filter UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_id: Option<SnippetId>,
    pub attr_name: AttrName,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

impl Rule {
    pub fn new(attr_name: impl Into<AttrName>, operator: Operator, value: Value) -> Self {
        Self {
            snippet_id: None,
            attr_name: attr_name.into(),
            operator,
            value,
            format: None,
            delimiter: None,
        }
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    pub fn with_delimiter(mut self, delimiter: &str) -> Self {
        self.delimiter = Some(delimiter.to_string());
        self
    }

    /// Rules of snippets the user has not touched carry no value.
    pub fn is_set(&self) -> bool {
        match &self.value {
            Value::Null => false,
            Value::Array(a) => !a.is_empty(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    /// Features already loaded into the map, filtered in memory.
    #[serde(rename = "wfs")]
    Wfs,
    /// A WFS queried with server side filters.
    #[serde(rename = "wfsExtern")]
    WfsExtern,
    /// A SensorThings API endpoint.
    #[serde(rename = "sta")]
    Sta,
    /// Any other type. Questions for it fail with
    /// [`FilterError::UnknownService`](crate::error::FilterError::UnknownService).
    #[serde(rename = "unknown", other)]
    Unknown,
}

/// Where the data of a filter comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    pub layer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typename: Option<String>,
    #[serde(default, rename = "featureNS", skip_serializing_if = "Option::is_none")]
    pub feature_ns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srs_name: Option<String>,
    /// STA entity set to query, `Things` if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_entity: Option<String>,
    /// Static `$filter` expression always added to STA requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sta_filter: Option<String>,
}

impl Service {
    pub fn new(kind: ServiceKind, layer_id: &str) -> Self {
        Self {
            kind,
            layer_id: layer_id.to_string(),
            url: None,
            typename: None,
            feature_ns: None,
            geometry_name: None,
            srs_name: None,
            root_entity: None,
            sta_filter: None,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_typename(mut self, typename: &str) -> Self {
        self.typename = Some(typename.to_string());
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commands {
    /// Features per answer, the configured default if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<usize>,
    #[serde(default)]
    pub search_in_map_extent: bool,
    /// Only features intersecting this geometry match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQuestion {
    pub filter_id: FilterId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_id: Option<SnippetId>,
    pub service: Service,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub commands: Commands,
}

impl FilterQuestion {
    pub fn new(filter_id: FilterId, service: Service, rules: Vec<Rule>) -> Self {
        Self {
            filter_id,
            snippet_id: None,
            service,
            rules,
            commands: Commands::default(),
        }
    }

    pub fn with_paging(mut self, paging: usize) -> Self {
        self.commands.paging = Some(paging);
        self
    }
}

/// One page of a filter result. `page >= total` marks the last one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterAnswer {
    pub filter_id: FilterId,
    pub service: Service,
    pub items: Vec<Feature>,
    pub page: usize,
    pub total: usize,
}

impl FilterAnswer {
    pub fn is_last(&self) -> bool {
        self.page >= self.total
    }
}
