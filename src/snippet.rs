//! Snippet adjustments.
//!
//! After every filter answer the UI narrows its controls to what the
//! matched items still offer: dropdowns get the remaining values, sliders
//! and date pickers their new bounds.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serializer;
use serde_derive::{Deserialize, Serialize};

use crate::date::parse_date;
use crate::rule::{AttrName, SnippetId};
use crate::value::{as_number, value_of, AttributeSource, UniqueValues, Value};

/// Date pattern of date snippets without an explicit format.
pub const DEFAULT_DATE_FORMAT: &str = "YYYY-MM-DD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnippetType {
    Checkbox,
    Dropdown,
    Date,
    DateRange,
    Slider,
    SliderRange,
    Text,
    FeatureInfo,
    #[serde(other)]
    Other,
}

/// One control of a filter panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub snippet_id: SnippetId,
    #[serde(rename = "type")]
    pub kind: SnippetType,
    pub attr_name: AttrName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

impl Snippet {
    pub fn new(snippet_id: SnippetId, kind: SnippetType, attr_name: impl Into<AttrName>) -> Self {
        Self {
            snippet_id,
            kind,
            attr_name: attr_name.into(),
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
}

fn false_if_none<S: Serializer>(value: &Option<Value>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_some(v),
        None => serializer.serialize_bool(false),
    }
}

/// What a single snippet should change to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Adjustment {
    /// Remaining values of a dropdown.
    Values { value: Vec<Value> },
    /// New bounds of a slider or date control, `false` if unknown.
    Range {
        #[serde(serialize_with = "false_if_none")]
        min: Option<Value>,
        #[serde(serialize_with = "false_if_none")]
        max: Option<Value>,
    },
    /// Values per attribute of a feature info snippet.
    FeatureInfo(BTreeMap<String, Vec<Value>>),
}

/// Adjustments for one answer page, keyed by snippet id.
///
/// Serializes as `{"start": .., "finish": .., "<snippetId>": {..}, ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnippetAdjustments {
    pub start: bool,
    pub finish: bool,
    #[serde(flatten)]
    pub adjust: BTreeMap<SnippetId, Adjustment>,
}

/// Orders two date values, unparsable ones sort behind parsable ones.
pub fn snippet_date_compare(a: &Value, b: &Value, format: &str) -> Ordering {
    match (parse_date(a, format), parse_date(b, format)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Smallest and largest numeric entry, keeping the original value.
/// Non numeric entries are ignored.
pub(crate) fn numeric_bounds<'a, I>(values: I) -> Option<(Value, Value)>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut bounds: Option<((f64, &Value), (f64, &Value))> = None;
    for v in values {
        let n = match as_number(v) {
            Some(n) => n,
            None => continue,
        };
        bounds = match bounds {
            None => Some(((n, v), (n, v))),
            Some((min, max)) => Some((
                if n < min.0 { (n, v) } else { min },
                if n > max.0 { (n, v) } else { max },
            )),
        };
    }
    let to_number = |(n, v): (f64, &Value)| match v {
        Value::Number(_) => v.clone(),
        _ => serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null),
    };
    bounds.map(|(min, max)| (to_number(min), to_number(max)))
}

/// Value lists per attribute and delimiter, a snippet splitting on `|` and
/// one not splitting the same attribute each get their own list.
type AttrKey<'a> = (&'a str, Option<&'a str>);

fn collect_values<'a, S: AttributeSource>(
    items: &[S],
    attr_keys: &BTreeSet<AttrKey<'a>>,
) -> BTreeMap<AttrKey<'a>, UniqueValues> {
    let mut result: BTreeMap<AttrKey<'a>, UniqueValues> = BTreeMap::new();
    for item in items {
        for key in attr_keys.iter() {
            let (attr_name, delimiter) = *key;
            let value = match value_of(item, attr_name) {
                Some(v) => v,
                None => continue,
            };
            let entry = result.entry(*key).or_default();
            match (value, delimiter) {
                (Value::String(s), Some(d)) if !d.is_empty() => {
                    entry.extend(s.split(d).map(|p| Value::String(p.to_string())));
                }
                (Value::Array(a), _) => entry.extend(a.iter().cloned()),
                (v, _) => {
                    entry.insert(v.clone());
                }
            }
        }
    }
    result
}

/// Derives the snippet adjustments for one page of matched `items`.
///
/// Snippets whose attributes have no value in any item are left out.
/// `start` and `finish` are always set: `page == 1` and `page >= total`.
pub fn get_snippet_adjustments<S: AttributeSource>(
    snippets: &[Snippet],
    items: &[S],
    page: usize,
    total: usize,
) -> SnippetAdjustments {
    let mut adjustments = SnippetAdjustments {
        start: page == 1,
        finish: page >= total,
        adjust: BTreeMap::new(),
    };

    let attr_keys = snippets
        .iter()
        .flat_map(|snippet| {
            let delimiter = snippet.delimiter.as_deref();
            snippet.attr_name.names().iter().map(move |name| (name.as_str(), delimiter))
        })
        .collect::<BTreeSet<_>>();
    if attr_keys.is_empty() {
        return adjustments;
    }

    let values = collect_values(items, &attr_keys);

    for snippet in snippets {
        let delimiter = snippet.delimiter.as_deref();
        let present = snippet
            .attr_name
            .names()
            .iter()
            .filter_map(|name| values.get(&(name.as_str(), delimiter)).map(|v| (name, v)))
            .collect::<Vec<_>>();
        if present.is_empty() {
            continue;
        }
        let mut merged = UniqueValues::new();
        for (_, v) in present.iter() {
            merged.extend(v.as_slice().iter().cloned());
        }

        let adjustment = match snippet.kind {
            SnippetType::Dropdown => Adjustment::Values {
                value: merged.into_vec(),
            },
            SnippetType::Slider | SnippetType::SliderRange => {
                let (min, max) = match numeric_bounds(merged.as_slice()) {
                    Some((min, max)) => (Some(min), Some(max)),
                    None => (None, None),
                };
                Adjustment::Range { min, max }
            }
            SnippetType::Date | SnippetType::DateRange => {
                let format = snippet.format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
                let mut sorted = merged.into_vec();
                sorted.sort_by(|a, b| snippet_date_compare(a, b, format));
                Adjustment::Range {
                    min: sorted.first().cloned(),
                    max: sorted.last().cloned(),
                }
            }
            SnippetType::FeatureInfo => Adjustment::FeatureInfo(
                present
                    .iter()
                    .map(|(name, v)| (name.to_string(), v.as_slice().to_vec()))
                    .collect(),
            ),
            SnippetType::Checkbox | SnippetType::Text | SnippetType::Other => continue,
        };
        adjustments.adjust.insert(snippet.snippet_id, adjustment);
    }

    adjustments
}
