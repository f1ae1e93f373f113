//! Attribute values and how items expose them.
//!
//! Everything the filter touches is plain JSON ([`Value`]). Items only need
//! to hand out values by name, see [`AttributeSource`].

use std::borrow::Cow;
use std::collections::BTreeSet;

pub use serde_json::Value;
use serde_json::Map;

/// Read access to the attributes of one item (feature, STA thing, ...).
pub trait AttributeSource {
    fn get(&self, name: &str) -> Option<&Value>;
}

impl AttributeSource for Map<String, Value> {
    fn get(&self, name: &str) -> Option<&Value> {
        Map::get(self, name)
    }
}

impl AttributeSource for Value {
    fn get(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(name))
    }
}

impl<T: AttributeSource + ?Sized> AttributeSource for &T {
    fn get(&self, name: &str) -> Option<&Value> {
        (**self).get(name)
    }
}

/// Resolves `attr_name` on `item`.
///
/// Names starting with `@` are paths into nested data, e.g.
/// `@Datastreams.0.Observations.0.result`: the first segment is looked up on
/// the item, the following ones walk objects by key and arrays by index.
/// Returns `None` if any segment does not resolve. `null` counts as absent.
pub fn value_of<'a, S: AttributeSource + ?Sized>(item: &'a S, attr_name: &str) -> Option<&'a Value> {
    let value = match attr_name.strip_prefix('@') {
        Some(path) => {
            let segments = path.split('.').collect::<Vec<_>>();
            let (first, rest) = segments.split_first()?;
            match item.get(first) {
                Some(root) => resolve_segments(root, rest)?,
                // "@iot.id" and friends are plain attribute names
                None => item.get(attr_name)?,
            }
        }
        None => item.get(attr_name)?,
    };
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

fn resolve_segments<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    if segments.is_empty() {
        return Some(value);
    }
    match value {
        Value::Array(a) => {
            let index = segments[0].parse::<usize>().ok()?;
            resolve_segments(a.get(index)?, &segments[1..])
        }
        Value::Object(o) => {
            // keys may contain dots themselves ("@iot.id"), so try the
            // shortest key first and grow it segment by segment
            for take in 1..=segments.len() {
                let key = segments[..take].join(".");
                if let Some(v) = o.get(&key) {
                    if let Some(found) = resolve_segments(v, &segments[take..]) {
                        return Some(found);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// Numeric reading of a value: numbers, and strings that parse as numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse::<f64>().ok().filter(|f| f.is_finite())
            }
        }
        _ => None,
    }
}

/// Textual reading of a scalar value.
pub fn as_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
        _ => None,
    }
}

/// Insertion-ordered set of values.
///
/// `serde_json::Value` is neither `Hash` nor `Ord`, values are keyed by
/// their serialized form instead.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UniqueValues {
    seen: BTreeSet<String>,
    values: Vec<Value>,
}

impl UniqueValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the value was not in the set yet.
    pub fn insert(&mut self, value: Value) -> bool {
        let key = value.to_string();
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key);
        self.values.push(value);
        true
    }

    pub fn extend<I: IntoIterator<Item = Value>>(&mut self, values: I) {
        for v in values {
            self.insert(v);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

/// Splits every entry of `list` on `delimiter` and returns the distinct
/// parts in order of first occurrence.
///
/// `["foo|bar", "baz|bar"]` with `"|"` gives `["foo", "bar", "baz"]`.
/// Non-string entries are kept as they are.
pub fn split_list_with_delimiter(list: &[Value], delimiter: &str) -> Vec<Value> {
    let mut result = UniqueValues::new();
    for entry in list {
        match entry {
            Value::String(s) if !delimiter.is_empty() => {
                result.extend(s.split(delimiter).map(|part| Value::String(part.to_string())));
            }
            other => {
                result.insert(other.clone());
            }
        }
    }
    result.into_vec()
}
