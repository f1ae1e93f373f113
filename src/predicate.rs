//! Comparison predicates and rule evaluation.
//!
//! Every predicate takes the feature side first and the rule side second.
//! With a date `format`, a feature value that parses as a date is compared
//! by calendar; anything else falls back to numeric or string comparison.
//! Absent (`null`) values never match. Nothing in here fails or panics.

use std::borrow::Cow;
use std::cmp::Ordering;

use float_cmp::approx_eq;

use crate::date::parse_date;
use crate::rule::{Operator, Rule};
use crate::value::{as_number, as_text, value_of, AttributeSource, Value};

/// Orders a feature value against a rule value.
///
/// `None` means the two are not comparable, which makes every ordering
/// predicate `false`.
pub fn compare(value: &Value, rule_value: &Value, format: Option<&str>) -> Option<Ordering> {
    if let Some(fmt) = format {
        if let Some(date) = parse_date(value, fmt) {
            return parse_date(rule_value, fmt).map(|rule_date| date.cmp(&rule_date));
        }
    }
    if let (Some(a), Some(b)) = (as_number(value), as_number(rule_value)) {
        return a.partial_cmp(&b);
    }
    match (as_text(value), as_text(rule_value)) {
        (Some(a), Some(b)) => Some(a.as_ref().cmp(b.as_ref())),
        _ => None,
    }
}

fn scalar_equals(value: &Value, rule_value: &Value) -> bool {
    match (value, rule_value) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Array(a), _) => a.iter().any(|v| scalar_equals(v, rule_value)),
        _ => match (as_number(value), as_number(rule_value)) {
            (Some(a), Some(b)) => approx_eq!(f64, a, b, ulps = 4),
            _ => match (as_text(value), as_text(rule_value)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        },
    }
}

/// Exact match, date match with `format`, or membership in the
/// `delimiter`-separated list of a string feature value.
pub fn equals(value: &Value, rule_value: &Value, format: Option<&str>, delimiter: Option<&str>) -> bool {
    if value.is_null() || rule_value.is_null() {
        return false;
    }
    if let Some(fmt) = format {
        if let Some(date) = parse_date(value, fmt) {
            return parse_date(rule_value, fmt) == Some(date);
        }
    }
    if let (Some(delimiter), Value::String(s)) = (delimiter, value) {
        if !delimiter.is_empty() {
            return match as_text(rule_value) {
                Some(r) => s.split(delimiter).any(|part| part == r.as_ref()),
                None => false,
            };
        }
    }
    scalar_equals(value, rule_value)
}

/// `true` if the value equals any of the rule values.
pub fn equals_for_array(value: &Value, rule_values: &[Value], format: Option<&str>, delimiter: Option<&str>) -> bool {
    rule_values.iter().any(|r| equals(value, r, format, delimiter))
}

pub fn greater(value: &Value, rule_value: &Value, format: Option<&str>) -> bool {
    compare(value, rule_value, format) == Some(Ordering::Greater)
}

pub fn greater_or_equal(value: &Value, rule_value: &Value, format: Option<&str>) -> bool {
    matches!(compare(value, rule_value, format), Some(Ordering::Greater | Ordering::Equal))
}

pub fn less(value: &Value, rule_value: &Value, format: Option<&str>) -> bool {
    compare(value, rule_value, format) == Some(Ordering::Less)
}

pub fn less_or_equal(value: &Value, rule_value: &Value, format: Option<&str>) -> bool {
    matches!(compare(value, rule_value, format), Some(Ordering::Less | Ordering::Equal))
}

/// `lower <= point <= upper`, inclusive on both ends.
///
/// Used for a feature range `[lower, upper]` containing a rule point as well
/// as for a rule range containing a feature value.
pub fn between(lower: &Value, upper: &Value, point: &Value, format: Option<&str>) -> bool {
    less_or_equal(lower, point, format) && less_or_equal(point, upper, format)
}

/// The feature range `[value_a, value_b]` lies completely inside the rule
/// range `[rule_a, rule_b]`.
pub fn between_for_array(value_a: &Value, value_b: &Value, rule_a: &Value, rule_b: &Value, format: Option<&str>) -> bool {
    greater_or_equal(value_a, rule_a, format) && less_or_equal(value_b, rule_b, format)
}

/// The feature range `[value_a, value_b]` and the rule range
/// `[rule_a, rule_b]` overlap.
pub fn intersects(value_a: &Value, value_b: &Value, rule_a: &Value, rule_b: &Value, format: Option<&str>) -> bool {
    less_or_equal(value_a, rule_b, format) && greater_or_equal(value_b, rule_a, format)
}

/// Any of the feature values lies inside the rule range.
pub fn intersects_for_array(values: &[Value], rule_a: &Value, rule_b: &Value, format: Option<&str>) -> bool {
    values.iter().any(|v| between(rule_a, rule_b, v, format))
}

fn lower_text(value: &Value) -> Option<String> {
    as_text(value).map(|s| s.to_lowercase())
}

fn string_match(value: &Value, rule_value: &Value, test: fn(&str, &str) -> bool) -> bool {
    if let Value::Array(values) = value {
        return values.iter().any(|v| string_match(v, rule_value, test));
    }
    match (lower_text(value), lower_text(rule_value)) {
        (Some(v), Some(r)) => test(&v, &r),
        _ => false,
    }
}

/// Case insensitive substring test.
pub fn in_for_string(value: &Value, rule_value: &Value) -> bool {
    string_match(value, rule_value, |v, r| v.contains(r))
}

pub fn in_for_array(value: &Value, rule_values: &[Value]) -> bool {
    rule_values.iter().any(|r| in_for_string(value, r))
}

pub fn starts_with(value: &Value, rule_value: &Value) -> bool {
    string_match(value, rule_value, |v, r| v.starts_with(r))
}

pub fn starts_with_for_array(value: &Value, rule_values: &[Value]) -> bool {
    rule_values.iter().any(|r| starts_with(value, r))
}

pub fn ends_with(value: &Value, rule_value: &Value) -> bool {
    string_match(value, rule_value, |v, r| v.ends_with(r))
}

pub fn ends_with_for_array(value: &Value, rule_values: &[Value]) -> bool {
    rule_values.iter().any(|r| ends_with(value, r))
}

/// A rule value as range `[from, until]`. A scalar is the range `[v, v]`.
fn rule_range(rule_value: &Value) -> Option<(&Value, &Value)> {
    match rule_value {
        Value::Array(a) if a.len() == 2 => Some((&a[0], &a[1])),
        Value::Array(_) | Value::Null => None,
        v => Some((v, v)),
    }
}

/// Splits a string feature value on the rule delimiter, other values are
/// taken as they are.
fn feature_list<'a>(value: &'a Value, delimiter: Option<&str>) -> Cow<'a, [Value]> {
    match (value, delimiter) {
        (Value::Array(a), _) => Cow::Borrowed(a.as_slice()),
        (Value::String(s), Some(d)) if !d.is_empty() => {
            Cow::Owned(s.split(d).map(|p| Value::String(p.to_string())).collect())
        }
        (v, _) => Cow::Owned(vec![v.clone()]),
    }
}

static NULL: Value = Value::Null;

fn matches_value(rule: &Rule, value: &Value) -> bool {
    let format = rule.format.as_deref();
    let delimiter = rule.delimiter.as_deref();
    let rule_value = &rule.value;
    let first = match rule_value {
        Value::Array(a) => a.first().unwrap_or(&NULL),
        v => v,
    };
    match rule.operator {
        Operator::Eq | Operator::Ne => match rule_value {
            Value::Array(a) => equals_for_array(value, a, format, delimiter),
            r => equals(value, r, format, delimiter),
        },
        Operator::Gt => greater(value, first, format),
        Operator::Ge => greater_or_equal(value, first, format),
        Operator::Lt => less(value, first, format),
        Operator::Le => less_or_equal(value, first, format),
        Operator::In => match rule_value {
            Value::Array(a) => in_for_array(value, a),
            r => in_for_string(value, r),
        },
        Operator::StartsWith => match rule_value {
            Value::Array(a) => starts_with_for_array(value, a),
            r => starts_with(value, r),
        },
        Operator::EndsWith => match rule_value {
            Value::Array(a) => ends_with_for_array(value, a),
            r => ends_with(value, r),
        },
        Operator::Between => match rule_range(rule_value) {
            Some((a, b)) => between(a, b, value, format),
            None => false,
        },
        Operator::Intersects => match rule_range(rule_value) {
            Some((a, b)) => intersects_for_array(&feature_list(value, delimiter), a, b, format),
            None => false,
        },
    }
}

/// Evaluates one rule against one item.
///
/// Unset rules (no value) always match. `BETWEEN`/`INTERSECTS` on two
/// attribute names treat the item as the range `[first, second]`; any other
/// multi attribute rule matches if one of the attributes does. `NE` matches
/// items that have the attribute with a different value.
pub fn check_rule<S: AttributeSource + ?Sized>(rule: &Rule, item: &S) -> bool {
    if !rule.is_set() {
        return true;
    }
    let format = rule.format.as_deref();

    if let (Operator::Between | Operator::Intersects, Some((from, until))) = (rule.operator, rule.attr_name.as_range()) {
        let (value_a, value_b) = match (value_of(item, from), value_of(item, until)) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        return match (rule.operator, &rule.value) {
            (Operator::Between, Value::Array(r)) if r.len() == 2 => between_for_array(value_a, value_b, &r[0], &r[1], format),
            (Operator::Intersects, Value::Array(r)) if r.len() == 2 => intersects(value_a, value_b, &r[0], &r[1], format),
            (_, Value::Array(_)) => false,
            (_, point) => between(value_a, value_b, point, format),
        };
    }

    let values = rule
        .attr_name
        .names()
        .iter()
        .filter_map(|name| value_of(item, name))
        .collect::<Vec<_>>();
    if values.is_empty() {
        return false;
    }
    match rule.operator {
        Operator::Ne => !values.iter().any(|v| matches_value(rule, v)),
        _ => values.iter().any(|v| matches_value(rule, v)),
    }
}

/// All rules have to match.
pub fn check_rules<S: AttributeSource + ?Sized>(rules: &[Rule], item: &S) -> bool {
    rules.iter().all(|rule| check_rule(rule, item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DATE: Option<&str> = Some("DD.MM.YYYY");

    #[test]
    fn equals_plain_values() {
        assert!(equals(&json!("a"), &json!("a"), None, None));
        assert!(!equals(&json!("a"), &json!("A"), None, None));
        assert!(equals(&json!(3), &json!(3.0), None, None));
        assert!(equals(&json!(3), &json!("3"), None, None));
        assert!(!equals(&json!("03"), &json!("3"), None, None));
        assert!(equals(&json!(true), &json!(true), None, None));
        assert!(equals(&json!(true), &json!("true"), None, None));
        assert!(!equals(&json!(null), &json!(null), None, None));
        assert!(equals(&json!(["x", "y"]), &json!("y"), None, None));
    }

    #[test]
    fn equals_with_delimiter_and_date() {
        assert!(equals(&json!("Kita|Schule"), &json!("Schule"), None, Some("|")));
        assert!(!equals(&json!("Kita|Schule"), &json!("Kita|"), None, Some("|")));
        assert!(equals(&json!("01.02.2020"), &json!("01.02.2020"), DATE, None));
        assert!(!equals(&json!("01.02.2020"), &json!("02.02.2020"), DATE, None));
        // unparsable rule side with a date feature value
        assert!(!equals(&json!("01.02.2020"), &json!("soon"), DATE, None));
        // not a date at all: plain comparison
        assert!(equals(&json!("n/a"), &json!("n/a"), DATE, None));
    }

    #[test]
    fn ordering_predicates() {
        assert!(greater(&json!(5), &json!(3), None));
        assert!(!greater(&json!(3), &json!(3), None));
        assert!(greater_or_equal(&json!(3), &json!("3"), None));
        assert!(!less(&json!("10"), &json!(9.5), None));
        assert!(less(&json!("apple"), &json!("banana"), None));
        assert!(less_or_equal(&json!("01.01.2020"), &json!("31.12.2019"), None));
        assert!(!less_or_equal(&json!("01.01.2020"), &json!("31.12.2019"), DATE));
        assert!(!greater(&json!("01.01.2020"), &json!("invalid"), DATE));
        assert!(!less(&json!(null), &json!(1), None));
        assert!(!greater(&json!([1]), &json!(0), None));
    }

    #[test]
    fn ranges() {
        assert!(between(&json!(1), &json!(10), &json!(10), None));
        assert!(!between(&json!(1), &json!(10), &json!(11), None));
        assert!(between(&json!("01.01.2020"), &json!("31.12.2020"), &json!("15.06.2020"), DATE));
        assert!(!between(&json!("01.01.2020"), &json!("31.12.2020"), &json!("15.06.2021"), DATE));

        assert!(between_for_array(&json!(2), &json!(4), &json!(1), &json!(5), None));
        assert!(!between_for_array(&json!(0), &json!(4), &json!(1), &json!(5), None));

        assert!(intersects(&json!(0), &json!(2), &json!(1), &json!(5), None));
        assert!(intersects(&json!(5), &json!(9), &json!(1), &json!(5), None));
        assert!(!intersects(&json!(6), &json!(9), &json!(1), &json!(5), None));

        assert!(intersects_for_array(&[json!(0), json!(3)], &json!(1), &json!(5), None));
        assert!(!intersects_for_array(&[json!(0), json!(6)], &json!(1), &json!(5), None));
        assert!(!intersects_for_array(&[], &json!(1), &json!(5), None));
    }

    #[test]
    fn string_predicates_ignore_case() {
        assert!(in_for_string(&json!("Grundschule Nord"), &json!("schule")));
        assert!(in_for_string(&json!("grundschule"), &json!("SCHULE")));
        assert!(!in_for_string(&json!("Kita"), &json!("schule")));
        assert!(in_for_array(&json!("Gymnasium"), &[json!("kita"), json!("GYM")]));
        assert!(starts_with(&json!("Hamburg-Nord"), &json!("hamburg")));
        assert!(starts_with_for_array(&json!("Altona"), &[json!("x"), json!("alt")]));
        assert!(ends_with(&json!("Hamburg-Nord"), &json!("NORD")));
        assert!(ends_with_for_array(&json!("Altona"), &[json!("ONA")]));
        assert!(!ends_with(&json!(null), &json!("a")));
        assert!(in_for_string(&json!(12345), &json!("234")));
    }

    #[test]
    fn check_rule_single_and_merged_attributes() {
        let item = json!({ "a": "Kita", "b": "Schule", "n": 7 });

        assert!(check_rule(&Rule::new("a", Operator::Eq, json!("Kita")), &item));
        assert!(check_rule(&Rule::new("a", Operator::Eq, json!(["x", "Kita"])), &item));
        assert!(check_rule(&Rule::new("a", Operator::Ne, json!("Schule")), &item));
        assert!(!check_rule(&Rule::new("missing", Operator::Ne, json!("Schule")), &item));

        let merged = Rule::new(AttrNameFixture::multi(&["a", "b"]), Operator::Eq, json!("Schule"));
        assert!(check_rule(&merged, &item));
        let merged_ne = Rule::new(AttrNameFixture::multi(&["a", "b"]), Operator::Ne, json!("Schule"));
        assert!(!check_rule(&merged_ne, &item));

        assert!(check_rule(&Rule::new("n", Operator::Between, json!([5, 10])), &item));
        assert!(!check_rule(&Rule::new("n", Operator::Gt, json!(7)), &item));
        assert!(check_rule(&Rule::new("n", Operator::Ge, json!([7])), &item));
        assert!(check_rule(&Rule::new("missing", Operator::Eq, Value::Null), &item));
    }

    #[test]
    fn check_rule_on_attribute_ranges() {
        let item = json!({ "from": "01.03.2020", "until": "30.06.2020" });
        let range = AttrNameFixture::multi(&["from", "until"]);

        let overlapping = Rule::new(range.clone(), Operator::Intersects, json!(["01.06.2020", "31.12.2020"])).with_format("DD.MM.YYYY");
        assert!(check_rule(&overlapping, &item));

        let containing = Rule::new(range.clone(), Operator::Between, json!(["01.01.2020", "31.12.2020"])).with_format("DD.MM.YYYY");
        assert!(check_rule(&containing, &item));

        let partial = Rule::new(range.clone(), Operator::Between, json!(["01.04.2020", "31.12.2020"])).with_format("DD.MM.YYYY");
        assert!(!check_rule(&partial, &item));

        let point = Rule::new(range.clone(), Operator::Between, json!("15.04.2020")).with_format("DD.MM.YYYY");
        assert!(check_rule(&point, &item));

        let no_until = json!({ "from": "01.03.2020" });
        assert!(!check_rule(&overlapping, &no_until));
    }

    #[test]
    fn check_rule_intersects_delimited_list() {
        let item = json!({ "years": "2001|2005|2010" });
        let rule = Rule::new("years", Operator::Intersects, json!([2004, 2006])).with_delimiter("|");
        assert!(check_rule(&rule, &item));
        let rule = Rule::new("years", Operator::Intersects, json!([2011, 2020])).with_delimiter("|");
        assert!(!check_rule(&rule, &item));
    }

    #[test]
    fn check_rules_on_sta_paths() {
        let item = json!({ "Datastreams": [{ "Observations": [{ "result": 42 }] }] });
        let rules = vec![
            Rule::new("@Datastreams.0.Observations.0.result", Operator::Ge, json!(40)),
            Rule::new("@Datastreams.0.Observations.0.result", Operator::Lt, json!(50)),
        ];
        assert!(check_rules(&rules, &item));
        assert!(check_rules(&[], &item));
    }

    struct AttrNameFixture;

    impl AttrNameFixture {
        fn multi(names: &[&str]) -> crate::rule::AttrName {
            crate::rule::AttrName::Multi(names.iter().map(|s| s.to_string()).collect())
        }
    }
}
