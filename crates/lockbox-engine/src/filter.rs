//! Record tags and the tag filter language.
//!
//! Tags are a JSON object whose values are strings or arrays of strings.
//! A filter is a JSON object:
//!
//! - `{"name": "value"}` matches a tag equal to `value`;
//! - `{"name": {"$neq" | "$gt" | "$gte" | "$lt" | "$lte" | "$like": "v"}}`
//!   compares the tag value;
//! - `{"name": {"$in": ["a", "b"]}}` matches any listed value;
//! - `{"$exist": ["a", "b"]}` requires the named tags to be present;
//! - `{"$and": [..]}`, `{"$or": [..]}` and `{"$not": {..}}` combine filters.
//!
//! Several keys in one object are combined with AND. For a multi-valued
//! tag, a comparison matches when any value matches, except `$neq` which
//! requires every value to differ.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

/// Values of a single tag.
pub type TagValues = Vec<String>;

/// A parsed tag set, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeMap<String, TagValues>);

impl Tags {
    /// Parse a JSON tag document. `None` or an empty string is an empty set.
    pub fn parse(json: Option<&str>) -> Result<Self> {
        let json = match json.map(str::trim) {
            None | Some("") => return Ok(Self::default()),
            Some(json) => json,
        };

        let value: Value = serde_json::from_str(json)
            .map_err(|e| EngineError::Input(format!("Invalid tags: {}", e)))?;

        let object = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            _ => return Err(EngineError::Input("Invalid tags: expected an object".into())),
        };

        let mut tags = BTreeMap::new();
        for (name, value) in object {
            let values = match value {
                Value::String(s) => vec![s],
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s),
                        _ => Err(EngineError::Input(format!(
                            "Invalid tags: values of '{}' must be strings",
                            name
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?,
                _ => {
                    return Err(EngineError::Input(format!(
                        "Invalid tags: value of '{}' must be a string or array of strings",
                        name
                    )))
                }
            };
            tags.insert(name, values);
        }
        Ok(Self(tags))
    }

    /// Values of the named tag.
    pub fn get(&self, name: &str) -> Option<&TagValues> {
        self.0.get(name)
    }

    /// Set a single-valued tag.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), vec![value.into()]);
    }

    /// Remove a tag.
    pub fn remove(&mut self, name: &str) -> Option<TagValues> {
        self.0.remove(name)
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode as JSON. Single values are written as plain strings.
    pub fn to_json(&self) -> String {
        let object: Map<String, Value> = self
            .0
            .iter()
            .map(|(name, values)| {
                let value = match values.as_slice() {
                    [single] => Value::String(single.clone()),
                    many => Value::Array(many.iter().cloned().map(Value::String).collect()),
                };
                (name.clone(), value)
            })
            .collect();
        Value::Object(object).to_string()
    }
}

/// Comparison operators applied to one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" => Self::Eq,
            "$neq" => Self::Neq,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$like" => Self::Like,
            _ => return None,
        })
    }

    fn test(self, tag: &str, operand: &str) -> bool {
        match self {
            Self::Eq => tag == operand,
            Self::Neq => tag != operand,
            Self::Gt => tag > operand,
            Self::Gte => tag >= operand,
            Self::Lt => tag < operand,
            Self::Lte => tag <= operand,
            Self::Like => like(tag, operand),
        }
    }
}

/// A parsed tag filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    All(Vec<TagFilter>),
    Any(Vec<TagFilter>),
    Not(Box<TagFilter>),
    Exist(Vec<String>),
    Compare {
        name: String,
        op: CompareOp,
        value: String,
    },
    In {
        name: String,
        values: Vec<String>,
    },
}

impl TagFilter {
    /// Parse a JSON filter. `None`, an empty string, `null` and `{}` all
    /// yield `None` (match everything).
    pub fn parse(json: Option<&str>) -> Result<Option<Self>> {
        let json = match json.map(str::trim) {
            None | Some("") => return Ok(None),
            Some(json) => json,
        };

        let value: Value = serde_json::from_str(json)
            .map_err(|e| EngineError::Input(format!("Invalid tag filter: {}", e)))?;

        match value {
            Value::Null => Ok(None),
            Value::Object(ref object) if object.is_empty() => Ok(None),
            value => Self::from_value(&value).map(Some),
        }
    }

    /// Filter requiring every one of `filters`.
    pub fn all(filters: impl IntoIterator<Item = TagFilter>) -> Self {
        Self::All(filters.into_iter().collect())
    }

    /// Filter requiring `name` to equal `value`.
    pub fn eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Compare {
            name: name.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid("expected an object"))?;

        let mut clauses = Vec::with_capacity(object.len());
        for (key, value) in object {
            clauses.push(match key.as_str() {
                "$and" => Self::All(Self::from_list(value)?),
                "$or" => Self::Any(Self::from_list(value)?),
                "$not" => Self::Not(Box::new(Self::from_value(value)?)),
                "$exist" => Self::Exist(string_list(value)?),
                op if op.starts_with('$') => {
                    return Err(invalid(&format!("unknown operator {}", op)))
                }
                name => Self::from_tag_clause(name, value)?,
            });
        }

        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => Self::All(clauses),
        })
    }

    fn from_list(value: &Value) -> Result<Vec<Self>> {
        value
            .as_array()
            .ok_or_else(|| invalid("expected an array of filters"))?
            .iter()
            .map(Self::from_value)
            .collect()
    }

    fn from_tag_clause(name: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::eq(name, s.clone())),
            Value::Object(ops) => {
                let mut clauses = Vec::with_capacity(ops.len());
                for (op, operand) in ops {
                    if op == "$in" {
                        clauses.push(Self::In {
                            name: name.to_owned(),
                            values: string_list(operand)?,
                        });
                        continue;
                    }
                    let op = CompareOp::parse(op)
                        .ok_or_else(|| invalid(&format!("unknown operator {}", op)))?;
                    let operand = operand
                        .as_str()
                        .ok_or_else(|| invalid("comparison operand must be a string"))?;
                    clauses.push(Self::Compare {
                        name: name.to_owned(),
                        op,
                        value: operand.to_owned(),
                    });
                }
                match clauses.len() {
                    0 => Err(invalid("empty tag clause")),
                    1 => Ok(clauses.remove(0)),
                    _ => Ok(Self::All(clauses)),
                }
            }
            _ => Err(invalid("tag value must be a string or operator object")),
        }
    }

    /// Evaluate against a tag set.
    pub fn matches(&self, tags: &Tags) -> bool {
        match self {
            Self::All(filters) => filters.iter().all(|f| f.matches(tags)),
            Self::Any(filters) => filters.iter().any(|f| f.matches(tags)),
            Self::Not(filter) => !filter.matches(tags),
            Self::Exist(names) => names.iter().all(|n| tags.get(n).is_some()),
            Self::Compare { name, op, value } => match tags.get(name) {
                None => false,
                Some(values) if *op == CompareOp::Neq => values.iter().all(|v| v != value),
                Some(values) => values.iter().any(|v| op.test(v, value)),
            },
            Self::In { name, values } => tags
                .get(name)
                .is_some_and(|tag| tag.iter().any(|v| values.contains(v))),
        }
    }
}

fn invalid(reason: &str) -> EngineError {
    EngineError::Input(format!("Invalid tag filter: {}", reason))
}

fn string_list(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| invalid("expected strings"))
            })
            .collect(),
        _ => Err(invalid("expected a string or array of strings")),
    }
}

/// SQL `LIKE` matching: `%` is any run, `_` is any single character.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tags(json: &str) -> Tags {
        Tags::parse(Some(json)).unwrap()
    }

    fn filter(json: &str) -> TagFilter {
        TagFilter::parse(Some(json)).unwrap().unwrap()
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert_eq!(TagFilter::parse(None).unwrap(), None);
        assert_eq!(TagFilter::parse(Some("")).unwrap(), None);
        assert_eq!(TagFilter::parse(Some("{}")).unwrap(), None);
        assert_eq!(TagFilter::parse(Some("null")).unwrap(), None);
    }

    #[test]
    fn test_equality() {
        let t = tags(r#"{"color": "red", "~size": "10"}"#);
        assert!(filter(r#"{"color": "red"}"#).matches(&t));
        assert!(!filter(r#"{"color": "blue"}"#).matches(&t));
        assert!(filter(r#"{"color": "red", "~size": "10"}"#).matches(&t));
        assert!(!filter(r#"{"color": "red", "~size": "11"}"#).matches(&t));
    }

    #[test]
    fn test_comparisons() {
        let t = tags(r#"{"~size": "15"}"#);
        assert!(filter(r#"{"~size": {"$gt": "10"}}"#).matches(&t));
        assert!(filter(r#"{"~size": {"$gte": "15"}}"#).matches(&t));
        assert!(!filter(r#"{"~size": {"$lt": "15"}}"#).matches(&t));
        assert!(filter(r#"{"~size": {"$lte": "15", "$gt": "14"}}"#).matches(&t));
        assert!(filter(r#"{"~size": {"$neq": "16"}}"#).matches(&t));
    }

    #[test]
    fn test_boolean_combinators() {
        let t = tags(r#"{"a": "1", "b": "2"}"#);
        assert!(filter(r#"{"$or": [{"a": "0"}, {"b": "2"}]}"#).matches(&t));
        assert!(!filter(r#"{"$and": [{"a": "0"}, {"b": "2"}]}"#).matches(&t));
        assert!(filter(r#"{"$not": {"a": "0"}}"#).matches(&t));
        assert!(filter(r#"{"$exist": ["a", "b"]}"#).matches(&t));
        assert!(!filter(r#"{"$exist": ["c"]}"#).matches(&t));
    }

    #[test]
    fn test_in_and_like() {
        let t = tags(r#"{"name": "alice"}"#);
        assert!(filter(r#"{"name": {"$in": ["bob", "alice"]}}"#).matches(&t));
        assert!(!filter(r#"{"name": {"$in": ["bob"]}}"#).matches(&t));
        assert!(filter(r#"{"name": {"$like": "al%"}}"#).matches(&t));
        assert!(filter(r#"{"name": {"$like": "_lic_"}}"#).matches(&t));
        assert!(!filter(r#"{"name": {"$like": "%z%"}}"#).matches(&t));
    }

    #[test]
    fn test_multi_valued_tags() {
        let t = tags(r#"{"role": ["admin", "user"]}"#);
        assert!(filter(r#"{"role": "user"}"#).matches(&t));
        assert!(!filter(r#"{"role": {"$neq": "user"}}"#).matches(&t));
        assert!(filter(r#"{"role": {"$neq": "guest"}}"#).matches(&t));
    }

    #[test]
    fn test_missing_tag_never_matches_comparison() {
        let t = tags(r#"{"a": "1"}"#);
        assert!(!filter(r#"{"b": {"$neq": "1"}}"#).matches(&t));
    }

    #[test]
    fn test_invalid_filters() {
        for bad in [
            "[1]",
            r#"{"$xor": []}"#,
            r#"{"a": 1}"#,
            r#"{"a": {"$gt": 1}}"#,
            r#"{"$and": {"a": "1"}}"#,
            "not json",
        ] {
            assert!(
                matches!(TagFilter::parse(Some(bad)), Err(EngineError::Input(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_tags_roundtrip_and_errors() {
        let t = tags(r#"{"b": ["x", "y"], "a": "1"}"#);
        assert_eq!(t.to_json(), r#"{"a":"1","b":["x","y"]}"#);
        assert!(Tags::parse(None).unwrap().is_empty());
        assert!(matches!(
            Tags::parse(Some(r#"{"a": 1}"#)),
            Err(EngineError::Input(_))
        ));
    }

    #[test]
    fn test_like_edge_cases() {
        assert!(like("", "%"));
        assert!(like("abc", "a%c"));
        assert!(like("abbbc", "a%b%c"));
        assert!(!like("abc", "a_"));
        assert!(like("abc", "%%"));
    }

    proptest! {
        #[test]
        fn test_equality_filter_matches_own_tag(
            name in "[a-z]{1,8}",
            value in "[ -~]{0,12}",
            other in "[ -~]{0,12}",
        ) {
            let mut t = Tags::default();
            t.insert(name.clone(), value.clone());
            prop_assert!(TagFilter::eq(name.clone(), value.clone()).matches(&t));
            prop_assert_eq!(TagFilter::eq(name, other.clone()).matches(&t), other == value);
        }
    }
}
