//! Proptest generators for property-based testing.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::{Map, Value};

/// Generate a record category.
pub fn category() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}"
}

/// Generate a record name.
pub fn name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 ._:-]{0,31}"
}

/// Generate a tag name. A leading `~` marks a tag stored in plaintext.
pub fn tag_name() -> impl Strategy<Value = String> {
    ("~?", "[a-z][a-z0-9_]{0,11}").prop_map(|(prefix, name)| format!("{}{}", prefix, name))
}

/// Generate a single-valued tag set.
pub fn tag_map(max_tags: usize) -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(tag_name(), "[ -~]{0,16}", 0..=max_tags)
}

/// Generate a tag set encoded as a JSON object.
pub fn tags_json(max_tags: usize) -> impl Strategy<Value = String> {
    tag_map(max_tags).prop_map(|tags| encode_tags(&tags))
}

/// Encode a single-valued tag set as a JSON object.
pub fn encode_tags(tags: &BTreeMap<String, String>) -> String {
    let object: Map<String, Value> = tags
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    Value::Object(object).to_string()
}

/// Generate record value bytes of specified max length.
pub fn value(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Parameters for one record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub category: String,
    pub name: String,
    pub value: Vec<u8>,
    pub tags: BTreeMap<String, String>,
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (category(), name(), value(256), tag_map(4))
            .prop_map(|(category, name, value, tags)| RecordParams {
                category,
                name,
                value,
                tags,
            })
            .boxed()
    }
}

impl RecordParams {
    pub fn tags_json(&self) -> String {
        encode_tags(&self.tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_engine::filter::Tags;

    proptest! {
        #[test]
        fn test_generated_tags_are_accepted(json in tags_json(6)) {
            let tags = Tags::parse(Some(&json)).unwrap();
            let reparsed: Value = serde_json::from_str(&tags.to_json()).unwrap();
            let original: Value = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(reparsed, original);
        }

        #[test]
        fn test_tag_names_are_nonempty(name in tag_name()) {
            prop_assert!(!name.trim_start_matches('~').is_empty());
        }
    }
}
