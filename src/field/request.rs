//! Edit submissions.
//!
//! The widget submits the selection as a JSON-encoded array of identifiers,
//! e.g. `"[\"3\",\"7\",\"12\"]"`. Hosts that decode the body themselves may pass
//! the array directly; both forms are accepted.

use crate::entity::EntityId;
use serde_json::{Map, Value};

/// Submitted form values keyed by attribute
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormRequest {
    fields: Map<String, Value>,
}

impl FormRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object body
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            fields: serde_json::from_str(body)?,
        })
    }

    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(attribute.into(), value.into());
        self
    }

    /// Whether the attribute was submitted at all (a `null` counts as submitted)
    pub fn exists(&self, attribute: &str) -> bool {
        self.fields.contains_key(attribute)
    }

    pub fn input(&self, attribute: &str) -> Option<&Value> {
        self.fields.get(attribute)
    }
}

/// Parse a submitted selection
///
/// Returns `None` when the input is not a selection at all (malformed JSON, a
/// JSON object or scalar); the caller leaves the association untouched in that
/// case. `null` and blank strings are the empty selection. Array elements that
/// are not scalar identifiers are skipped and duplicates keep their first
/// position.
pub fn parse_selection(raw: &Value) -> Option<Vec<EntityId>> {
    match raw {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => Some(collect_ids(items)),
        Value::String(encoded) if encoded.trim().is_empty() => Some(Vec::new()),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Null) => Some(Vec::new()),
            Ok(Value::Array(items)) => Some(collect_ids(&items)),
            Ok(other) => {
                log::warn!("selection is not a JSON array: {other}");
                None
            }
            Err(e) => {
                log::warn!("selection is not valid JSON: {e}");
                None
            }
        },
        other => {
            log::warn!("unexpected selection input: {other}");
            None
        }
    }
}

fn collect_ids(items: &[Value]) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = Vec::with_capacity(items.len());
    for item in items {
        match EntityId::from_json(item) {
            Some(id) if !ids.contains(&id) => ids.push(id),
            Some(_) => {}
            None => log::debug!("skipping non-identifier selection element: {item}"),
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ints(values: &[i64]) -> Vec<EntityId> {
        values.iter().copied().map(EntityId::Int).collect()
    }

    #[test]
    fn test_parse_encoded_string_ids() {
        assert_eq!(parse_selection(&json!(r#"["1","2","3"]"#)), Some(ints(&[1, 2, 3])));
        assert_eq!(parse_selection(&json!("[5, 9]")), Some(ints(&[5, 9])));
    }

    #[test]
    fn test_parse_decoded_array() {
        assert_eq!(
            parse_selection(&json!([3, "abc"])),
            Some(vec![EntityId::Int(3), EntityId::Str("abc".into())])
        );
    }

    #[test]
    fn test_parse_duplicates_collapse_keeping_first() {
        // "2" and 2 are the same entity
        assert_eq!(parse_selection(&json!(r#"[2, 1, "2", 3, 1]"#)), Some(ints(&[2, 1, 3])));
    }

    #[test]
    fn test_parse_keeps_zero_padded_ids_distinct() {
        // EDGE CASE: "007" is a string key, not a spelling of 7
        assert_eq!(
            parse_selection(&json!(r#"["007", 7, "7"]"#)),
            Some(vec![EntityId::Str("007".into()), EntityId::Int(7)])
        );
    }

    #[test]
    fn test_parse_empty_forms() {
        assert_eq!(parse_selection(&json!(null)), Some(vec![]));
        assert_eq!(parse_selection(&json!("")), Some(vec![]));
        assert_eq!(parse_selection(&json!("null")), Some(vec![]));
        assert_eq!(parse_selection(&json!("[]")), Some(vec![]));
    }

    #[test]
    fn test_parse_malformed_is_not_a_selection() {
        assert_eq!(parse_selection(&json!("not-json")), None);
        assert_eq!(parse_selection(&json!(r#"{"id": 1}"#)), None);
        assert_eq!(parse_selection(&json!("42")), None);
        assert_eq!(parse_selection(&json!(true)), None);
        assert_eq!(parse_selection(&json!({"ids": [1]})), None);
    }

    #[test]
    fn test_parse_skips_non_scalar_elements() {
        // EDGE CASE: nested arrays, objects, booleans and nulls are dropped
        assert_eq!(
            parse_selection(&json!(r#"[1, [2], {"id": 3}, true, null, "", 4]"#)),
            Some(ints(&[1, 4]))
        );
    }

    #[test]
    fn test_form_request_presence() {
        let request = FormRequest::new().with("tags", json!(null));
        assert!(request.exists("tags"));
        assert_eq!(request.input("tags"), Some(&Value::Null));
        assert!(!request.exists("categories"));

        let request = FormRequest::from_json(r#"{"tags": "[1,2]"}"#).unwrap();
        assert_eq!(request.input("tags"), Some(&json!("[1,2]")));
        assert!(FormRequest::from_json("[1,2]").is_err());
    }
}
