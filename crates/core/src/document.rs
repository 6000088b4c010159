//! JSON key/value document shared by requests, step inputs and step results.

use crate::error::FlowResult;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object used as the wire payload and as the per-step working set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Parse a JSON object. Empty input yields an empty document.
    pub fn parse(data: &[u8]) -> FlowResult<Self> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        Ok(serde_json::from_slice(data)?)
    }

    /// Look up a key; `None` when absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Copy every entry of `other` into `self`; keys of `other` win on collision.
    pub fn merge(&mut self, other: Document) {
        self.0.extend(other.0);
    }

    /// A new document holding only the listed keys that are present.
    pub fn project<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Document {
        let mut projected = Document::new();
        for key in keys {
            if let Some(value) = self.0.get(key) {
                projected.set(key.clone(), value.clone());
            }
        }
        projected
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn marshal(&self) -> FlowResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self.0)?))
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_get() {
        let doc = Document::parse(br#"{"in_foo":"in_bar","n":1}"#).unwrap();
        assert_eq!(doc.get("in_foo"), Some(&json!("in_bar")));
        assert_eq!(doc.get("n"), Some(&json!(1)));
        assert!(doc.get("missing").is_none());
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(Document::parse(b"").unwrap().is_empty());
        assert!(Document::parse(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(Document::parse(b"[1,2]").is_err());
        assert!(Document::parse(b"not json").is_err());
    }

    #[test]
    fn test_merge_overwrites_on_collision() {
        let mut target = Document::parse(br#"{"a":1,"b":1}"#).unwrap();
        let other = Document::parse(br#"{"b":2,"c":3}"#).unwrap();

        target.merge(other);

        assert_eq!(target.get("a"), Some(&json!(1)));
        assert_eq!(target.get("b"), Some(&json!(2)));
        assert_eq!(target.get("c"), Some(&json!(3)));
    }

    #[test]
    fn test_project_keeps_only_present_keys() {
        let doc = Document::parse(br#"{"keep":true,"drop":false}"#).unwrap();
        let keys = vec!["keep".to_string(), "absent".to_string()];

        let projected = doc.project(&keys);

        assert_eq!(projected.len(), 1);
        assert!(projected.contains_key("keep"));
    }

    #[test]
    fn test_marshal_nested_values() {
        let mut doc = Document::new();
        doc.set("node_foo", json!({"this": {"a": 0.1, "b": "bb"}}));

        let bytes = doc.marshal().unwrap();
        assert_eq!(&bytes[..], br#"{"node_foo":{"this":{"a":0.1,"b":"bb"}}}"#);
    }
}
