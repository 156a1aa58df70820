//! Shared, immutable state values.

use crate::error::{Result, StoreError};
use crate::types::Key;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The shape of a state value.
///
/// Containers hold [`Node`] handles rather than owned values, so copying a
/// container only copies its direct entries. Everything below them stays
/// shared with the original.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Node>),
    Object(BTreeMap<String, Node>),
}

/// A reference-counted handle to a state value.
///
/// Cloning a `Node` is O(1) and yields a handle to the same value. `==`
/// compares structurally; [`Node::is_identical`] is the identity check
/// used to decide whether a write changes anything.
#[derive(Clone)]
pub struct Node(Arc<NodeValue>);

impl Node {
    pub fn new(value: NodeValue) -> Self {
        Node(Arc::new(value))
    }

    pub fn null() -> Self {
        Node::new(NodeValue::Null)
    }

    /// An empty object.
    pub fn object() -> Self {
        Node::new(NodeValue::Object(BTreeMap::new()))
    }

    /// An empty array.
    pub fn array() -> Self {
        Node::new(NodeValue::Array(Vec::new()))
    }

    pub fn value(&self) -> &NodeValue {
        &self.0
    }

    /// Identity comparison.
    ///
    /// Arrays and objects are identical only when both handles point at the
    /// same allocation. Null, booleans, numbers and strings have no
    /// observable identity and compare by value.
    pub fn is_identical(a: &Node, b: &Node) -> bool {
        if Arc::ptr_eq(&a.0, &b.0) {
            return true;
        }
        match (a.value(), b.value()) {
            (NodeValue::Null, NodeValue::Null) => true,
            (NodeValue::Bool(x), NodeValue::Bool(y)) => x == y,
            (NodeValue::Number(x), NodeValue::Number(y)) => x == y,
            (NodeValue::String(x), NodeValue::String(y)) => x == y,
            _ => false,
        }
    }

    /// Look up the value stored under `key`.
    ///
    /// Returns `None` when the key is absent or this value cannot be
    /// indexed by that kind of key.
    pub fn get(&self, key: &Key) -> Option<Node> {
        match (self.value(), key) {
            (NodeValue::Object(map), Key::Field(name)) => map.get(name).cloned(),
            (NodeValue::Array(items), Key::Index(index)) => items.get(*index).cloned(),
            _ => None,
        }
    }

    /// Shorthand for `get(&Key::Field(name))`.
    pub fn field(&self, name: &str) -> Option<Node> {
        match self.value() {
            NodeValue::Object(map) => map.get(name).cloned(),
            _ => None,
        }
    }

    /// Whether `key` is present. A present key may still hold `null`.
    pub fn contains_key(&self, key: &Key) -> bool {
        match (self.value(), key) {
            (NodeValue::Object(map), Key::Field(name)) => map.contains_key(name),
            (NodeValue::Array(items), Key::Index(index)) => *index < items.len(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value(), NodeValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value() {
            NodeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.value() {
            NodeValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self.value() {
            NodeValue::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value() {
            NodeValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.value() {
            NodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Node]> {
        match self.value() {
            NodeValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Node>> {
        match self.value() {
            NodeValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Deep-copy into a `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self.value() {
            NodeValue::Null => serde_json::Value::Null,
            NodeValue::Bool(b) => serde_json::Value::Bool(*b),
            NodeValue::Number(n) => serde_json::Value::Number(n.clone()),
            NodeValue::String(s) => serde_json::Value::String(s.clone()),
            NodeValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(Node::to_json).collect())
            }
            NodeValue::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Build a node from any serializable value.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value)?;
        Ok(Node::from(json))
    }

    /// Decode this node into a typed value.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_json())
            .map_err(|e| StoreError::Deserialization(e.to_string()))
    }
}

/// Identity comparison over possibly-absent values. Absent only matches absent.
pub fn same_state(a: Option<&Node>, b: Option<&Node>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Node::is_identical(a, b),
        _ => false,
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::null()
    }
}

impl From<serde_json::Value> for Node {
    fn from(json: serde_json::Value) -> Self {
        let value = match json {
            serde_json::Value::Null => NodeValue::Null,
            serde_json::Value::Bool(b) => NodeValue::Bool(b),
            serde_json::Value::Number(n) => NodeValue::Number(n),
            serde_json::Value::String(s) => NodeValue::String(s),
            serde_json::Value::Array(items) => {
                NodeValue::Array(items.into_iter().map(Node::from).collect())
            }
            serde_json::Value::Object(map) => {
                NodeValue::Object(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
        };
        Node::new(value)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::new(NodeValue::Bool(b))
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::new(NodeValue::Number(n.into()))
    }
}

impl From<u64> for Node {
    fn from(n: u64) -> Self {
        Node::new(NodeValue::Number(n.into()))
    }
}

impl From<i32> for Node {
    fn from(n: i32) -> Self {
        Node::new(NodeValue::Number(n.into()))
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::new(NodeValue::String(s.to_string()))
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::new(NodeValue::String(s))
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::new(NodeValue::Array(items))
    }
}

impl From<BTreeMap<String, Node>> for Node {
    fn from(map: BTreeMap<String, Node>) -> Self {
        Node::new(NodeValue::Object(map))
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.value() {
            NodeValue::Null => serializer.serialize_unit(),
            NodeValue::Bool(b) => serializer.serialize_bool(*b),
            NodeValue::Number(n) => n.serialize(serializer),
            NodeValue::String(s) => serializer.serialize_str(s),
            NodeValue::Array(items) => serializer.collect_seq(items),
            NodeValue::Object(map) => serializer.collect_map(map),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Node::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion() {
        let json = json!({"count": 1, "items": ["a", null, true], "nested": {"x": 1.5}});
        let node = Node::from(json.clone());
        assert_eq!(node.to_json(), json);
        assert_eq!(node.field("count").and_then(|n| n.as_i64()), Some(1));
        assert_eq!(
            node.get(&Key::Field("items".into()))
                .and_then(|items| items.get(&Key::Index(0)))
                .and_then(|n| n.as_str().map(str::to_string)),
            Some("a".to_string())
        );
    }

    #[test]
    fn test_identity_of_containers() {
        let a = Node::from(json!({"x": 1}));
        let b = Node::from(json!({"x": 1}));
        assert_eq!(a, b);
        assert!(!Node::is_identical(&a, &b));
        assert!(Node::is_identical(&a, &a.clone()));
    }

    #[test]
    fn test_identity_of_scalars() {
        assert!(Node::is_identical(&Node::from(5i64), &Node::from(5i64)));
        assert!(Node::is_identical(&Node::from("a"), &Node::from("a")));
        assert!(Node::is_identical(&Node::null(), &Node::null()));
        assert!(!Node::is_identical(&Node::from(5i64), &Node::from("5")));
    }

    #[test]
    fn test_same_state_handles_absence() {
        let n = Node::from(1i64);
        assert!(same_state(None, None));
        assert!(!same_state(Some(&n), None));
        assert!(same_state(Some(&n), Some(&n)));
    }

    #[test]
    fn test_contains_key_distinguishes_null() {
        let node = Node::from(json!({"present": null}));
        assert!(node.contains_key(&Key::Field("present".into())));
        assert!(!node.contains_key(&Key::Field("missing".into())));
        assert!(node.field("present").map(|n| n.is_null()).unwrap_or(false));
    }

    #[test]
    fn test_serde_roundtrip_through_typed() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Settings {
            theme: String,
            size: u32,
        }

        let settings = Settings { theme: "dark".into(), size: 12 };
        let node = Node::from_serialize(&settings).unwrap();
        assert_eq!(node.field("size").and_then(|n| n.as_u64()), Some(12));
        let back: Settings = node.deserialize_into().unwrap();
        assert_eq!(back, settings);

        let text = serde_json::to_string(&node).unwrap();
        let reparsed: Node = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed, node);
    }
}
