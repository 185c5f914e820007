use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json::Number;
use serde_json::Value;

pub type NodeMap = BTreeMap<String, Node>;

/// Immutable JSON-like tree. Strings, arrays and objects are reference
/// counted, so cloning a `Node` never copies a subtree and two snapshots can
/// be compared for identity with [`Node::same`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(Arc<str>),
    Array(Arc<Vec<Node>>),
    Object(Arc<NodeMap>),
}

impl Node {
    pub fn object(map: NodeMap) -> Self {
        Self::Object(Arc::new(map))
    }

    pub fn array(items: Vec<Node>) -> Self {
        Self::Array(Arc::new(items))
    }

    pub fn empty_object() -> Self {
        Self::object(NodeMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<Vec<Node>>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<NodeMap>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Looks up a dotted path such as `chat.activeRequest.requestId`.
    pub fn pointer(&self, dotted: &str) -> Option<&Node> {
        if dotted.is_empty() {
            return Some(self);
        }
        dotted
            .split('.')
            .try_fold(self, |node, segment| node.get(segment))
    }

    /// Strict identity: containers compare by allocation, scalars by value.
    pub fn same(&self, other: &Node) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(left), Self::Bool(right)) => left == right,
            (Self::Number(left), Self::Number(right)) => left == right,
            (Self::String(left), Self::String(right)) => left == right,
            (Self::Array(left), Self::Array(right)) => Arc::ptr_eq(left, right),
            (Self::Object(left), Self::Object(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    pub fn to_value(&self) -> Value {
        Value::from(self)
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(value) => Self::Number(value),
            Value::String(value) => Self::String(Arc::from(value)),
            Value::Array(items) => Self::array(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => Self::object(
                map.into_iter()
                    .map(|(key, value)| (key, Node::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for Node {
    fn from(value: &Value) -> Self {
        Self::from(value.clone())
    }
}

impl From<&Node> for Value {
    fn from(node: &Node) -> Self {
        match node {
            Node::Null => Value::Null,
            Node::Bool(value) => Value::Bool(*value),
            Node::Number(value) => Value::Number(value.clone()),
            Node::String(value) => Value::String(value.to_string()),
            Node::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            Node::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<u64> for Node {
    fn from(value: u64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Self::array(items)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Number(value) => value.serialize(serializer),
            Self::String(value) => serializer.serialize_str(value),
            Self::Array(items) => serializer.collect_seq(items.iter()),
            Self::Object(map) => serializer.collect_map(map.iter()),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Node::from)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn value_conversion_keeps_shape() {
        let value = json!({"chat": {"messages": [1, "two", null]}, "flag": true});
        let node = Node::from(value.clone());
        assert_eq!(node.to_value(), value);
        assert_eq!(
            node.pointer("chat.messages").map(Node::type_name),
            Some("array")
        );
    }

    #[test]
    fn same_compares_containers_by_allocation() {
        let node = Node::from(json!({"a": [1, 2]}));
        let shared = node.clone();
        let rebuilt = Node::from(json!({"a": [1, 2]}));

        assert!(node.same(&shared));
        assert!(!node.same(&rebuilt));
        assert_eq!(node, rebuilt);
        assert!(Node::from("x").same(&Node::from("x")));
    }

    #[test]
    fn serde_round_trip_through_json_text() {
        let node = Node::from(json!({"k": [true, 1.5, "s"]}));
        let text = serde_json::to_string(&node).expect("serialize");
        let back: Node = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, node);
    }
}
