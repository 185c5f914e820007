use std::collections::BTreeMap;

use serde_json::Value;

use crate::node::Node;

/// A partial update applied to a [`Node`] tree by [`crate::merge::merge`].
///
/// `Delete` and `Clear` are instructions, not data: no `Node` can ever be
/// equal to them, so a producer cannot trigger a removal by accident.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Remove the key from the merged object.
    Delete,
    /// Keep the key but mark it explicitly cleared (`null`).
    Clear,
    /// Plain data. Objects inside it still deep-merge unless the path is shallow.
    Value(Node),
    /// Keyed sub-patches.
    Object(BTreeMap<String, Patch>),
}

pub const DELETE: Patch = Patch::Delete;

impl Default for Patch {
    fn default() -> Self {
        Self::empty()
    }
}

impl Patch {
    pub fn empty() -> Self {
        Self::Object(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Object(map) if map.is_empty())
    }

    /// Adds `key -> patch`, turning `self` into an object patch if needed.
    pub fn with(mut self, key: impl Into<String>, patch: impl Into<Patch>) -> Self {
        self.insert(key, patch);
        self
    }

    pub fn set(self, key: impl Into<String>, value: impl Into<Node>) -> Self {
        self.with(key, Patch::Value(value.into()))
    }

    pub fn clear(self, key: impl Into<String>) -> Self {
        self.with(key, Patch::Clear)
    }

    pub fn delete(self, key: impl Into<String>) -> Self {
        self.with(key, Patch::Delete)
    }

    /// Applies a tri-state field; `Field::Unset` leaves the key unmentioned.
    pub fn field<T>(self, key: impl Into<String>, field: Field<T>) -> Self
    where
        T: Into<Node>,
    {
        match field {
            Field::Unset => self,
            Field::Clear => self.clear(key),
            Field::Set(value) => self.set(key, value),
        }
    }

    /// Like [`Patch::with`] but skips empty object patches.
    pub fn nested(self, key: impl Into<String>, patch: Patch) -> Self {
        if patch.is_empty() {
            self
        } else {
            self.with(key, patch)
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, patch: impl Into<Patch>) {
        if !matches!(self, Self::Object(_)) {
            *self = Self::empty();
        }
        if let Self::Object(map) = self {
            map.insert(key.into(), patch.into());
        }
    }

    pub fn entry(&self, key: &str) -> Option<&Patch> {
        match self {
            Self::Object(map) => map.get(key),
            Self::Value(_) | Self::Delete | Self::Clear => None,
        }
    }

    /// Follows a dotted path through nested object patches.
    pub fn pointer(&self, dotted: &str) -> Option<&Patch> {
        dotted
            .split('.')
            .try_fold(self, |patch, segment| patch.entry(segment))
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Value(node) => Some(node),
            _ => None,
        }
    }
}

impl From<Node> for Patch {
    fn from(node: Node) -> Self {
        Self::Value(node)
    }
}

impl From<Value> for Patch {
    fn from(value: Value) -> Self {
        Self::Value(Node::from(value))
    }
}

/// Producer-side tri-state: leave a field alone, clear it, or set it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field<T> {
    Unset,
    Clear,
    Set(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T> Field<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Self::Set(value) => Some(value),
            Self::Unset | Self::Clear => None,
        }
    }

    /// `None` means "explicitly cleared", not "leave alone".
    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::Clear, Self::Set)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Self::Unset => Field::Unset,
            Self::Clear => Field::Clear,
            Self::Set(value) => Field::Set(f(value)),
        }
    }

    /// Keeps `self` unless it is `Unset`.
    pub fn or(self, other: Field<T>) -> Field<T> {
        match self {
            Self::Unset => other,
            set_or_clear => set_or_clear,
        }
    }
}
