use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::MergeError;
use crate::node::Node;
use crate::node::NodeMap;
use crate::patch::Patch;

pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Keys that are never written, whatever the patch says.
pub const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

const PRIMARY_IDENTITY_KEYS: [&str; 4] = ["id", "uuid", "timestamp", "ts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayStrategy {
    #[default]
    Replace,
    Append,
    Prepend,
}

pub type IdentityFn = fn(&Node) -> Option<String>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayRule {
    pub strategy: ArrayStrategy,
    pub max_len: Option<usize>,
    pub identity: Option<IdentityFn>,
}

impl ArrayRule {
    pub fn replace() -> Self {
        Self::default()
    }

    pub fn append() -> Self {
        Self {
            strategy: ArrayStrategy::Append,
            ..Self::default()
        }
    }

    pub fn prepend() -> Self {
        Self {
            strategy: ArrayStrategy::Prepend,
            ..Self::default()
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn with_identity(mut self, identity: IdentityFn) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn deduplicated(self) -> Self {
        self.with_identity(composite_identity)
    }
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub max_depth: usize,
    /// Dotted paths where the patch value replaces the base wholesale.
    pub shallow_paths: BTreeSet<String>,
    /// Array resolution per dotted path; unlisted paths use `Replace`.
    pub arrays: BTreeMap<String, ArrayRule>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            shallow_paths: BTreeSet::new(),
            arrays: BTreeMap::new(),
        }
    }
}

impl MergeOptions {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_shallow(mut self, path: impl Into<String>) -> Self {
        self.shallow_paths.insert(path.into());
        self
    }

    pub fn with_array(mut self, path: impl Into<String>, rule: ArrayRule) -> Self {
        self.arrays.insert(path.into(), rule);
        self
    }

    pub fn is_shallow(&self, path: &str) -> bool {
        self.shallow_paths.contains(path)
    }

    pub fn array_rule(&self, path: &str) -> ArrayRule {
        self.arrays.get(path).copied().unwrap_or_default()
    }
}

/// Composite element identity: the first of `id`/`uuid`/`timestamp`/`ts`,
/// then `sender`, `recipient` and `type` (or `kind`), joined with `|`.
/// Elements carrying none of those fields have no identity and are never
/// treated as duplicates.
pub fn composite_identity(item: &Node) -> Option<String> {
    let map = item.as_object()?;
    let primary = PRIMARY_IDENTITY_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(identity_part));
    let sender = map.get("sender").and_then(identity_part);
    let recipient = map.get("recipient").and_then(identity_part);
    let kind = map
        .get("type")
        .or_else(|| map.get("kind"))
        .and_then(identity_part);

    if primary.is_none() && sender.is_none() && recipient.is_none() && kind.is_none() {
        return None;
    }
    Some(
        [primary, sender, recipient, kind]
            .map(Option::unwrap_or_default)
            .join("|"),
    )
}

fn identity_part(node: &Node) -> Option<String> {
    match node {
        Node::String(value) if !value.is_empty() => Some(value.to_string()),
        Node::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

/// Merges `patch` into `base`, returning a new tree that shares every
/// untouched subtree with `base`.
pub fn merge(
    base: Option<&Node>,
    patch: Option<&Patch>,
    options: &MergeOptions,
) -> Result<Node, MergeError> {
    let Some(base) = base else {
        return Err(MergeError::invalid_input("base state is missing"));
    };
    let Some(patch) = patch else {
        return Ok(base.clone());
    };
    match patch {
        Patch::Delete | Patch::Clear | Patch::Value(Node::Null) => {
            Err(MergeError::invalid_input("patch is null"))
        }
        Patch::Value(node) if node.same(base) => Ok(base.clone()),
        _ => {
            let merger = Merger { options };
            let merged = merger.merge_entry(Some(base), Incoming::Patch(patch), "", 1)?;
            Ok(merged.unwrap_or(Node::Null))
        }
    }
}

#[derive(Clone, Copy)]
enum Incoming<'p> {
    Patch(&'p Patch),
    Node(&'p Node),
}

type Entries<'p> = Vec<(&'p str, Incoming<'p>)>;

struct Merger<'o> {
    options: &'o MergeOptions,
}

impl Merger<'_> {
    /// `None` means the key is removed.
    fn merge_entry(
        &self,
        base: Option<&Node>,
        incoming: Incoming<'_>,
        path: &str,
        depth: usize,
    ) -> Result<Option<Node>, MergeError> {
        let node = match incoming {
            Incoming::Patch(Patch::Delete) => return Ok(None),
            Incoming::Patch(Patch::Clear) => return Ok(Some(Node::Null)),
            Incoming::Patch(Patch::Object(map)) => {
                let entries = map
                    .iter()
                    .map(|(key, patch)| (key.as_str(), Incoming::Patch(patch)))
                    .collect();
                return self.merge_object_entry(base, entries, path, depth).map(Some);
            }
            Incoming::Patch(Patch::Value(node)) | Incoming::Node(node) => node,
        };

        if base.is_some_and(|base| base.same(node)) {
            return Ok(base.cloned());
        }

        match node {
            Node::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(key, node)| (key.as_str(), Incoming::Node(node)))
                    .collect();
                self.merge_object_entry(base, entries, path, depth).map(Some)
            }
            Node::Array(items) => {
                let base_items = base.and_then(Node::as_array);
                Ok(Some(self.merge_array(base_items, items, path)))
            }
            scalar => Ok(Some(scalar.clone())),
        }
    }

    fn merge_object_entry(
        &self,
        base: Option<&Node>,
        entries: Entries<'_>,
        path: &str,
        depth: usize,
    ) -> Result<Node, MergeError> {
        if self.options.is_shallow(path) {
            return self.merge_object(None, entries, path, depth);
        }
        self.merge_object(base.and_then(Node::as_object), entries, path, depth)
    }

    fn merge_object(
        &self,
        base: Option<&Arc<NodeMap>>,
        entries: Entries<'_>,
        path: &str,
        depth: usize,
    ) -> Result<Node, MergeError> {
        if depth > self.options.max_depth {
            return Err(MergeError::MaxDepthExceeded {
                path: display_path(path),
                max_depth: self.options.max_depth,
            });
        }

        let mut result: NodeMap = base.map(|map| map.as_ref().clone()).unwrap_or_default();
        let mut changed = base.is_none();

        for (key, incoming) in entries {
            if RESERVED_KEYS.contains(&key) {
                tracing::debug!(key, path, "skipping reserved key in patch");
                continue;
            }
            let child_path = join_path(path, key);
            let current = result.get(key).cloned();
            match self.merge_entry(current.as_ref(), incoming, &child_path, depth + 1)? {
                Some(next) => {
                    if !current.is_some_and(|current| current.same(&next)) {
                        result.insert(key.to_string(), next);
                        changed = true;
                    }
                }
                None => {
                    if result.remove(key).is_some() {
                        changed = true;
                    }
                }
            }
        }

        match base {
            Some(base) if !changed => Ok(Node::Object(Arc::clone(base))),
            _ => Ok(Node::object(result)),
        }
    }

    fn merge_array(
        &self,
        base: Option<&Arc<Vec<Node>>>,
        incoming: &Arc<Vec<Node>>,
        path: &str,
    ) -> Node {
        let rule = self.options.array_rule(path);
        if incoming.is_empty()
            || (rule.strategy == ArrayStrategy::Replace
                && rule.identity.is_none()
                && rule.max_len.map_or(true, |max| incoming.len() <= max))
        {
            return Node::Array(Arc::clone(incoming));
        }

        let base_items: &[Node] = base.map_or(&[][..], |items| items.as_slice());
        let mut combined: Vec<Node> = match rule.strategy {
            ArrayStrategy::Replace => incoming.to_vec(),
            ArrayStrategy::Append => base_items.iter().chain(incoming.iter()).cloned().collect(),
            ArrayStrategy::Prepend => incoming.iter().chain(base_items.iter()).cloned().collect(),
        };

        if let Some(identity) = rule.identity {
            let mut seen = HashSet::new();
            combined.retain(|item| identity(item).map_or(true, |key| seen.insert(key)));
        }

        if let Some(max_len) = rule.max_len {
            if combined.len() > max_len {
                match rule.strategy {
                    ArrayStrategy::Prepend => combined.truncate(max_len),
                    ArrayStrategy::Append | ArrayStrategy::Replace => {
                        let excess = combined.len() - max_len;
                        combined.drain(..excess);
                    }
                }
            }
        }

        if let Some(base) = base {
            let unchanged = base.len() == combined.len()
                && base.iter().zip(&combined).all(|(left, right)| left.same(right));
            if unchanged {
                return Node::Array(Arc::clone(base));
            }
        }
        Node::array(combined)
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests;
