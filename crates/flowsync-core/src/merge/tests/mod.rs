use serde_json::json;
use serde_json::Value;

pub(super) use super::composite_identity;
pub(super) use super::merge;
pub(super) use super::ArrayRule;
pub(super) use super::MergeOptions;
pub(super) use crate::error::MergeError;
pub(super) use crate::node::Node;
pub(super) use crate::patch::Field;
pub(super) use crate::patch::Patch;
pub(super) use crate::patch::DELETE;

mod arrays;
mod references;

fn node(value: Value) -> Node {
    Node::from(value)
}

fn patch(value: Value) -> Patch {
    Patch::from(value)
}

fn merged(base: &Node, patch: &Patch, options: &MergeOptions) -> Node {
    merge(Some(base), Some(patch), options).expect("merge should succeed")
}

fn chat_options() -> MergeOptions {
    MergeOptions::default()
        .with_array("messages", ArrayRule::append().deduplicated())
        .with_array("history", ArrayRule::prepend().deduplicated())
}

fn message(id: &str) -> Value {
    json!({"id": id, "sender": "user", "recipient": "assistant", "type": "text"})
}
