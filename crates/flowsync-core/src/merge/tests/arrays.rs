use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;

fn strategy_options(rule: ArrayRule) -> MergeOptions {
    MergeOptions::default().with_array("messages", rule)
}

#[test]
fn append_prepend_and_replace_resolve_in_order() {
    let base = node(json!({"messages": ["A", "B"]}));
    let update = patch(json!({"messages": ["C"]}));

    let appended = merged(&base, &update, &strategy_options(ArrayRule::append()));
    let prepended = merged(&base, &update, &strategy_options(ArrayRule::prepend()));
    let replaced = merged(&base, &update, &strategy_options(ArrayRule::replace()));
    let unconfigured = merged(&base, &update, &MergeOptions::default());

    assert_eq!(appended.to_value(), json!({"messages": ["A", "B", "C"]}));
    assert_eq!(prepended.to_value(), json!({"messages": ["C", "A", "B"]}));
    assert_eq!(replaced.to_value(), json!({"messages": ["C"]}));
    assert_eq!(unconfigured.to_value(), json!({"messages": ["C"]}));
}

#[test]
fn empty_patch_array_replaces_regardless_of_strategy() {
    let base = node(json!({"messages": [message("1")], "history": [message("2")]}));
    let update = patch(json!({"messages": [], "history": []}));

    let result = merged(&base, &update, &chat_options());
    assert_eq!(result.to_value(), json!({"messages": [], "history": []}));
}

#[test]
fn appending_a_known_identity_does_not_grow_the_array() {
    let base = node(json!({"messages": [message("1"), message("2")]}));
    let update = patch(json!({"messages": [message("2")]}));

    let result = merged(&base, &update, &chat_options());
    let messages = result.pointer("messages").and_then(Node::as_array).expect("array");
    assert_eq!(messages.len(), 2);
    assert!(result.same(&base));
}

#[test]
fn prepend_dedup_keeps_the_newest_copy_first() {
    let base = node(json!({"history": [
        {"id": "e1", "type": "debug_event", "step": 1},
        {"id": "e0", "type": "debug_event", "step": 0}
    ]}));
    let update = patch(json!({"history": [{"id": "e1", "type": "debug_event", "step": 9}]}));

    let result = merged(&base, &update, &chat_options());
    assert_eq!(
        result.pointer("history").map(Node::to_value),
        Some(json!([
            {"id": "e1", "type": "debug_event", "step": 9},
            {"id": "e0", "type": "debug_event", "step": 0}
        ]))
    );
}

#[test]
fn cap_drops_oldest_entries() {
    let options = MergeOptions::default()
        .with_array("messages", ArrayRule::append().with_max_len(3))
        .with_array("history", ArrayRule::prepend().with_max_len(3));
    let base = node(json!({"messages": [1, 2, 3], "history": [3, 2, 1]}));
    let update = patch(json!({"messages": [4, 5], "history": [5, 4]}));

    let result = merged(&base, &update, &options);
    assert_eq!(
        result.to_value(),
        json!({"messages": [3, 4, 5], "history": [5, 4, 3]})
    );
}

#[test]
fn elements_without_identity_fields_are_never_deduplicated() {
    let base = node(json!({"messages": [{"content": "hi"}]}));
    let update = patch(json!({"messages": [{"content": "hi"}]}));

    let result = merged(&base, &update, &chat_options());
    assert_eq!(
        result.pointer("messages").and_then(Node::as_array).map(|items| items.len()),
        Some(2)
    );
}

#[test]
fn composite_identity_prefers_id_then_falls_back() {
    assert_eq!(
        composite_identity(&node(message("m1"))),
        Some("m1|user|assistant|text".to_string())
    );
    assert_eq!(
        composite_identity(&node(json!({"uuid": "u", "id": "", "kind": "print"}))),
        Some("u|||print".to_string())
    );
    assert_eq!(
        composite_identity(&node(json!({"timestamp": 17, "sender": "a"}))),
        Some("17|a||".to_string())
    );
    assert_eq!(composite_identity(&node(json!("plain"))), None);
    assert_eq!(composite_identity(&node(json!({"content": "x"}))), None);
}
