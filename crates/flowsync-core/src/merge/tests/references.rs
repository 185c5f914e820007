use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn absent_patch_returns_the_same_base() {
    let base = node(json!({"chat": {"active": true}}));
    let result = merge(Some(&base), None, &MergeOptions::default()).expect("merge");
    assert!(result.same(&base));
}

#[test]
fn empty_patch_returns_the_same_base() {
    let base = node(json!({"chat": {"active": true}}));
    let result = merged(&base, &Patch::empty(), &MergeOptions::default());
    assert!(result.same(&base));

    let result = merged(&base, &patch(json!({})), &MergeOptions::default());
    assert!(result.same(&base));
}

#[test]
fn reference_identical_patch_returns_the_base() {
    let base = node(json!({"x": [1]}));
    let result = merged(&base, &Patch::Value(base.clone()), &MergeOptions::default());
    assert!(result.same(&base));
}

#[test]
fn untouched_subtrees_stay_shared() {
    let base = node(json!({
        "chat": {"messages": [1], "show": false},
        "stepByStep": {"eventHistory": [], "active": false}
    }));
    let result = merged(
        &base,
        &Patch::empty().nested("chat", Patch::empty().set("show", true)),
        &MergeOptions::default(),
    );

    assert!(!result.same(&base));
    assert_eq!(result.pointer("chat.show"), Some(&Node::Bool(true)));
    let before = base.pointer("stepByStep").expect("stepByStep");
    let after = result.pointer("stepByStep").expect("stepByStep");
    assert!(after.same(before));
    let before = base.pointer("chat.messages").expect("messages");
    let after = result.pointer("chat.messages").expect("messages");
    assert!(after.same(before));
}

#[test]
fn equal_scalars_keep_the_base_object() {
    let base = node(json!({"chat": {"show": true, "active": true}}));
    let result = merged(
        &base,
        &patch(json!({"chat": {"show": true}})),
        &MergeOptions::default(),
    );
    assert!(result.same(&base));
}

#[test]
fn merge_is_idempotent_for_deterministic_patches() {
    let options = chat_options();
    let base = node(json!({
        "chat": {"show": false, "error": "old"},
        "messages": [message("1")],
        "pendingInput": {"prompt": "x"}
    }));
    let update = Patch::empty()
        .nested(
            "chat",
            Patch::empty()
                .set("show", true)
                .field("error", Field::<String>::Clear),
        )
        .set("messages", node(json!([message("2")])))
        .delete("pendingInput");

    let once = merged(&base, &update, &options);
    let twice = merged(&once, &update, &options);
    assert_eq!(twice, once);
    assert!(twice.pointer("chat").expect("chat").same(once.pointer("chat").expect("chat")));
}

#[test]
fn shallow_paths_replace_instead_of_merging() {
    let options = MergeOptions::default().with_shallow("step.currentEvent");
    let base = node(json!({"step": {
        "currentEvent": {"type": "debug_event", "participants": ["a", "b"], "stale": true},
        "other": {"kept": 1}
    }}));
    let update = patch(json!({"step": {
        "currentEvent": {"type": "debug_event", "participants": ["c"]}
    }}));

    let result = merged(&base, &update, &options);
    assert_eq!(
        result.pointer("step.currentEvent").map(Node::to_value),
        Some(json!({"type": "debug_event", "participants": ["c"]}))
    );
    assert_eq!(result.pointer("step.other.kept").map(Node::to_value), Some(json!(1)));

    let deep = merged(&base, &update, &MergeOptions::default());
    assert_eq!(deep.pointer("step.currentEvent.stale"), Some(&Node::Bool(true)));
}

#[test]
fn non_object_pairs_replace_outright() {
    let base = node(json!({"a": {"nested": 1}, "b": 3, "c": "x"}));
    let update = patch(json!({"a": 7, "b": {"now": "object"}, "c": null}));

    let result = merged(&base, &update, &MergeOptions::default());
    assert_eq!(
        result.to_value(),
        json!({"a": 7, "b": {"now": "object"}, "c": null})
    );
}
