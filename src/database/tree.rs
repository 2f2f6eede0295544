//! JSON tree operations with realtime-database semantics
//!
//! Writing `null` deletes, and objects left empty by a delete disappear, so a
//! location either holds a non-null value or does not exist.

use serde_json::{Map, Value};

/// Value stored at `segments`, if any
pub(crate) fn value_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    (!node.is_null()).then_some(node)
}

/// Replace the value at `segments`; `null` removes it
pub(crate) fn set_at(root: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove_at(root, segments);
        return;
    }

    let mut node = root;
    for segment in parents {
        node = child_object(node).entry(segment.clone()).or_insert(Value::Null);
    }
    child_object(node).insert(last.clone(), value);
}

/// Merge `fields` into the object at `segments`
///
/// Present fields overwrite, absent fields are preserved, `null` fields are
/// removed.
pub(crate) fn update_at(root: &mut Value, segments: &[String], fields: Map<String, Value>) {
    for (key, value) in fields {
        let mut path = segments.to_vec();
        path.extend(key.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        set_at(root, &path, value);
    }
}

/// Remove the value at `segments` and prune emptied parents
pub(crate) fn remove_at(root: &mut Value, segments: &[String]) {
    remove_in(root, segments);
    if is_empty(root) {
        *root = Value::Null;
    }
}

fn remove_in(root: &mut Value, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        *root = Value::Null;
        return;
    };

    let Some(map) = root.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        map.remove(first);
    } else if let Some(child) = map.get_mut(first) {
        remove_in(child, rest);
        if is_empty(child) {
            map.remove(first);
        }
    }
}

fn child_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> Vec<String> {
        p.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
    }

    #[test]
    fn test_set_creates_parents() {
        let mut root = Value::Null;
        set_at(&mut root, &path("users/a/records/r1"), json!({"score": 1}));
        assert_eq!(root, json!({"users": {"a": {"records": {"r1": {"score": 1}}}}}));
        assert_eq!(value_at(&root, &path("users/a/records/r1/score")), Some(&json!(1)));
    }

    #[test]
    fn test_set_null_removes_and_prunes() {
        let mut root = json!({"users": {"a": {"records": {"r1": {"score": 1}}}, "b": 1}});
        set_at(&mut root, &path("users/a/records/r1"), Value::Null);
        assert_eq!(root, json!({"users": {"b": 1}}));
    }

    #[test]
    fn test_removing_last_child_empties_root() {
        let mut root = json!({"users": {"a": {"records": {"r1": {"score": 1}}}}});
        remove_at(&mut root, &path("users/a/records/r1"));
        assert_eq!(root, Value::Null);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut root = json!({"a": 1});
        remove_at(&mut root, &path("x/y"));
        assert_eq!(root, json!({"a": 1}));
    }

    #[test]
    fn test_update_merges() {
        let mut root = json!({"r": {"score": 10, "name": "x"}});
        let fields = json!({"score": 20, "name": null, "tag": "t"});
        update_at(&mut root, &path("r"), fields.as_object().unwrap().clone());
        assert_eq!(root, json!({"r": {"score": 20, "tag": "t"}}));
    }

    #[test]
    fn test_update_with_nested_key_path() {
        let mut root = json!({"r": {"meta": {"a": 1, "b": 2}}});
        let fields = json!({"meta/b": 3});
        update_at(&mut root, &path("r"), fields.as_object().unwrap().clone());
        assert_eq!(root, json!({"r": {"meta": {"a": 1, "b": 3}}}));
    }

    #[test]
    fn test_root_replacement() {
        let mut root = json!({"a": 1});
        set_at(&mut root, &[], json!({"b": 2}));
        assert_eq!(value_at(&root, &[]), Some(&json!({"b": 2})));

        set_at(&mut root, &[], Value::Null);
        assert_eq!(value_at(&root, &[]), None);
    }
}
