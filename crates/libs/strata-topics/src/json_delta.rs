use crate::json_pointer::JsonPointer;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Values keyed by the pointer at which they were removed or inserted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonChangeMap {
    entries: BTreeMap<JsonPointer, JsonValue>,
}

impl JsonChangeMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, pointer: &JsonPointer) -> Option<&JsonValue> {
        self.entries.get(pointer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JsonPointer, &JsonValue)> {
        self.entries.iter()
    }

    /// Entries at `pointer` or beneath it.
    pub fn descendants_of(&self, pointer: &JsonPointer) -> JsonChangeMap {
        self.filtered(|key| pointer.is_prefix_of(key))
    }

    /// Entries at `pointer`, beneath it, or on the path from the root to it.
    pub fn intersection_of(&self, pointer: &JsonPointer) -> JsonChangeMap {
        self.filtered(|key| pointer.is_prefix_of(key) || key.is_prefix_of(pointer))
    }

    fn filtered(&self, keep: impl Fn(&JsonPointer) -> bool) -> JsonChangeMap {
        let entries = self
            .entries
            .iter()
            .filter(|(key, _)| keep(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        JsonChangeMap { entries }
    }

    fn insert(&mut self, pointer: JsonPointer, value: &JsonValue) {
        self.entries.insert(pointer, value.clone());
    }
}

/// Structural difference between two JSON documents.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonDelta {
    removed: JsonChangeMap,
    inserted: JsonChangeMap,
}

impl JsonDelta {
    pub fn between(old: &JsonValue, new: &JsonValue) -> Self {
        let mut delta = JsonDelta::default();
        delta.diff(JsonPointer::root(), old, new);
        delta
    }

    pub fn removed(&self) -> &JsonChangeMap {
        &self.removed
    }

    pub fn inserted(&self) -> &JsonChangeMap {
        &self.inserted
    }

    pub fn has_changes(&self) -> bool {
        !self.removed.is_empty() || !self.inserted.is_empty()
    }

    fn diff(&mut self, at: JsonPointer, old: &JsonValue, new: &JsonValue) {
        match (old, new) {
            (JsonValue::Object(before), JsonValue::Object(after)) => {
                for (key, value) in before {
                    match after.get(key) {
                        Some(next) => self.diff(at.child(key.as_str()), value, next),
                        None => self.removed.insert(at.child(key.as_str()), value),
                    }
                }
                for (key, value) in after {
                    if !before.contains_key(key) {
                        self.inserted.insert(at.child(key.as_str()), value);
                    }
                }
            }
            (JsonValue::Array(before), JsonValue::Array(after)) => {
                for (index, value) in before.iter().enumerate() {
                    match after.get(index) {
                        Some(next) => self.diff(at.child(index.to_string()), value, next),
                        None => self.removed.insert(at.child(index.to_string()), value),
                    }
                }
                for (index, value) in after.iter().enumerate().skip(before.len()) {
                    self.inserted.insert(at.child(index.to_string()), value);
                }
            }
            _ if old != new => {
                self.removed.insert(at.clone(), old);
                self.inserted.insert(at, new);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pointer(raw: &str) -> JsonPointer {
        JsonPointer::parse(raw).expect("valid pointer")
    }

    #[test]
    fn delta_reports_removed_and_inserted_members() {
        let old = json!({"a": 1, "b": {"c": true}, "list": [1, 2, 3]});
        let new = json!({"a": 2, "b": {"c": true, "d": null}, "list": [1, 2]});
        let delta = JsonDelta::between(&old, &new);

        assert_eq!(delta.removed().get(&pointer("/a")), Some(&json!(1)));
        assert_eq!(delta.inserted().get(&pointer("/a")), Some(&json!(2)));
        assert_eq!(delta.inserted().get(&pointer("/b/d")), Some(&JsonValue::Null));
        assert_eq!(delta.removed().get(&pointer("/list/2")), Some(&json!(3)));
        assert_eq!(delta.removed().len(), 2);
        assert!(!JsonDelta::between(&old, &old).has_changes());
    }

    #[test]
    fn descendants_and_intersection() {
        let old = json!({"a": {"b": 1, "c": 2}, "x": 0});
        let new = json!({"a": {"b": 5}, "x": 1});
        let delta = JsonDelta::between(&old, &new);

        let under_a = delta.removed().descendants_of(&pointer("/a"));
        assert_eq!(under_a.len(), 2);
        assert!(under_a.get(&pointer("/x")).is_none());

        let replaced = JsonDelta::between(&json!({"a": 1}), &json!({"a": {"b": 2}}));
        let deep = replaced.removed().intersection_of(&pointer("/a/b"));
        assert_eq!(deep.get(&pointer("/a")), Some(&json!(1)));
        assert!(replaced.removed().descendants_of(&pointer("/a/b")).is_empty());
    }
}
