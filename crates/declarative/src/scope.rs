//! Hierarchical key/value scopes stored in an arena.
//!
//! Each layer has an optional parent. Reads fall through to the parent,
//! writes always land in the layer they target. A value may be deferred:
//! its template strings, at any depth inside tables and arrays, are rendered
//! on first read and the result replaces it in the layer that owns it.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

/// Index of a scope layer in [`Scopes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// A stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Ready(Value),
    /// Value with template strings in it, waiting for its first read
    Deferred(Value),
    /// Being rendered right now; reading it again means a reference cycle
    Rendering,
}

/// Whether a string contains template syntax.
pub fn is_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%") || s.contains("{#")
}

/// Whether any string inside `value` contains template syntax.
pub fn has_template(value: &Value) -> bool {
    match value {
        Value::String(s) => is_template(s),
        Value::Array(items) => items.iter().any(has_template),
        Value::Object(map) => map.values().any(has_template),
        _ => false,
    }
}

#[derive(Debug, Default)]
struct Layer {
    parent: Option<ScopeId>,
    values: BTreeMap<String, Cell>,
}

/// Arena of scope layers.
#[derive(Debug, Default)]
pub struct Scopes {
    layers: Vec<Layer>,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// A layer with no parent.
    pub fn root(&mut self) -> ScopeId {
        self.push(None)
    }

    /// A layer whose reads fall through to `parent`, pre-filled with `extra`.
    pub fn child(&mut self, parent: ScopeId, extra: Map<String, Value>) -> ScopeId {
        let id = self.push(Some(parent));
        for (key, value) in extra {
            self.set(id, &key, value);
        }
        id
    }

    fn push(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.layers.push(Layer {
            parent,
            values: BTreeMap::new(),
        });
        ScopeId(self.layers.len() - 1)
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.layers[scope.0].parent
    }

    /// Store a ready value in `scope` itself.
    pub fn set(&mut self, scope: ScopeId, key: &str, value: Value) {
        self.put(scope, key, Cell::Ready(value));
    }

    /// Store a value, deferring it when template syntax appears anywhere
    /// inside.
    pub fn define(&mut self, scope: ScopeId, key: &str, value: Value) {
        let cell = if has_template(&value) {
            Cell::Deferred(value)
        } else {
            Cell::Ready(value)
        };
        self.put(scope, key, cell);
    }

    /// Overwrite a cell in exactly `scope`.
    pub fn put(&mut self, scope: ScopeId, key: &str, cell: Cell) {
        self.layers[scope.0].values.insert(key.to_string(), cell);
    }

    /// Find `key` walking up from `scope`; returns the owning layer too.
    pub fn lookup(&self, scope: ScopeId, key: &str) -> Option<(ScopeId, &Cell)> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let layer = &self.layers[id.0];
            if let Some(cell) = layer.values.get(key) {
                return Some((id, cell));
            }
            current = layer.parent;
        }
        None
    }

    pub fn contains(&self, scope: ScopeId, key: &str) -> bool {
        self.lookup(scope, key).is_some()
    }

    /// Ready value for `key`, without rendering anything.
    pub fn get_ready(&self, scope: ScopeId, key: &str) -> Option<&Value> {
        match self.lookup(scope, key)? {
            (_, Cell::Ready(value)) => Some(value),
            _ => None,
        }
    }

    /// Keys defined in this layer only.
    pub fn own_keys(&self, scope: ScopeId) -> impl Iterator<Item = &str> {
        self.layers[scope.0].values.keys().map(String::as_str)
    }

    /// Every key visible from `scope`.
    pub fn visible_keys(&self, scope: ScopeId) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            keys.extend(self.layers[id.0].values.keys().cloned());
            current = self.layers[id.0].parent;
        }
        keys
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_child_inherits_parent_value() {
        let mut scopes = Scopes::new();
        let parent = scopes.root();
        scopes.set(parent, "x", json!("p"));
        let child = scopes.child(parent, Map::new());

        assert_eq!(scopes.get_ready(child, "x"), Some(&json!("p")));
    }

    #[test]
    fn test_child_shadows_without_mutating_parent() {
        let mut scopes = Scopes::new();
        let parent = scopes.root();
        scopes.set(parent, "x", json!("p"));
        let child = scopes.child(parent, Map::new());
        scopes.set(child, "x", json!("c"));

        assert_eq!(scopes.get_ready(child, "x"), Some(&json!("c")));
        assert_eq!(scopes.get_ready(parent, "x"), Some(&json!("p")));
    }

    #[test]
    fn test_child_extra_values() {
        let mut scopes = Scopes::new();
        let parent = scopes.root();
        let mut extra = Map::new();
        extra.insert("k".into(), json!(1));
        let child = scopes.child(parent, extra);

        assert!(scopes.contains(child, "k"));
        assert!(!scopes.contains(parent, "k"));
    }

    #[test]
    fn test_define_defers_templates_only() {
        let mut scopes = Scopes::new();
        let s = scopes.root();
        scopes.define(s, "plain", json!("hello"));
        scopes.define(s, "tpl", json!("{{ y }}"));
        scopes.define(s, "num", json!(3));

        assert_eq!(scopes.lookup(s, "plain").unwrap().1, &Cell::Ready(json!("hello")));
        assert_eq!(scopes.lookup(s, "tpl").unwrap().1, &Cell::Deferred(json!("{{ y }}")));
        assert_eq!(scopes.get_ready(s, "num"), Some(&json!(3)));
    }

    #[test]
    fn test_define_defers_nested_templates() {
        let mut scopes = Scopes::new();
        let s = scopes.root();
        let table = json!({"face": "{{ font }} 12", "size": 12});
        scopes.define(s, "kitty", table.clone());
        scopes.define(s, "paths", json!(["/a", ["{{ home }}/b"]]));
        scopes.define(s, "plain", json!({"face": "Mono"}));

        assert_eq!(scopes.lookup(s, "kitty").unwrap().1, &Cell::Deferred(table));
        assert!(matches!(scopes.lookup(s, "paths").unwrap().1, Cell::Deferred(_)));
        assert_eq!(scopes.get_ready(s, "plain"), Some(&json!({"face": "Mono"})));
    }

    #[test]
    fn test_lookup_reports_owner() {
        let mut scopes = Scopes::new();
        let parent = scopes.root();
        scopes.define(parent, "t", json!("{{ a }}"));
        let child = scopes.child(parent, Map::new());

        let (owner, _) = scopes.lookup(child, "t").unwrap();
        assert_eq!(owner, parent);
    }

    #[test]
    fn test_visible_keys_merge_chain() {
        let mut scopes = Scopes::new();
        let parent = scopes.root();
        scopes.set(parent, "a", json!(1));
        let child = scopes.child(parent, Map::new());
        scopes.set(child, "b", json!(2));

        let keys: Vec<_> = scopes.visible_keys(child).into_iter().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(scopes.own_keys(child).collect::<Vec<_>>(), vec!["b"]);
    }
}
