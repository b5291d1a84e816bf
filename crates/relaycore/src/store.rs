use crate::{NodeError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameter overrides applied to one iteration of a batch flow run
pub type ParamSet = HashMap<String, Value>;

/// The mutable key/value context threaded through a flow run.
///
/// Created by the caller before `run`, passed by reference to every node
/// lifecycle call, and inspected by the caller afterwards. The engine
/// enforces no key namespacing; collisions between nodes are the caller's
/// responsibility. Only `post_process` receives a mutable reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SharedStore {
    entries: HashMap<String, Value>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Get a value or fail with a `MissingKey` error
    pub fn require(&self, key: &str) -> Result<&Value, NodeError> {
        self.entries
            .get(key)
            .ok_or_else(|| NodeError::MissingKey(key.to_string()))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Overlay a parameter set onto the store, overwriting existing keys
    pub fn merge(&mut self, params: &ParamSet) {
        for (key, value) in params {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<HashMap<String, Value>> for SharedStore {
    fn from(entries: HashMap<String, Value>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_reports_missing_keys() {
        let mut store = SharedStore::new();
        store.insert("present", "yes");
        assert_eq!(store.require("present").unwrap().as_str(), Some("yes"));
        assert!(matches!(
            store.require("absent"),
            Err(NodeError::MissingKey(k)) if k == "absent"
        ));
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut store = SharedStore::new();
        store.insert("a", 1i64);
        store.insert("b", 2i64);

        let mut params = ParamSet::new();
        params.insert("b".to_string(), Value::from(20i64));
        params.insert("c".to_string(), Value::from(30i64));
        store.merge(&params);

        assert_eq!(store.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(store.get("b"), Some(&Value::Number(20.0)));
        assert_eq!(store.get("c"), Some(&Value::Number(30.0)));
    }
}
