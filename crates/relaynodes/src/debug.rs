use async_trait::async_trait;
use relaycore::{Node, NodeError, NodeSpec, RoutedNode, SharedStore, Value};
use relayruntime::{FactoryMetadata, NodeFactory};
use std::sync::Arc;

/// Logs a store value for visibility, without touching the store
pub struct LogNode {
    key: Option<String>,
    action: Option<String>,
}

impl LogNode {
    pub fn new() -> Self {
        Self {
            key: None,
            action: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

impl Default for LogNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for LogNode {
    fn name(&self) -> &str {
        "debug.log"
    }

    async fn prepare(&self, store: &SharedStore) -> Result<Value, NodeError> {
        Ok(match &self.key {
            Some(key) => store.get(key).cloned().unwrap_or(Value::Null),
            None => Value::Null,
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, NodeError> {
        match &self.key {
            Some(key) => tracing::info!(key = %key, value = ?input, "debug.log"),
            None => tracing::info!("debug.log"),
        }
        Ok(input)
    }

    async fn post_process(
        &self,
        _store: &mut SharedStore,
        _prepared: Value,
        _result: Value,
    ) -> Result<Option<String>, NodeError> {
        Ok(self.action.clone())
    }
}

pub struct LogNodeFactory;

impl NodeFactory for LogNodeFactory {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn create(&self, spec: &NodeSpec) -> Result<RoutedNode, NodeError> {
        let mut node = LogNode::new();
        if let Some(key) = spec.config.get("key").and_then(Value::as_str) {
            node = node.with_key(key);
        }
        if let Some(action) = spec.config.get("action").and_then(Value::as_str) {
            node = node.with_action(action);
        }
        Ok(RoutedNode::Single(Arc::new(node)))
    }

    fn metadata(&self) -> FactoryMetadata {
        FactoryMetadata {
            description: "Log a store value for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
