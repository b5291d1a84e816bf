use async_trait::async_trait;
use relaycore::{Node, NodeError, NodeSpec, RoutedNode, Value};
use relayruntime::{FactoryMetadata, NodeFactory};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Pauses the flow for a fixed duration, passing its input through
pub struct DelayNode {
    delay: Duration,
    action: Option<String>,
}

impl DelayNode {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

#[async_trait]
impl Node for DelayNode {
    fn name(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, input: Value) -> Result<Value, NodeError> {
        tracing::debug!(delay_ms = self.delay.as_millis() as u64, "delaying");
        sleep(self.delay).await;
        Ok(input)
    }

    async fn post_process(
        &self,
        _store: &mut relaycore::SharedStore,
        _prepared: Value,
        _result: Value,
    ) -> Result<Option<String>, NodeError> {
        Ok(self.action.clone())
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn create(&self, spec: &NodeSpec) -> Result<RoutedNode, NodeError> {
        let delay_ms = spec
            .config
            .get("delay_ms")
            .and_then(Value::as_f64)
            .unwrap_or(1000.0) as u64;
        let mut node = DelayNode::new(Duration::from_millis(delay_ms));
        if let Some(action) = spec.config.get("action").and_then(Value::as_str) {
            node = node.with_action(action);
        }
        Ok(RoutedNode::Single(Arc::new(node)))
    }

    fn metadata(&self) -> FactoryMetadata {
        FactoryMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
