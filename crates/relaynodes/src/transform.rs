use async_trait::async_trait;
use relaycore::{Node, NodeError, NodeSpec, RetryPolicy, RoutedNode, SharedStore, Value};
use relayruntime::{FactoryMetadata, NodeFactory};
use std::sync::Arc;

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Json(j) => j.to_string(),
        other => format!("{other:?}"),
    }
}

/// Renders `{key}` placeholders from store values into a string
pub struct TemplateNode {
    template: String,
    output_key: String,
    action: Option<String>,
}

impl TemplateNode {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            output_key: "rendered".to_string(),
            action: None,
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

#[async_trait]
impl Node for TemplateNode {
    fn name(&self) -> &str {
        "template.render"
    }

    async fn prepare(&self, store: &SharedStore) -> Result<Value, NodeError> {
        let mut rendered = self.template.clone();
        for (key, value) in store.iter() {
            let placeholder = format!("{{{key}}}");
            if rendered.contains(&placeholder) {
                rendered = rendered.replace(&placeholder, &display_value(value));
            }
        }
        Ok(Value::String(rendered))
    }

    async fn post_process(
        &self,
        store: &mut SharedStore,
        _prepared: Value,
        result: Value,
    ) -> Result<Option<String>, NodeError> {
        store.insert(self.output_key.as_str(), result);
        Ok(self.action.clone())
    }
}

/// Parses a JSON string from the store into a structured value
pub struct JsonParseNode {
    input_key: String,
    output_key: String,
    action: Option<String>,
    retry: RetryPolicy,
}

impl JsonParseNode {
    pub fn new(input_key: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            input_key: input_key.into(),
            output_key: output_key.into(),
            action: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Node for JsonParseNode {
    fn name(&self) -> &str {
        "json.parse"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn prepare(&self, store: &SharedStore) -> Result<Value, NodeError> {
        let raw = store
            .require(&self.input_key)?
            .as_str()
            .ok_or_else(|| NodeError::InvalidType {
                field: self.input_key.clone(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })?;
        Ok(Value::String(raw.to_string()))
    }

    async fn execute(&self, input: Value) -> Result<Value, NodeError> {
        let raw = input.as_str().ok_or_else(|| NodeError::InvalidType {
            field: self.input_key.clone(),
            expected: "string".to_string(),
            actual: "other".to_string(),
        })?;
        let parsed: serde_json::Value = serde_json::from_str(raw)?;
        Ok(Value::Json(parsed))
    }

    async fn post_process(
        &self,
        store: &mut SharedStore,
        _prepared: Value,
        result: Value,
    ) -> Result<Option<String>, NodeError> {
        store.insert(self.output_key.as_str(), result);
        Ok(self.action.clone())
    }
}

pub struct TemplateNodeFactory;

impl NodeFactory for TemplateNodeFactory {
    fn node_type(&self) -> &str {
        "template.render"
    }

    fn create(&self, spec: &NodeSpec) -> Result<RoutedNode, NodeError> {
        let template = spec
            .config
            .get("template")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                NodeError::Configuration("template.render requires a 'template' string".to_string())
            })?;
        let mut node = TemplateNode::new(template);
        if let Some(key) = spec.config.get("output_key").and_then(Value::as_str) {
            node = node.with_output_key(key);
        }
        if let Some(action) = spec.config.get("action").and_then(Value::as_str) {
            node = node.with_action(action);
        }
        Ok(RoutedNode::Single(Arc::new(node)))
    }

    fn metadata(&self) -> FactoryMetadata {
        FactoryMetadata {
            description: "Render {key} placeholders from the store".to_string(),
            category: "transform".to_string(),
        }
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn node_type(&self) -> &str {
        "json.parse"
    }

    fn create(&self, spec: &NodeSpec) -> Result<RoutedNode, NodeError> {
        let input_key = spec
            .config
            .get("input_key")
            .and_then(Value::as_str)
            .unwrap_or("json");
        let output_key = spec
            .config
            .get("output_key")
            .and_then(Value::as_str)
            .unwrap_or("parsed");
        let mut node = JsonParseNode::new(input_key, output_key);
        if let Some(action) = spec.config.get("action").and_then(Value::as_str) {
            node = node.with_action(action);
        }
        if let Some(retry) = spec.retry {
            node = node.with_retry(retry);
        }
        Ok(RoutedNode::Single(Arc::new(node)))
    }

    fn metadata(&self) -> FactoryMetadata {
        FactoryMetadata {
            description: "Parse a JSON string from the store".to_string(),
            category: "transform".to_string(),
        }
    }
}
