use async_trait::async_trait;
use relaycore::{
    BatchNode, Node, NodeError, NodeSpec, RetryPolicy, RoutedNode, SharedStore, Value,
};
use relayruntime::{FactoryMetadata, NodeFactory};
use std::sync::Arc;

/// Opaque LLM collaborator: one prompt in, one completion out, fallible.
///
/// Implementations must not retry internally. The calling node's
/// `RetryPolicy` is the only retry layer, so an implementation that
/// retries on its own would multiply attempts.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn call(&self, prompt: &str) -> Result<String, NodeError>;
}

/// `LlmClient` backed by an OpenAI-style chat completions endpoint
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn call(&self, prompt: &str) -> Result<String, NodeError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("llm request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::ExecutionFailed(format!(
                "llm request returned {status}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("llm response unreadable: {e}")))?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                NodeError::ExecutionFailed("llm response missing message content".to_string())
            })
    }
}

/// Calls the LLM once per run with a prompt read from the store.
///
/// Reads the prompt in `prepare`, makes exactly one client call per
/// execute attempt, and writes the completion in `post_process`.
pub struct LlmNode {
    client: Arc<dyn LlmClient>,
    prompt_key: String,
    output_key: String,
    action: Option<String>,
    retry: RetryPolicy,
}

impl LlmNode {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            prompt_key: "prompt".to_string(),
            output_key: "llm_response".to_string(),
            action: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_prompt_key(mut self, key: impl Into<String>) -> Self {
        self.prompt_key = key.into();
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
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
impl Node for LlmNode {
    fn name(&self) -> &str {
        "llm.call"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn prepare(&self, store: &SharedStore) -> Result<Value, NodeError> {
        let prompt = store
            .require(&self.prompt_key)?
            .as_str()
            .ok_or_else(|| NodeError::InvalidType {
                field: self.prompt_key.clone(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })?;
        Ok(Value::String(prompt.to_string()))
    }

    async fn execute(&self, input: Value) -> Result<Value, NodeError> {
        let prompt = input.as_str().ok_or_else(|| NodeError::InvalidType {
            field: "prompt".to_string(),
            expected: "string".to_string(),
            actual: "other".to_string(),
        })?;
        self.client.call(prompt).await.map(Value::String)
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

/// Fans one LLM call out per prompt in a store-held array
pub struct LlmBatchNode {
    client: Arc<dyn LlmClient>,
    prompts_key: String,
    output_key: String,
    action: Option<String>,
    retry: RetryPolicy,
}

impl LlmBatchNode {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            prompts_key: "prompts".to_string(),
            output_key: "llm_responses".to_string(),
            action: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_prompts_key(mut self, key: impl Into<String>) -> Self {
        self.prompts_key = key.into();
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
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
impl BatchNode for LlmBatchNode {
    fn name(&self) -> &str {
        "llm.map"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn prepare(&self, store: &SharedStore) -> Result<Vec<Value>, NodeError> {
        let prompts = store
            .require(&self.prompts_key)?
            .as_array()
            .ok_or_else(|| NodeError::InvalidType {
                field: self.prompts_key.clone(),
                expected: "array".to_string(),
                actual: "other".to_string(),
            })?;
        Ok(prompts.to_vec())
    }

    async fn execute_item(&self, item: Value) -> Result<Value, NodeError> {
        let prompt = item.as_str().ok_or_else(|| NodeError::InvalidType {
            field: self.prompts_key.clone(),
            expected: "string".to_string(),
            actual: "other".to_string(),
        })?;
        self.client.call(prompt).await.map(Value::String)
    }

    async fn post_process(
        &self,
        store: &mut SharedStore,
        _items: Vec<Value>,
        results: Vec<Value>,
    ) -> Result<Option<String>, NodeError> {
        store.insert(self.output_key.as_str(), Value::Array(results));
        Ok(self.action.clone())
    }
}

pub struct LlmNodeFactory {
    client: Arc<dyn LlmClient>,
}

impl LlmNodeFactory {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl NodeFactory for LlmNodeFactory {
    fn node_type(&self) -> &str {
        "llm.call"
    }

    fn create(&self, spec: &NodeSpec) -> Result<RoutedNode, NodeError> {
        let mut node = LlmNode::new(self.client.clone());
        if let Some(key) = spec.config.get("prompt_key").and_then(Value::as_str) {
            node = node.with_prompt_key(key);
        }
        if let Some(key) = spec.config.get("output_key").and_then(Value::as_str) {
            node = node.with_output_key(key);
        }
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
            description: "Call the LLM with a prompt from the store".to_string(),
            category: "llm".to_string(),
        }
    }
}

pub struct LlmBatchNodeFactory {
    client: Arc<dyn LlmClient>,
}

impl LlmBatchNodeFactory {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl NodeFactory for LlmBatchNodeFactory {
    fn node_type(&self) -> &str {
        "llm.map"
    }

    fn create(&self, spec: &NodeSpec) -> Result<RoutedNode, NodeError> {
        let mut node = LlmBatchNode::new(self.client.clone());
        if let Some(key) = spec.config.get("prompts_key").and_then(Value::as_str) {
            node = node.with_prompts_key(key);
        }
        if let Some(key) = spec.config.get("output_key").and_then(Value::as_str) {
            node = node.with_output_key(key);
        }
        if let Some(action) = spec.config.get("action").and_then(Value::as_str) {
            node = node.with_action(action);
        }
        if let Some(retry) = spec.retry {
            node = node.with_retry(retry);
        }
        Ok(RoutedNode::Batch {
            node: Arc::new(node),
            mode: spec.batch.unwrap_or_default(),
        })
    }

    fn metadata(&self) -> FactoryMetadata {
        FactoryMetadata {
            description: "Call the LLM once per prompt in an array".to_string(),
            category: "llm".to_string(),
        }
    }
}
