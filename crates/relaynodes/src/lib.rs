//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod debug;
mod llm;
mod time;
mod transform;

pub use debug::LogNode;
pub use llm::{HttpLlmClient, LlmBatchNode, LlmClient, LlmNode};
pub use time::DelayNode;
pub use transform::{JsonParseNode, TemplateNode};

use llm::{LlmBatchNodeFactory, LlmNodeFactory};
use relayruntime::NodeRegistry;
use std::sync::Arc;

/// Register the client-free standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(debug::LogNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::TemplateNodeFactory));
}

/// Register the LLM nodes, which need a client injected
pub fn register_llm(registry: &mut NodeRegistry, client: Arc<dyn LlmClient>) {
    registry.register(Arc::new(LlmNodeFactory::new(client.clone())));
    registry.register(Arc::new(LlmBatchNodeFactory::new(client)));
}
