use crate::{
    BatchFlowExecutor, BatchPlanner, BatchReport, FlowExecutor, FlowOutcome, NodeRegistry,
};
use relaycore::{EventBus, ExecutionEvent, Flow, FlowError, FlowSpec, SharedStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Facade holding named flows, the node registry, and the event bus
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    event_bus: Arc<EventBus>,
    flows: Arc<RwLock<HashMap<String, Flow>>>,
}

impl FlowRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            flows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Register a flow under its name, validating it first
    pub async fn register_flow(&self, flow: Flow) -> Result<(), FlowError> {
        flow.validate()?;
        let mut flows = self.flows.write().await;
        flows.insert(flow.name().to_string(), flow);
        Ok(())
    }

    /// Instantiate a declarative spec against the registry and register it
    pub async fn register_spec(&self, spec: &FlowSpec) -> Result<(), FlowError> {
        let flow = self.registry.instantiate(spec)?;
        self.register_flow(flow).await
    }

    /// Run a registered flow against the given store
    pub async fn run(&self, name: &str, store: &mut SharedStore) -> Result<FlowOutcome, FlowError> {
        let flows = self.flows.read().await;
        let flow = flows
            .get(name)
            .ok_or_else(|| FlowError::NotFound(name.to_string()))?;
        FlowExecutor::with_event_bus(self.event_bus.clone())
            .execute(flow, store)
            .await
    }

    /// Run a registered flow once per planned parameter set
    pub async fn run_batch(
        &self,
        name: &str,
        planner: &dyn BatchPlanner,
        store: &mut SharedStore,
    ) -> Result<BatchReport, FlowError> {
        let flows = self.flows.read().await;
        let flow = flows
            .get(name)
            .ok_or_else(|| FlowError::NotFound(name.to_string()))?;
        BatchFlowExecutor::new(FlowExecutor::with_event_bus(self.event_bus.clone()))
            .execute(flow, planner, store)
            .await
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
        }
    }
}
