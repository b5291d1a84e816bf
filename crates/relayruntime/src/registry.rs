use relaycore::{Flow, FlowError, FlowSpec, NodeError, NodeSpec, RoutedNode};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for building node instances from a declarative spec
pub trait NodeFactory: Send + Sync {
    /// Type identifier matched against `NodeSpec::node_type`
    fn node_type(&self) -> &str;

    /// Build a node from the spec. Factories for batch-capable nodes
    /// read `spec.batch` for the execution mode; plain factories ignore
    /// it.
    fn create(&self, spec: &NodeSpec) -> Result<RoutedNode, NodeError>;

    fn metadata(&self) -> FactoryMetadata {
        FactoryMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone, Default)]
pub struct FactoryMetadata {
    pub description: String,
    pub category: String,
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    pub fn create_node(&self, spec: &NodeSpec) -> Result<RoutedNode, FlowError> {
        let factory = self
            .factories
            .get(&spec.node_type)
            .ok_or_else(|| FlowError::UnknownNodeType(spec.node_type.clone()))?;
        factory.create(spec).map_err(FlowError::Node)
    }

    /// Instantiate and validate a full flow from its declarative form
    pub fn instantiate(&self, spec: &FlowSpec) -> Result<Flow, FlowError> {
        let mut flow = Flow::new(spec.name.as_str()).start(spec.start.as_str());
        for node_spec in &spec.nodes {
            let routed = self.create_node(node_spec)?;
            flow = flow.routed_node(node_spec.id.as_str(), routed);
        }
        for route in &spec.routes {
            flow = flow.route(
                route.from.as_str(),
                route.action.as_str(),
                route.to.as_str(),
            );
        }
        flow.validate()?;
        Ok(flow)
    }

    pub fn list_node_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<FactoryMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
