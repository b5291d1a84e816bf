use crate::{BatchMode, BatchNode, FlowError, Node, ParamSet, RetryPolicy};
use petgraph::graph::DiGraph;
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Reserved action name for the unconditional route taken when the
/// returned action has no exact edge of its own.
pub const DEFAULT_ACTION: &str = "default";

/// A node as wired into a flow: either a plain node or a batch node with
/// its execution mode. The driver dispatches on this, nothing else.
#[derive(Clone)]
pub enum RoutedNode {
    Single(Arc<dyn Node>),
    Batch {
        node: Arc<dyn BatchNode>,
        mode: BatchMode,
    },
}

impl std::fmt::Debug for RoutedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutedNode::Single(node) => {
                f.debug_tuple("Single").field(&node.name()).finish()
            }
            RoutedNode::Batch { node, mode } => f
                .debug_struct("Batch")
                .field("node", &node.name())
                .field("mode", mode)
                .finish(),
        }
    }
}

impl RoutedNode {
    pub fn name(&self) -> &str {
        match self {
            RoutedNode::Single(node) => node.name(),
            RoutedNode::Batch { node, .. } => node.name(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            RoutedNode::Single(node) => node.retry_policy(),
            RoutedNode::Batch { node, .. } => node.retry_policy(),
        }
    }
}

/// A directed graph of nodes with action-based routing.
///
/// The flow owns its route table but only borrows the nodes (`Arc`), so
/// a node instance may be shared across flows. Traversal starts at the
/// start node and follows `(node id, action)` edges until a node returns
/// no action or the action has no matching edge. Both cases are normal
/// termination, not errors. Cycles and self-loops are legal; the engine
/// performs no cycle detection, so eventual termination is the caller's
/// responsibility.
#[derive(Clone, Default)]
pub struct Flow {
    name: String,
    start: Option<String>,
    nodes: HashMap<String, RoutedNode>,
    routes: HashMap<(String, String), String>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a node under an explicit id
    pub fn node(mut self, id: impl Into<String>, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(id.into(), RoutedNode::Single(node));
        self
    }

    /// Add a batch node under an explicit id
    pub fn batch_node(
        mut self,
        id: impl Into<String>,
        node: Arc<dyn BatchNode>,
        mode: BatchMode,
    ) -> Self {
        self.nodes
            .insert(id.into(), RoutedNode::Batch { node, mode });
        self
    }

    /// Add an already-wrapped node, as produced by a registry factory
    pub fn routed_node(mut self, id: impl Into<String>, node: RoutedNode) -> Self {
        self.nodes.insert(id.into(), node);
        self
    }

    /// Add a node under an engine-assigned id, returning the id
    pub fn add_node(&mut self, node: Arc<dyn Node>) -> String {
        let id = format!("{}-{}", node.name(), Uuid::new_v4());
        self.nodes.insert(id.clone(), RoutedNode::Single(node));
        id
    }

    /// Set the entry point of the flow
    pub fn start(mut self, id: impl Into<String>) -> Self {
        self.start = Some(id.into());
        self
    }

    /// Wire a named transition `(from, action) -> to`
    pub fn route(
        mut self,
        from: impl Into<String>,
        action: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.routes.insert((from.into(), action.into()), to.into());
        self
    }

    /// Wire the unconditional route taken when no exact action matches
    pub fn route_default(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.route(from, DEFAULT_ACTION, to)
    }

    pub fn start_id(&self) -> Option<&str> {
        self.start.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&RoutedNode> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Resolve the next node for an action: the exact edge first, then
    /// the default edge. `None` means the flow terminates here.
    pub fn next_node(&self, from: &str, action: &str) -> Option<&str> {
        self.routes
            .get(&(from.to_string(), action.to_string()))
            .or_else(|| self.routes.get(&(from.to_string(), DEFAULT_ACTION.to_string())))
            .map(String::as_str)
    }

    /// Fail fast on structural misuse: a missing or unknown start node,
    /// routes naming unknown nodes, or degenerate retry/concurrency
    /// settings. Nodes unreachable from the start are legal but logged.
    pub fn validate(&self) -> Result<(), FlowError> {
        let start = self
            .start
            .as_deref()
            .ok_or_else(|| FlowError::Invalid(format!("flow '{}' has no start node", self.name)))?;
        if !self.nodes.contains_key(start) {
            return Err(FlowError::Invalid(format!(
                "flow '{}' start node '{}' is not defined",
                self.name, start
            )));
        }

        for ((from, action), to) in &self.routes {
            if !self.nodes.contains_key(from) {
                return Err(FlowError::Invalid(format!(
                    "route ({from}, {action}) starts at unknown node '{from}'"
                )));
            }
            if !self.nodes.contains_key(to) {
                return Err(FlowError::Invalid(format!(
                    "route ({from}, {action}) targets unknown node '{to}'"
                )));
            }
        }

        for (id, node) in &self.nodes {
            let policy = node.retry_policy();
            if policy.max_attempts == 0 {
                return Err(FlowError::Invalid(format!(
                    "node '{id}' has max_attempts = 0; at least one attempt is required"
                )));
            }
            if let RoutedNode::Batch {
                mode: BatchMode::Concurrent { max_in_flight },
                ..
            } = node
            {
                if *max_in_flight == 0 {
                    return Err(FlowError::Invalid(format!(
                        "batch node '{id}' has max_in_flight = 0"
                    )));
                }
            }
        }

        self.warn_unreachable(start);
        Ok(())
    }

    /// Reachability diagnostic over the route graph. Unreachable nodes
    /// are not an error (a flow may be wired incrementally), so this
    /// only warns.
    fn warn_unreachable(&self, start: &str) {
        let mut graph = DiGraph::<&str, ()>::new();
        let mut indices = HashMap::new();
        for id in self.node_ids() {
            indices.insert(id, graph.add_node(id));
        }
        for ((from, _), to) in &self.routes {
            graph.add_edge(indices[from.as_str()], indices[to.as_str()], ());
        }

        let mut reached = std::collections::HashSet::new();
        let mut dfs = Dfs::new(&graph, indices[start]);
        while let Some(idx) = dfs.next(&graph) {
            reached.insert(graph[idx]);
        }

        for id in self.node_ids() {
            if !reached.contains(id) {
                tracing::warn!(flow = %self.name, node = %id, "node is unreachable from the start node");
            }
        }
    }
}

/// Declarative, serializable form of a flow, instantiated against a node
/// registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSpec {
    pub name: String,
    pub start: String,
    pub nodes: Vec<NodeSpec>,
    pub routes: Vec<RouteSpec>,
}

impl FlowSpec {
    pub fn new(name: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: start.into(),
            nodes: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_route(
        mut self,
        from: impl Into<String>,
        action: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.routes.push(RouteSpec {
            from: from.into(),
            action: action.into(),
            to: to.into(),
        });
        self
    }
}

/// One node entry in a `FlowSpec`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub node_type: String,
    #[serde(default)]
    pub config: ParamSet,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub batch: Option<BatchMode>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: ParamSet::new(),
            retry: None,
            batch: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_batch(mut self, mode: BatchMode) -> Self {
        self.batch = Some(mode);
        self
    }
}

/// One transition entry in a `FlowSpec`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    pub from: String,
    pub action: String,
    pub to: String,
}
