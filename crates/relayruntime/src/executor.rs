use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use relaycore::{
    BatchMode, BatchNode, EventBus, ExecutionEvent, ExecutionId, Flow, FlowError, Node, NodeError,
    RetryPolicy, RoutedNode, SharedStore, Value,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;

/// Drives one flow run: resolves the current node, runs its lifecycle
/// (with the node's retry/fallback policy wrapped around `execute`),
/// routes on the returned action, and repeats until a node returns no
/// action or the action has no edge.
///
/// Node-to-node progression is strictly sequential; only a batch node's
/// items ever run concurrently, and those never touch the store.
pub struct FlowExecutor {
    event_bus: Option<Arc<EventBus>>,
}

impl FlowExecutor {
    pub fn new() -> Self {
        Self { event_bus: None }
    }

    pub fn with_event_bus(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus: Some(event_bus),
        }
    }

    pub(crate) fn emit(&self, event: ExecutionEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }

    /// Execute the flow against the given store.
    ///
    /// Errors from an exhausted node propagate out unchanged; the
    /// executor performs no flow-level recovery. The store is left in
    /// whatever state the completed nodes produced, so the caller can
    /// inspect partial progress after a failure.
    pub async fn execute(
        &self,
        flow: &Flow,
        store: &mut SharedStore,
    ) -> Result<FlowOutcome, FlowError> {
        flow.validate()?;
        let execution_id = ExecutionId::new_v4();
        let started = Instant::now();
        tracing::info!(flow = %flow.name(), %execution_id, "starting flow run");
        self.emit(ExecutionEvent::FlowStarted {
            execution_id,
            flow: flow.name().to_string(),
            timestamp: Utc::now(),
        });

        let mut outcome = FlowOutcome {
            execution_id,
            flow: flow.name().to_string(),
            steps: 0,
            final_action: None,
            records: Vec::new(),
        };
        let result = self.drive(flow, store, &mut outcome).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.emit(ExecutionEvent::FlowCompleted {
            execution_id,
            flow: flow.name().to_string(),
            success: result.is_ok(),
            steps: outcome.steps,
            duration_ms,
            timestamp: Utc::now(),
        });

        match result {
            Ok(()) => {
                tracing::info!(
                    flow = %flow.name(),
                    steps = outcome.steps,
                    duration_ms,
                    "flow run completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(flow = %flow.name(), error = %e, "flow run failed");
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        flow: &Flow,
        store: &mut SharedStore,
        outcome: &mut FlowOutcome,
    ) -> Result<(), FlowError> {
        let mut current = flow
            .start_id()
            .ok_or_else(|| FlowError::Invalid(format!("flow '{}' has no start node", flow.name())))?
            .to_string();

        loop {
            let routed = flow.get(&current).ok_or_else(|| {
                FlowError::Invalid(format!("node '{current}' is not defined in flow"))
            })?;
            tracing::debug!(node = %current, node_type = %routed.name(), step = outcome.steps, "visiting node");

            let (result, record) = match routed {
                RoutedNode::Single(node) => {
                    self.run_single(&current, node.as_ref(), store, outcome.execution_id)
                        .await
                }
                RoutedNode::Batch { node, mode } => {
                    self.run_batch(&current, node.as_ref(), *mode, store, outcome.execution_id)
                        .await
                }
            };
            outcome.steps += 1;
            outcome.records.push(record);
            let action = result?;

            let Some(action) = action else {
                // Terminal sentinel: the node asked to stop.
                outcome.final_action = None;
                return Ok(());
            };
            match flow.next_node(&current, &action) {
                Some(next) => {
                    outcome.final_action = Some(action);
                    current = next.to_string();
                }
                None => {
                    // Dead end: no exact edge, no default edge. Lenient
                    // termination, not an error.
                    tracing::debug!(node = %current, action = %action, "no route for action, terminating");
                    outcome.final_action = Some(action);
                    return Ok(());
                }
            }
        }
    }

    async fn run_single(
        &self,
        id: &str,
        node: &dyn Node,
        store: &mut SharedStore,
        execution_id: ExecutionId,
    ) -> (Result<Option<String>, FlowError>, NodeRecord) {
        let started = Instant::now();
        self.emit(ExecutionEvent::NodeStarted {
            execution_id,
            node: id.to_string(),
            timestamp: Utc::now(),
        });

        let mut attempts = 0u32;
        let result = self
            .run_single_inner(id, node, store, execution_id, &mut attempts)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Ok(action) = &result {
            tracing::info!(node = %id, attempts, duration_ms, action = ?action, "node completed");
            self.emit(ExecutionEvent::NodeCompleted {
                execution_id,
                node: id.to_string(),
                action: action.clone(),
                attempts,
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        let record = NodeRecord {
            node: id.to_string(),
            attempts,
            items: None,
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
            duration_ms,
            timestamp: Utc::now(),
        };
        (result, record)
    }

    async fn run_single_inner(
        &self,
        id: &str,
        node: &dyn Node,
        store: &mut SharedStore,
        execution_id: ExecutionId,
        attempts: &mut u32,
    ) -> Result<Option<String>, FlowError> {
        let policy = node.retry_policy();
        let prepared = node
            .prepare(store)
            .await
            .map_err(|e| self.node_failure(id, 0, e, execution_id))?;

        let result = match self
            .execute_with_retry(id, node, &policy, &prepared, execution_id, attempts)
            .await
        {
            Ok(value) => value,
            Err(last) => {
                let last_text = last.to_string();
                match node.execute_fallback(prepared.clone(), last).await {
                    Ok(value) => {
                        tracing::warn!(node = %id, attempts = *attempts, error = %last_text, "all attempts failed, fallback succeeded");
                        self.emit(ExecutionEvent::NodeFellBack {
                            execution_id,
                            node: id.to_string(),
                            attempts: *attempts,
                            error: last_text,
                            timestamp: Utc::now(),
                        });
                        value
                    }
                    Err(fallback_err) => {
                        return Err(self.node_failure(id, *attempts, fallback_err, execution_id))
                    }
                }
            }
        };

        node.post_process(store, prepared, result)
            .await
            .map_err(|e| self.node_failure(id, *attempts, e, execution_id))
    }

    /// Bounded attempt loop around `execute`. Returns the error from the
    /// last attempt once the budget is spent; the caller decides whether
    /// a fallback absorbs it.
    async fn execute_with_retry(
        &self,
        id: &str,
        node: &dyn Node,
        policy: &RetryPolicy,
        prepared: &Value,
        execution_id: ExecutionId,
        attempts: &mut u32,
    ) -> Result<Value, NodeError> {
        loop {
            *attempts += 1;
            match node.execute(prepared.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if *attempts >= policy.max_attempts {
                        return Err(e);
                    }
                    tracing::warn!(node = %id, attempt = *attempts, error = %e, "execute failed, retrying");
                    self.emit(ExecutionEvent::NodeRetrying {
                        execution_id,
                        node: id.to_string(),
                        attempt: *attempts,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    let delay = policy.delay_before(*attempts + 1);
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn run_batch(
        &self,
        id: &str,
        node: &dyn BatchNode,
        mode: BatchMode,
        store: &mut SharedStore,
        execution_id: ExecutionId,
    ) -> (Result<Option<String>, FlowError>, NodeRecord) {
        let started = Instant::now();
        self.emit(ExecutionEvent::NodeStarted {
            execution_id,
            node: id.to_string(),
            timestamp: Utc::now(),
        });

        let mut item_count = None;
        let result = self
            .run_batch_inner(id, node, mode, store, execution_id, &mut item_count)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Ok(action) = &result {
            tracing::info!(node = %id, items = ?item_count, duration_ms, action = ?action, "batch node completed");
            self.emit(ExecutionEvent::NodeCompleted {
                execution_id,
                node: id.to_string(),
                action: action.clone(),
                attempts: 1,
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        let record = NodeRecord {
            node: id.to_string(),
            attempts: 1,
            items: item_count,
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
            duration_ms,
            timestamp: Utc::now(),
        };
        (result, record)
    }

    async fn run_batch_inner(
        &self,
        id: &str,
        node: &dyn BatchNode,
        mode: BatchMode,
        store: &mut SharedStore,
        execution_id: ExecutionId,
        item_count: &mut Option<usize>,
    ) -> Result<Option<String>, FlowError> {
        let policy = node.retry_policy();
        let items = node
            .prepare(store)
            .await
            .map_err(|e| self.node_failure(id, 0, e, execution_id))?;
        *item_count = Some(items.len());

        let results = match mode {
            BatchMode::Sequential => {
                let mut results = Vec::with_capacity(items.len());
                for (index, item) in items.iter().cloned().enumerate() {
                    let value = self
                        .run_batch_item(id, node, &policy, index, item, execution_id)
                        .await
                        .map_err(|f| self.node_failure(id, f.attempts, f.error, execution_id))?;
                    results.push(value);
                }
                results
            }
            BatchMode::Concurrent { max_in_flight } => {
                // `buffered` keeps results in input order no matter which
                // item finishes first, and fails fast on the first item
                // whose fallback is also exhausted.
                stream::iter(items.iter().cloned().enumerate())
                    .map(|(index, item)| {
                        self.run_batch_item(id, node, &policy, index, item, execution_id)
                    })
                    .buffered(max_in_flight)
                    .try_collect::<Vec<Value>>()
                    .await
                    .map_err(|f| self.node_failure(id, f.attempts, f.error, execution_id))?
            }
        };

        node.post_process(store, items, results)
            .await
            .map_err(|e| self.node_failure(id, 1, e, execution_id))
    }

    /// Retry/fallback loop for one batch item, isolated from its
    /// siblings.
    async fn run_batch_item(
        &self,
        id: &str,
        node: &dyn BatchNode,
        policy: &RetryPolicy,
        index: usize,
        item: Value,
        execution_id: ExecutionId,
    ) -> Result<Value, ItemFailure> {
        let mut attempt = 0u32;
        let last = loop {
            attempt += 1;
            match node.execute_item(item.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= policy.max_attempts {
                        break e;
                    }
                    tracing::warn!(node = %id, item = index, attempt, error = %e, "item execute failed, retrying");
                    self.emit(ExecutionEvent::NodeRetrying {
                        execution_id,
                        node: id.to_string(),
                        attempt,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    let delay = policy.delay_before(attempt + 1);
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        };

        let last_text = last.to_string();
        match node.execute_item_fallback(item, last).await {
            Ok(value) => {
                tracing::warn!(node = %id, item = index, attempts = attempt, "item fell back");
                self.emit(ExecutionEvent::NodeFellBack {
                    execution_id,
                    node: id.to_string(),
                    attempts: attempt,
                    error: last_text,
                    timestamp: Utc::now(),
                });
                Ok(value)
            }
            Err(fallback_err) => Err(ItemFailure {
                attempts: attempt,
                error: fallback_err,
            }),
        }
    }

    fn node_failure(
        &self,
        id: &str,
        attempts: u32,
        error: NodeError,
        execution_id: ExecutionId,
    ) -> FlowError {
        tracing::error!(node = %id, attempts, error = %error, "node failed");
        self.emit(ExecutionEvent::NodeFailed {
            execution_id,
            node: id.to_string(),
            attempts,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        FlowError::NodeFailed {
            node: id.to_string(),
            attempts,
            source: error,
        }
    }
}

impl Default for FlowExecutor {
    fn default() -> Self {
        Self::new()
    }
}

struct ItemFailure {
    attempts: u32,
    error: NodeError,
}

/// Result of one flow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowOutcome {
    pub execution_id: ExecutionId,
    pub flow: String,
    /// Number of node invocations, including the failed one if any
    pub steps: usize,
    /// The last action returned before termination; `None` when the
    /// final node returned the terminal sentinel
    pub final_action: Option<String>,
    pub records: Vec<NodeRecord>,
}

/// Per-node-invocation instrumentation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: String,
    pub attempts: u32,
    /// Item count for batch nodes, `None` for plain nodes
    pub items: Option<usize>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}
