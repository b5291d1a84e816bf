use async_trait::async_trait;
use relaycore::{
    EventBus, ExecutionEvent, Flow, FlowError, Node, NodeError, RetryPolicy, SharedStore, Value,
};
use relayruntime::{FlowExecutor, FlowOutcome};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Prepares "hi", echoes it through execute, stores it under "out"
struct Echo;

#[async_trait]
impl Node for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn prepare(&self, _store: &SharedStore) -> Result<Value, NodeError> {
        Ok(Value::from("hi"))
    }

    async fn post_process(
        &self,
        store: &mut SharedStore,
        _prepared: Value,
        result: Value,
    ) -> Result<Option<String>, NodeError> {
        store.insert("out", result);
        Ok(None)
    }
}

/// Fails the first `fail_times` execute calls, then succeeds with "ok"
struct Flaky {
    fail_times: u32,
    policy: RetryPolicy,
    calls: Arc<AtomicU32>,
    fallbacks: Arc<AtomicU32>,
}

impl Flaky {
    fn new(fail_times: u32, policy: RetryPolicy) -> Self {
        Self {
            fail_times,
            policy,
            calls: Arc::new(AtomicU32::new(0)),
            fallbacks: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Node for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn execute(&self, _input: Value) -> Result<Value, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_times {
            Err(NodeError::ExecutionFailed(format!("boom {call}")))
        } else {
            Ok(Value::from("ok"))
        }
    }

    async fn execute_fallback(&self, _input: Value, error: NodeError) -> Result<Value, NodeError> {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
        Err(error)
    }

    async fn post_process(
        &self,
        store: &mut SharedStore,
        _prepared: Value,
        result: Value,
    ) -> Result<Option<String>, NodeError> {
        store.insert("result", result);
        Ok(None)
    }
}

/// Always fails execute; fallback degrades gracefully
struct Degraded;

#[async_trait]
impl Node for Degraded {
    fn name(&self) -> &str {
        "degraded"
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(2)
    }

    async fn execute(&self, _input: Value) -> Result<Value, NodeError> {
        Err(NodeError::ExecutionFailed("llm down".to_string()))
    }

    async fn execute_fallback(&self, _input: Value, _error: NodeError) -> Result<Value, NodeError> {
        Ok(Value::from("degraded"))
    }

    async fn post_process(
        &self,
        store: &mut SharedStore,
        _prepared: Value,
        result: Value,
    ) -> Result<Option<String>, NodeError> {
        store.insert("result", result);
        Ok(None)
    }
}

/// Marks its key in the store and returns a fixed action
struct Emit {
    key: &'static str,
    action: Option<&'static str>,
    visits: Arc<AtomicU32>,
}

impl Emit {
    fn new(key: &'static str, action: Option<&'static str>) -> Self {
        Self {
            key,
            action,
            visits: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Node for Emit {
    fn name(&self) -> &str {
        "emit"
    }

    async fn post_process(
        &self,
        store: &mut SharedStore,
        _prepared: Value,
        _result: Value,
    ) -> Result<Option<String>, NodeError> {
        self.visits.fetch_add(1, Ordering::SeqCst);
        store.insert(self.key, true);
        Ok(self.action.map(str::to_string))
    }
}

/// Loops on "continue" until it has run `limit` times
struct Looper {
    limit: u32,
    hops: Arc<AtomicU32>,
}

#[async_trait]
impl Node for Looper {
    fn name(&self) -> &str {
        "looper"
    }

    async fn post_process(
        &self,
        store: &mut SharedStore,
        _prepared: Value,
        _result: Value,
    ) -> Result<Option<String>, NodeError> {
        let hops = self.hops.fetch_add(1, Ordering::SeqCst) + 1;
        if hops < self.limit {
            Ok(Some("continue".to_string()))
        } else {
            store.insert("hops", hops as i64);
            Ok(None)
        }
    }
}

#[tokio::test]
async fn echo_flow_stores_prepared_value() {
    let flow = Flow::new("echo").node("echo", Arc::new(Echo)).start("echo");
    let mut store = SharedStore::new();

    let outcome = FlowExecutor::new().execute(&flow, &mut store).await.unwrap();

    assert_eq!(store.get("out"), Some(&Value::from("hi")));
    assert_eq!(outcome.steps, 1);
    assert_eq!(outcome.final_action, None);
}

#[tokio::test]
async fn retries_until_success_without_fallback() {
    init_tracing();
    let flaky = Arc::new(Flaky::new(2, RetryPolicy::new(3)));
    let calls = flaky.calls.clone();
    let fallbacks = flaky.fallbacks.clone();
    let flow = Flow::new("retry").node("flaky", flaky).start("flaky");
    let mut store = SharedStore::new();

    let started = Instant::now();
    let outcome = FlowExecutor::new().execute(&flow, &mut store).await.unwrap();

    assert_eq!(store.get("result"), Some(&Value::from("ok")));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.records[0].attempts, 3);
    // Zero retry delay must not sleep between attempts.
    assert!(started.elapsed().as_millis() < 500);
}

#[tokio::test]
async fn partial_failures_never_reach_fallback() {
    let flaky = Arc::new(Flaky::new(1, RetryPolicy::new(5)));
    let calls = flaky.calls.clone();
    let fallbacks = flaky.fallbacks.clone();
    let flow = Flow::new("retry-once").node("flaky", flaky).start("flaky");
    let mut store = SharedStore::new();

    FlowExecutor::new().execute(&flow, &mut store).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn single_attempt_failure_goes_straight_to_fallback() {
    let flaky = Arc::new(Flaky::new(u32::MAX, RetryPolicy::default()));
    let calls = flaky.calls.clone();
    let fallbacks = flaky.fallbacks.clone();
    let flow = Flow::new("no-retry").node("flaky", flaky).start("flaky");
    let mut store = SharedStore::new();

    let err = FlowExecutor::new()
        .execute(&flow, &mut store)
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
    // The original error from the last attempt survives the escalation.
    assert!(err.to_string().contains("boom 1"));
    match err {
        FlowError::NodeFailed { attempts, .. } => assert_eq!(attempts, 1),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn fallback_result_keeps_the_flow_alive() {
    let flow = Flow::new("degrade")
        .node("degraded", Arc::new(Degraded))
        .start("degraded");
    let mut store = SharedStore::new();

    let outcome = FlowExecutor::new().execute(&flow, &mut store).await;

    assert!(outcome.is_ok());
    assert_eq!(store.get("result"), Some(&Value::from("degraded")));
}

#[tokio::test]
async fn actions_route_between_nodes() {
    let a = Arc::new(Emit::new("a", Some("go")));
    let b = Arc::new(Emit::new("b", None));
    let a_visits = a.visits.clone();
    let b_visits = b.visits.clone();

    let flow = Flow::new("two-step")
        .node("a", a)
        .node("b", b)
        .start("a")
        .route("a", "go", "b");
    let mut store = SharedStore::new();

    let outcome = FlowExecutor::new().execute(&flow, &mut store).await.unwrap();

    assert_eq!(a_visits.load(Ordering::SeqCst), 1);
    assert_eq!(b_visits.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.steps, 2);
    assert_eq!(store.get("a"), Some(&Value::from(true)));
    assert_eq!(store.get("b"), Some(&Value::from(true)));
}

#[tokio::test]
async fn unmatched_action_falls_back_to_default_edge() {
    let flow = Flow::new("default-edge")
        .node("a", Arc::new(Emit::new("a", Some("unexpected"))))
        .node("b", Arc::new(Emit::new("b", None)))
        .start("a")
        .route_default("a", "b");
    let mut store = SharedStore::new();

    let outcome = FlowExecutor::new().execute(&flow, &mut store).await.unwrap();

    assert_eq!(outcome.steps, 2);
    assert_eq!(store.get("b"), Some(&Value::from(true)));
}

#[tokio::test]
async fn dead_end_action_terminates_leniently() {
    let flow = Flow::new("dead-end")
        .node("a", Arc::new(Emit::new("a", Some("nowhere"))))
        .start("a");
    let mut store = SharedStore::new();

    let outcome = FlowExecutor::new().execute(&flow, &mut store).await.unwrap();

    assert_eq!(outcome.steps, 1);
    assert_eq!(outcome.final_action, Some("nowhere".to_string()));
}

#[tokio::test]
async fn terminal_sentinel_at_start_takes_zero_transitions() {
    let flow = Flow::new("immediate")
        .node("only", Arc::new(Emit::new("only", None)))
        .node("never", Arc::new(Emit::new("never", None)))
        .start("only")
        .route("only", "go", "never");
    let mut store = SharedStore::new();

    let outcome = FlowExecutor::new().execute(&flow, &mut store).await.unwrap();

    assert_eq!(outcome.steps, 1);
    assert!(store.get("never").is_none());
}

#[tokio::test]
async fn self_loop_runs_until_the_node_stops() {
    let looper = Arc::new(Looper {
        limit: 5,
        hops: Arc::new(AtomicU32::new(0)),
    });
    let flow = Flow::new("loop")
        .node("loop", looper)
        .start("loop")
        .route("loop", "continue", "loop");
    let mut store = SharedStore::new();

    let outcome = FlowExecutor::new().execute(&flow, &mut store).await.unwrap();

    assert_eq!(outcome.steps, 5);
    assert_eq!(store.get("hops"), Some(&Value::from(5i64)));
}

#[tokio::test]
async fn identical_runs_produce_identical_stores() {
    let flow = Flow::new("deterministic")
        .node("a", Arc::new(Emit::new("a", Some("go"))))
        .node("echo", Arc::new(Echo))
        .start("a")
        .route("a", "go", "echo");

    let mut first = SharedStore::new();
    let mut second = SharedStore::new();
    let outcome_one = FlowExecutor::new().execute(&flow, &mut first).await.unwrap();
    let outcome_two = FlowExecutor::new()
        .execute(&flow, &mut second)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(outcome_one.final_action, outcome_two.final_action);
    assert_eq!(outcome_one.steps, outcome_two.steps);
}

#[tokio::test]
async fn exhausted_node_propagates_with_partial_store() {
    let flaky = Arc::new(Flaky::new(u32::MAX, RetryPolicy::new(2)));
    let flow = Flow::new("abort")
        .node("a", Arc::new(Emit::new("a", Some("go"))))
        .node("flaky", flaky)
        .start("a")
        .route("a", "go", "flaky");
    let mut store = SharedStore::new();

    let err = FlowExecutor::new()
        .execute(&flow, &mut store)
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::NodeFailed { attempts: 2, .. }));
    // Work done before the failure stays visible to the caller.
    assert_eq!(store.get("a"), Some(&Value::from(true)));
}

#[tokio::test]
async fn invalid_flow_fails_before_any_node_runs() {
    init_tracing();
    let emit = Arc::new(Emit::new("a", None));
    let visits = emit.visits.clone();
    let flow = Flow::new("no-start").node("a", emit);
    let mut store = SharedStore::new();

    let err = FlowExecutor::new()
        .execute(&flow, &mut store)
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Invalid(_)));
    assert_eq!(visits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn outcome_round_trips_through_json() {
    let flow = Flow::new("echo").node("echo", Arc::new(Echo)).start("echo");
    let mut store = SharedStore::new();
    let outcome = FlowExecutor::new().execute(&flow, &mut store).await.unwrap();

    let json = serde_json::to_string(&outcome).unwrap();
    let parsed: FlowOutcome = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.execution_id, outcome.execution_id);
    assert_eq!(parsed.flow, "echo");
    assert_eq!(parsed.steps, 1);
    assert!(parsed.records[0].success);
}

#[tokio::test]
async fn events_trace_retries_and_completion() {
    init_tracing();
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();

    let flaky = Arc::new(Flaky::new(2, RetryPolicy::new(3)));
    let flow = Flow::new("observed").node("flaky", flaky).start("flaky");
    let mut store = SharedStore::new();

    FlowExecutor::with_event_bus(bus)
        .execute(&flow, &mut store)
        .await
        .unwrap();

    let mut retries = 0;
    let mut completed_attempts = None;
    let mut flow_success = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            ExecutionEvent::NodeRetrying { .. } => retries += 1,
            ExecutionEvent::NodeCompleted { attempts, .. } => completed_attempts = Some(attempts),
            ExecutionEvent::FlowCompleted { success, .. } => flow_success = Some(success),
            _ => {}
        }
    }

    assert_eq!(retries, 2);
    assert_eq!(completed_attempts, Some(3));
    assert_eq!(flow_success, Some(true));
}
