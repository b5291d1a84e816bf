use crate::{NodeError, SharedStore, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration for a node's execute phase.
///
/// `max_attempts` counts total calls to `execute`, so the default of 1
/// means "no retry". The delay is applied between attempts, never before
/// the first one, and is scaled by `backoff_multiplier` on each
/// subsequent attempt (1.0 keeps it fixed).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_backoff(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay to wait before the given attempt (attempts are 1-based; the
    /// first attempt never waits).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.delay_ms == 0 {
            return Duration::ZERO;
        }
        let scaled =
            self.delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 2);
        Duration::from_millis(scaled as u64)
    }
}

/// How a batch node's items are executed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BatchMode {
    /// Items run strictly in input order, one at a time
    Sequential,
    /// Up to `max_in_flight` items run concurrently; results are still
    /// collected in input order regardless of completion order
    Concurrent { max_in_flight: usize },
}

impl Default for BatchMode {
    fn default() -> Self {
        BatchMode::Sequential
    }
}

/// A single unit of work with a three-phase lifecycle.
///
/// The executor invokes `prepare`, then `execute` (wrapped in the node's
/// retry/fallback policy), then `post_process`, strictly in that order.
/// `execute` never sees the store: reads happen in `prepare`, writes in
/// `post_process`. That split is what makes concurrent batch execution
/// safe without locks.
///
/// `post_process` returns `Some(action)` to select the next route, or
/// `None` to end the flow.
#[async_trait]
pub trait Node: Send + Sync {
    /// Type name used for logging and registry lookup
    fn name(&self) -> &str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Read/derive the input for `execute` from the store
    async fn prepare(&self, _store: &SharedStore) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    /// The core computation. Errors raised here feed the retry loop;
    /// do not catch them internally.
    async fn execute(&self, input: Value) -> Result<Value, NodeError> {
        Ok(input)
    }

    /// Invoked once after every attempt has failed. The default re-raises
    /// the last error, making exhaustion fatal to the flow run.
    async fn execute_fallback(
        &self,
        _input: Value,
        error: NodeError,
    ) -> Result<Value, NodeError> {
        Err(error)
    }

    /// The only phase allowed to write to the store. Returns the action
    /// selecting the next route, or `None` to terminate the flow.
    async fn post_process(
        &self,
        _store: &mut SharedStore,
        _prepared: Value,
        _result: Value,
    ) -> Result<Option<String>, NodeError> {
        Ok(None)
    }
}

/// A node whose execute phase maps over a sequence of items.
///
/// Each item runs through the node's own retry/fallback policy in
/// isolation. The first item whose retries and fallback are both
/// exhausted fails the whole batch; `execute_item_fallback` is the
/// per-item escape hatch. `post_process` receives the full `items` and
/// `results` vectors aligned by index.
#[async_trait]
pub trait BatchNode: Send + Sync {
    fn name(&self) -> &str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Produce the item sequence. An empty sequence is valid and
    /// short-circuits straight to `post_process`.
    async fn prepare(&self, _store: &SharedStore) -> Result<Vec<Value>, NodeError> {
        Ok(Vec::new())
    }

    async fn execute_item(&self, item: Value) -> Result<Value, NodeError> {
        Ok(item)
    }

    async fn execute_item_fallback(
        &self,
        _item: Value,
        error: NodeError,
    ) -> Result<Value, NodeError> {
        Err(error)
    }

    async fn post_process(
        &self,
        _store: &mut SharedStore,
        _items: Vec<Value>,
        _results: Vec<Value>,
    ) -> Result<Option<String>, NodeError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_before(2), Duration::ZERO);
    }

    #[test]
    fn backoff_scales_per_attempt() {
        let policy = RetryPolicy::new(4)
            .with_delay(Duration::from_millis(100))
            .with_backoff(2.0);
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }

    #[test]
    fn fixed_delay_without_backoff() {
        let policy = RetryPolicy::new(3).with_delay(Duration::from_millis(50));
        assert_eq!(policy.delay_before(2), Duration::from_millis(50));
        assert_eq!(policy.delay_before(3), Duration::from_millis(50));
    }
}
