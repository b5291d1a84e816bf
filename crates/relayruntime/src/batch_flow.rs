use crate::FlowExecutor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaycore::{ExecutionEvent, ExecutionId, Flow, FlowError, NodeError, ParamSet, SharedStore};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Produces the parameter sets for a batch flow run
#[async_trait]
pub trait BatchPlanner: Send + Sync {
    async fn plan(&self, store: &SharedStore) -> Result<Vec<ParamSet>, NodeError>;
}

/// A fixed plan: the vector itself is the iteration schedule
#[async_trait]
impl BatchPlanner for Vec<ParamSet> {
    async fn plan(&self, _store: &SharedStore) -> Result<Vec<ParamSet>, NodeError> {
        Ok(self.clone())
    }
}

/// Runs an entire flow once per parameter set, sequentially.
///
/// Each parameter set is merged into the same shared store before its
/// iteration, so later iterations observe earlier iterations' writes.
/// The store is never cloned per iteration. The default failure policy is
/// continue-and-record: a failed iteration lands in the report and the
/// remaining iterations still run. `abort_on_error(true)` switches to
/// fail-fast, propagating the first iteration error.
pub struct BatchFlowExecutor {
    executor: FlowExecutor,
    iteration_delay: Duration,
    abort_on_error: bool,
}

impl BatchFlowExecutor {
    pub fn new(executor: FlowExecutor) -> Self {
        Self {
            executor,
            iteration_delay: Duration::ZERO,
            abort_on_error: false,
        }
    }

    /// Fixed pause between iterations, for rate-limiting external calls
    pub fn with_iteration_delay(mut self, delay: Duration) -> Self {
        self.iteration_delay = delay;
        self
    }

    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    pub async fn execute(
        &self,
        flow: &Flow,
        planner: &dyn BatchPlanner,
        store: &mut SharedStore,
    ) -> Result<BatchReport, FlowError> {
        flow.validate()?;
        let batch_id = ExecutionId::new_v4();
        let params = planner.plan(store).await.map_err(FlowError::Node)?;
        tracing::info!(flow = %flow.name(), iterations = params.len(), %batch_id, "starting batch flow run");

        let mut report = BatchReport {
            batch_id,
            iterations: Vec::new(),
        };
        for (index, param_set) in params.into_iter().enumerate() {
            if index > 0 && !self.iteration_delay.is_zero() {
                sleep(self.iteration_delay).await;
            }
            store.merge(&param_set);

            let started = Instant::now();
            match self.executor.execute(flow, store).await {
                Ok(outcome) => {
                    report.iterations.push(IterationRecord {
                        index,
                        params: param_set,
                        success: true,
                        final_action: outcome.final_action,
                        error: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::error!(flow = %flow.name(), iteration = index, error = %e, "batch iteration failed");
                    self.executor.emit(ExecutionEvent::IterationFailed {
                        execution_id: batch_id,
                        flow: flow.name().to_string(),
                        iteration: index,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    report.iterations.push(IterationRecord {
                        index,
                        params: param_set,
                        success: false,
                        final_action: None,
                        error: Some(e.to_string()),
                        duration_ms: started.elapsed().as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    if self.abort_on_error {
                        return Err(e);
                    }
                }
            }
        }

        tracing::info!(
            flow = %flow.name(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch flow run completed"
        );
        Ok(report)
    }
}

/// Result of a batch flow run, one record per iteration in order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: ExecutionId,
    pub iterations: Vec<IterationRecord>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.iterations.iter().filter(|i| i.success).count()
    }

    pub fn failed(&self) -> usize {
        self.iterations.iter().filter(|i| !i.success).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub index: usize,
    pub params: ParamSet,
    pub success: bool,
    pub final_action: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}
