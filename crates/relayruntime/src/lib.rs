//! Flow execution runtime
//!
//! This crate provides the engine that drives flows node by node,
//! the batch-flow executor that repeats a flow per parameter set,
//! the node registry for declarative flow specs, and the runtime facade
//! tying them together.

mod batch_flow;
mod executor;
mod registry;
mod runtime;

pub use batch_flow::{BatchFlowExecutor, BatchPlanner, BatchReport, IterationRecord};
pub use executor::{FlowExecutor, FlowOutcome, NodeRecord};
pub use registry::{FactoryMetadata, NodeFactory, NodeRegistry};
pub use runtime::{FlowRuntime, RuntimeConfig};
