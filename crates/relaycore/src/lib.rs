//! Core abstractions for the relay engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: the shared store, the node lifecycle contracts,
//! the flow definition, and the execution event types.

mod error;
pub mod events;
mod flow;
mod node;
mod store;
mod value;

pub use error::{FlowError, NodeError};
pub use events::{EventBus, ExecutionEvent, ExecutionId};
pub use flow::{Flow, FlowSpec, NodeSpec, RouteSpec, RoutedNode, DEFAULT_ACTION};
pub use node::{BatchMode, BatchNode, Node, RetryPolicy};
pub use store::{ParamSet, SharedStore};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
