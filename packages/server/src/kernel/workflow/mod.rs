//! Workflow runtime: definitions, the node contract, and the DAG engine.

pub mod definition;
pub mod engine;
pub mod node;

pub use definition::{
    DefinitionError, NodeDefinition, RetryPolicy, WorkflowDefinition, WorkflowLoader,
};
pub use engine::{EngineError, WorkflowEngine};
pub use node::{
    codes, NodeContext, NodeFailure, NodeOutcome, NodeRegistry, TypedNode, TypedOutcome,
    ValidationResult, WorkflowNode,
};
