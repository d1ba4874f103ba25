//! Node contract and registry.
//!
//! Concrete steps implement the typed contract; the engine only ever sees
//! the erased JSON-value form. Registration maps a node-type tag to an
//! instance, so workflow definitions stay plain data.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domains::platforms::PlatformConfig;
use crate::kernel::ServerDeps;

/// Well-known failure codes the engine keys retry decisions on.
pub mod codes {
    /// Input rejected before execution; never retried.
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const EXECUTION_ERROR: &str = "execution_error";
    pub const TIMEOUT: &str = "timeout";
}

/// Outcome of a node's pure `validate` step.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Structured error carried by a failed node result.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct NodeFailure {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Success/failure outcome of a node run.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Success {
        data: Map<String, Value>,
        /// Runtime override of the definition's `next_nodes`.
        next_nodes: Option<Vec<String>>,
    },
    Failure(NodeFailure),
}

impl NodeOutcome {
    pub fn success(data: Map<String, Value>) -> Self {
        NodeOutcome::Success {
            data,
            next_nodes: None,
        }
    }

    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        NodeOutcome::Failure(NodeFailure {
            message: message.into(),
            code: code.to_string(),
            details: None,
        })
    }
}

/// Everything a node may touch while executing.
#[derive(Clone)]
pub struct NodeContext {
    pub job_id: Uuid,
    pub workflow_id: String,
    pub node_id: String,
    /// Node config post-merge with workflow defaults and job params.
    pub config: Map<String, Value>,
    pub platform: String,
    /// Snapshot of the platform's scraping configuration, when one exists.
    pub platform_config: Option<Arc<PlatformConfig>>,
    /// Accumulated DAG-scoped state; node outputs merge back into it.
    pub state: Map<String, Value>,
    pub deps: Arc<ServerDeps>,
}

impl NodeContext {
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn state_value(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }
}

/// Typed output of a successful node execution.
pub struct TypedOutcome<O> {
    pub data: O,
    pub next_nodes: Option<Vec<String>>,
}

impl<O> TypedOutcome<O> {
    pub fn new(data: O) -> Self {
        Self {
            data,
            next_nodes: None,
        }
    }

    pub fn with_next(data: O, next_nodes: Vec<String>) -> Self {
        Self {
            data,
            next_nodes: Some(next_nodes),
        }
    }
}

/// Typed node contract. `validate` is pure (no I/O), `execute` may perform
/// I/O, `rollback` is best-effort compensation after retries are exhausted.
#[async_trait]
pub trait TypedNode: Send + Sync {
    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;

    fn validate(&self, input: &Self::Input) -> ValidationResult {
        let _ = input;
        ValidationResult::ok()
    }

    async fn execute(
        &self,
        input: Self::Input,
        ctx: &NodeContext,
    ) -> anyhow::Result<TypedOutcome<Self::Output>>;

    async fn rollback(&self, ctx: &NodeContext) {
        let _ = ctx;
    }
}

/// Dyn-compatible node the engine drives; inputs and outputs are JSON.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    async fn run(&self, ctx: &NodeContext) -> NodeOutcome;

    async fn rollback(&self, ctx: &NodeContext) {
        let _ = ctx;
    }
}

/// Adapter erasing a `TypedNode` into the JSON-value contract.
struct ErasedNode<T>(T);

#[async_trait]
impl<T: TypedNode> WorkflowNode for ErasedNode<T> {
    async fn run(&self, ctx: &NodeContext) -> NodeOutcome {
        let input: T::Input = match serde_json::from_value(Value::Object(ctx.config.clone())) {
            Ok(input) => input,
            Err(e) => {
                return NodeOutcome::failure(
                    codes::VALIDATION_FAILED,
                    format!("node input invalid: {e}"),
                )
            }
        };

        let validation = self.0.validate(&input);
        if !validation.is_valid() {
            return NodeOutcome::failure(codes::VALIDATION_FAILED, validation.errors.join("; "));
        }

        match self.0.execute(input, ctx).await {
            Ok(outcome) => {
                let data = match serde_json::to_value(outcome.data) {
                    Ok(Value::Object(map)) => map,
                    Ok(Value::Null) => Map::new(),
                    Ok(other) => {
                        let mut map = Map::new();
                        map.insert("output".to_string(), other);
                        map
                    }
                    Err(e) => {
                        return NodeOutcome::failure(
                            codes::EXECUTION_ERROR,
                            format!("node output not serializable: {e}"),
                        )
                    }
                };
                NodeOutcome::Success {
                    data,
                    next_nodes: outcome.next_nodes,
                }
            }
            Err(e) => NodeOutcome::failure(codes::EXECUTION_ERROR, format!("{e:#}")),
        }
    }

    async fn rollback(&self, ctx: &NodeContext) {
        self.0.rollback(ctx).await;
    }
}

/// Registry mapping node-type tags to implementations.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn WorkflowNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<N: WorkflowNode + 'static>(&mut self, node_type: &str, node: N) {
        self.nodes.insert(node_type.to_string(), Arc::new(node));
    }

    pub fn register_typed<T: TypedNode + 'static>(&mut self, node_type: &str, node: T) {
        self.register(node_type, ErasedNode(node));
    }

    pub fn resolve(&self, node_type: &str) -> Option<Arc<dyn WorkflowNode>> {
        self.nodes.get(node_type).cloned()
    }

    pub fn is_registered(&self, node_type: &str) -> bool {
        self.nodes.contains_key(node_type)
    }

    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl WorkflowNode for Echo {
        async fn run(&self, _ctx: &NodeContext) -> NodeOutcome {
            NodeOutcome::success(Map::new())
        }
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = NodeRegistry::new();
        registry.register("echo", Echo);
        assert!(registry.is_registered("echo"));
        assert!(registry.resolve("echo").is_some());
        assert!(registry.resolve("ghost").is_none());
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut registry = NodeRegistry::new();
        registry.register("b", Echo);
        registry.register("a", Echo);
        assert_eq!(registry.registered_types(), vec!["a", "b"]);
    }

    #[test]
    fn validation_result_aggregates_errors() {
        assert!(ValidationResult::ok().is_valid());
        assert!(!ValidationResult::fail("limit must be positive").is_valid());
    }
}
