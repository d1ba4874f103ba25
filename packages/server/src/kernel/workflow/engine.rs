//! DAG execution engine.
//!
//! Walks a workflow definition from its start node, honoring per-node
//! retry policy and timeouts, merging each node's output into accumulated
//! state, and persisting the job after every node. The engine is
//! single-threaded per job; concurrency lives at the worker level.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::definition::{NodeDefinition, WorkflowDefinition};
use super::node::{codes, NodeContext, NodeOutcome, NodeRegistry};
use crate::kernel::jobs::{Job, JobError, JobStatus, QueueError};
use crate::kernel::ServerDeps;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),
    #[error("node {node_id} validation failed: {message}")]
    ValidationFailed { node_id: String, message: String },
    #[error("node {node_id} failed: {message}")]
    NodeFailed { node_id: String, message: String },
    #[error("node {node_id} timed out after {timeout_ms}ms")]
    Timeout { node_id: String, timeout_ms: u64 },
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct WorkflowEngine {
    registry: Arc<NodeRegistry>,
    deps: Arc<ServerDeps>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<NodeRegistry>, deps: Arc<ServerDeps>) -> Self {
        Self { registry, deps }
    }

    /// Run a job through a definition to completion or failure.
    ///
    /// The finalized job is persisted before returning; the error path
    /// also returns the failure so the caller can log it.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        mut job: Job,
    ) -> Result<Job, EngineError> {
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.current_node = Some(definition.start_node.clone());
        self.deps.queue.update(&job).await?;

        let mut state: Map<String, Value> = Map::new();
        state.insert(
            "job_metadata".to_string(),
            json!({ "started_at": job.started_at }),
        );

        let total_nodes = definition.nodes.len();
        let mut executed: HashSet<String> = HashSet::new();
        let mut queued: HashSet<String> = HashSet::new();
        let mut ready: VecDeque<String> = VecDeque::new();
        ready.push_back(definition.start_node.clone());
        queued.insert(definition.start_node.clone());

        let run_result: Result<(), EngineError> = loop {
            let Some(node_id) = ready.pop_front() else {
                break Ok(());
            };
            queued.remove(&node_id);
            if executed.contains(&node_id) {
                continue;
            }
            let Some(node_def) = definition.nodes.get(&node_id) else {
                // Only reachable through a runtime override naming an
                // unknown id, which successor handling already filters.
                continue;
            };

            job.current_node = Some(node_id.clone());
            debug!(job_id = %job.id, node_id = %node_id, node_type = %node_def.node_type, "executing node");

            match self
                .execute_node_with_retry(definition, node_def, &node_id, &job, &state)
                .await
            {
                Ok((data, next_override)) => {
                    for (key, value) in data {
                        state.insert(key, value);
                    }
                    executed.insert(node_id.clone());

                    let successors =
                        next_override.unwrap_or_else(|| node_def.next_nodes.clone());
                    for next in successors {
                        if executed.contains(&next) || queued.contains(&next) {
                            continue;
                        }
                        if !definition.nodes.contains_key(&next) {
                            warn!(job_id = %job.id, node_id = %node_id, next = %next, "ignoring override to unknown node");
                            continue;
                        }
                        queued.insert(next.clone());
                        ready.push_back(next);
                    }

                    job.progress = executed.len() as f64 / total_nodes as f64;
                    job.current_node = ready.front().cloned();
                    self.deps.queue.update(&job).await?;
                }
                Err(e) => break Err(e),
            }
        };

        match run_result {
            Ok(()) => {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
                job.current_node = None;
                job.progress = 1.0;
                job.result = state;
                self.deps.queue.update(&job).await?;
                info!(job_id = %job.id, workflow_id = %definition.workflow_id, "workflow completed");
                Ok(job)
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(JobError {
                    message: e.to_string(),
                    node_id: job
                        .current_node
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                    timestamp: Utc::now(),
                });
                job.completed_at = Some(Utc::now());
                self.deps.queue.update(&job).await?;
                warn!(job_id = %job.id, workflow_id = %definition.workflow_id, error = %e, "workflow failed");
                Err(e)
            }
        }
    }

    async fn execute_node_with_retry(
        &self,
        definition: &WorkflowDefinition,
        node_def: &NodeDefinition,
        node_id: &str,
        job: &Job,
        state: &Map<String, Value>,
    ) -> Result<(Map<String, Value>, Option<Vec<String>>), EngineError> {
        let node = self
            .registry
            .resolve(&node_def.node_type)
            .ok_or_else(|| EngineError::UnknownNodeType(node_def.node_type.clone()))?;

        let ctx = NodeContext {
            job_id: job.id,
            workflow_id: definition.workflow_id.clone(),
            node_id: node_id.to_string(),
            config: merge_config(&definition.defaults, &node_def.config, &job.params),
            platform: job.platform.clone(),
            platform_config: self.deps.platforms.get(&job.platform),
            state: state.clone(),
            deps: self.deps.clone(),
        };

        let max_attempts = node_def.retry.max_attempts.max(1);
        let mut last_error = EngineError::NodeFailed {
            node_id: node_id.to_string(),
            message: "no attempts made".to_string(),
        };

        for attempt in 1..=max_attempts {
            let outcome = self.run_node(node.clone(), ctx.clone(), node_def.timeout_ms).await;

            match outcome {
                NodeOutcome::Success { data, next_nodes } => return Ok((data, next_nodes)),
                NodeOutcome::Failure(failure) => {
                    if failure.code == codes::VALIDATION_FAILED {
                        return Err(EngineError::ValidationFailed {
                            node_id: node_id.to_string(),
                            message: failure.message,
                        });
                    }
                    warn!(
                        job_id = %job.id,
                        node_id,
                        attempt,
                        max_attempts,
                        error = %failure.message,
                        "node attempt failed"
                    );
                    last_error = if failure.code == codes::TIMEOUT {
                        EngineError::Timeout {
                            node_id: node_id.to_string(),
                            timeout_ms: node_def.timeout_ms.unwrap_or_default(),
                        }
                    } else {
                        EngineError::NodeFailed {
                            node_id: node_id.to_string(),
                            message: failure.message,
                        }
                    };
                    if attempt < max_attempts {
                        let backoff = node_def.retry.backoff_ms.saturating_mul(u64::from(attempt));
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        node.rollback(&ctx).await;
        Err(last_error)
    }

    /// Run one attempt on its own task so a panicking node is contained
    /// and surfaces as a retryable failure.
    async fn run_node(
        &self,
        node: Arc<dyn super::node::WorkflowNode>,
        ctx: NodeContext,
        timeout_ms: Option<u64>,
    ) -> NodeOutcome {
        let mut handle = tokio::spawn(async move { node.run(&ctx).await });

        let joined = match timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return NodeOutcome::failure(codes::TIMEOUT, format!("timed out after {ms}ms"));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(outcome) => outcome,
            Err(join_error) => {
                NodeOutcome::failure(codes::EXECUTION_ERROR, format!("node panicked: {join_error}"))
            }
        }
    }
}

/// Overlay workflow defaults with the node config (after `${name}`
/// substitution from job params), then the params themselves.
fn merge_config(
    defaults: &Map<String, Value>,
    config: &Map<String, Value>,
    params: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = defaults.clone();
    for (key, value) in config {
        merged.insert(key.clone(), substitute(value, params));
    }
    for (key, value) in params {
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
    merged
}

/// Replace whole-string `${name}` tokens with the matching param value,
/// preserving the param's JSON type. Unknown names resolve to null.
fn substitute(value: &Value, params: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                params.get(name).cloned().unwrap_or(Value::Null)
            } else {
                value.clone()
            }
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| substitute(item, params)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, params)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitute_replaces_whole_tokens_with_typed_values() {
        let params = params(&[("limit", json!(50)), ("sale_state", json!("on_sale"))]);
        assert_eq!(substitute(&json!("${limit}"), &params), json!(50));
        assert_eq!(substitute(&json!("${sale_state}"), &params), json!("on_sale"));
        assert_eq!(substitute(&json!("plain"), &params), json!("plain"));
        assert_eq!(substitute(&json!("${missing}"), &params), Value::Null);
    }

    #[test]
    fn substitute_recurses_into_containers() {
        let params = params(&[("url", json!("https://example.com"))]);
        let value = json!({"nested": ["${url}", {"deep": "${url}"}]});
        let substituted = substitute(&value, &params);
        assert_eq!(
            substituted,
            json!({"nested": ["https://example.com", {"deep": "https://example.com"}]})
        );
    }

    #[test]
    fn merge_config_layers_defaults_config_then_params() {
        let defaults = params(&[("limit", json!(10)), ("keep", json!("default"))]);
        let config = params(&[("limit", json!(25))]);
        let job_params = params(&[("platform", json!("hwahae"))]);

        let merged = merge_config(&defaults, &config, &job_params);
        assert_eq!(merged["limit"], json!(25));
        assert_eq!(merged["keep"], json!("default"));
        assert_eq!(merged["platform"], json!("hwahae"));
    }

    #[test]
    fn merge_config_params_do_not_clobber_explicit_config() {
        let config = params(&[("limit", json!(5))]);
        let job_params = params(&[("limit", json!(99))]);
        let merged = merge_config(&Map::new(), &config, &job_params);
        assert_eq!(merged["limit"], json!(5));
    }
}
