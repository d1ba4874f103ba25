//! Workflow definition loading and validation.
//!
//! Definitions are JSON files under a known directory, immutable after
//! load. Structural problems (dangling edges, unreachable nodes) are
//! rejected; cycles are allowed with a warning because some check
//! workflows loop intentionally and rely on node logic to terminate.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("workflow definition not found: {0}")]
    NotFound(String),
    #[error("workflow definition is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("workflow schema invalid: {0}")]
    SchemaInvalid(String),
    #[error("workflow structure invalid: {0}")]
    StructureInvalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub next_nodes: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    pub name: String,
    pub version: String,
    pub start_node: String,
    pub nodes: HashMap<String, NodeDefinition>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl WorkflowDefinition {
    /// Parse and validate a raw JSON definition.
    pub fn parse(raw: &str) -> Result<Self, DefinitionError> {
        let value: Value = serde_json::from_str(raw)?;
        let definition: Self = serde_json::from_value(value)
            .map_err(|e| DefinitionError::SchemaInvalid(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.workflow_id.is_empty() {
            return Err(DefinitionError::SchemaInvalid(
                "workflow_id is empty".into(),
            ));
        }
        if self.nodes.is_empty() {
            return Err(DefinitionError::SchemaInvalid("nodes is empty".into()));
        }
        for (id, node) in &self.nodes {
            if node.node_type.is_empty() {
                return Err(DefinitionError::SchemaInvalid(format!(
                    "node {id} has no type"
                )));
            }
            if node.name.is_empty() {
                return Err(DefinitionError::SchemaInvalid(format!(
                    "node {id} has no name"
                )));
            }
        }

        if !self.nodes.contains_key(&self.start_node) {
            return Err(DefinitionError::StructureInvalid(format!(
                "start_node {} is not in nodes",
                self.start_node
            )));
        }
        for (id, node) in &self.nodes {
            for next in &node.next_nodes {
                if !self.nodes.contains_key(next) {
                    return Err(DefinitionError::StructureInvalid(format!(
                        "node {id} points at missing node {next}"
                    )));
                }
            }
        }

        let reachable = self.reachable_nodes();
        if reachable.len() != self.nodes.len() {
            let mut orphaned: Vec<&str> = self
                .nodes
                .keys()
                .filter(|id| !reachable.contains(id.as_str()))
                .map(String::as_str)
                .collect();
            orphaned.sort_unstable();
            return Err(DefinitionError::StructureInvalid(format!(
                "unreachable nodes: {}",
                orphaned.join(", ")
            )));
        }

        if self.has_cycle() {
            warn!(
                workflow_id = %self.workflow_id,
                "workflow contains a cycle; relying on node logic to terminate"
            );
        }
        Ok(())
    }

    /// Node ids reachable from `start_node` by following `next_nodes`.
    pub fn reachable_nodes(&self) -> HashSet<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = vec![self.start_node.as_str()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                for next in &node.next_nodes {
                    stack.push(next.as_str());
                }
            }
        }
        seen
    }

    fn has_cycle(&self) -> bool {
        let mut visiting: HashSet<&str> = HashSet::new();
        let mut done: HashSet<&str> = HashSet::new();
        for id in self.nodes.keys() {
            if self.cycle_from(id.as_str(), &mut visiting, &mut done) {
                return true;
            }
        }
        false
    }

    fn cycle_from<'a>(
        &'a self,
        id: &'a str,
        visiting: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> bool {
        if done.contains(id) {
            return false;
        }
        if !visiting.insert(id) {
            return true;
        }
        if let Some(node) = self.nodes.get(id) {
            for next in &node.next_nodes {
                if self.cycle_from(next.as_str(), visiting, done) {
                    return true;
                }
            }
        }
        visiting.remove(id);
        done.insert(id);
        false
    }
}

/// Loads definitions from disk and caches them per id.
pub struct WorkflowLoader {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl WorkflowLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn load(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>, DefinitionError> {
        if let Some(definition) = self.cache.read().await.get(workflow_id) {
            return Ok(definition.clone());
        }

        let path = self.dir.join(format!("{workflow_id}.json"));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| DefinitionError::NotFound(workflow_id.to_string()))?;
        let definition = Arc::new(WorkflowDefinition::parse(&raw)?);

        self.cache
            .write()
            .await
            .insert(workflow_id.to_string(), definition.clone());
        Ok(definition)
    }

    /// Drop the cache entry so the next `load` re-reads the file.
    pub async fn reload(&self, workflow_id: &str) {
        self.cache.write().await.remove(workflow_id);
    }

    /// Ids of definitions available on disk.
    pub async fn list(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            warn!(dir = %self.dir.display(), "workflow directory not readable");
            return ids;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(value: Value) -> Result<WorkflowDefinition, DefinitionError> {
        WorkflowDefinition::parse(&value.to_string())
    }

    fn two_node_workflow() -> Value {
        json!({
            "workflow_id": "wf",
            "name": "Two nodes",
            "version": "1.0.0",
            "start_node": "a",
            "nodes": {
                "a": {"type": "noop", "name": "A", "next_nodes": ["b"]},
                "b": {"type": "noop", "name": "B", "next_nodes": []}
            }
        })
    }

    #[test]
    fn parses_a_valid_definition() {
        let def = definition(two_node_workflow()).unwrap();
        assert_eq!(def.workflow_id, "wf");
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.nodes["a"].retry, RetryPolicy::default());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = WorkflowDefinition::parse("{not json").unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidJson(_)));
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = definition(json!({"workflow_id": "wf"})).unwrap_err();
        assert!(matches!(err, DefinitionError::SchemaInvalid(_)));
    }

    #[test]
    fn rejects_start_node_outside_nodes() {
        let mut wf = two_node_workflow();
        wf["start_node"] = json!("missing");
        let err = definition(wf).unwrap_err();
        assert!(matches!(err, DefinitionError::StructureInvalid(_)));
    }

    #[test]
    fn rejects_dangling_next_node() {
        let mut wf = two_node_workflow();
        wf["nodes"]["a"]["next_nodes"] = json!(["ghost"]);
        let err = definition(wf).unwrap_err();
        assert!(matches!(err, DefinitionError::StructureInvalid(_)));
    }

    #[test]
    fn rejects_unreachable_nodes() {
        let mut wf = two_node_workflow();
        wf["nodes"]["orphan"] = json!({"type": "noop", "name": "Orphan", "next_nodes": []});
        let err = definition(wf).unwrap_err();
        match err {
            DefinitionError::StructureInvalid(msg) => assert!(msg.contains("orphan")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cycles_load_with_a_warning() {
        let mut wf = two_node_workflow();
        wf["nodes"]["b"]["next_nodes"] = json!(["a"]);
        let def = definition(wf).unwrap();
        assert_eq!(def.nodes.len(), 2);
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let def = definition(two_node_workflow()).unwrap();
        let raw = serde_json::to_string(&def).unwrap();
        let reparsed = WorkflowDefinition::parse(&raw).unwrap();
        assert_eq!(def, reparsed);
    }

    #[tokio::test]
    async fn loader_caches_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(&path, two_node_workflow().to_string()).unwrap();

        let loader = WorkflowLoader::new(dir.path());
        let first = loader.load("wf").await.unwrap();
        assert_eq!(first.nodes.len(), 2);

        // Overwrite the file; the cached copy still serves.
        let mut wf = two_node_workflow();
        wf["nodes"]["c"] = json!({"type": "noop", "name": "C", "next_nodes": []});
        wf["nodes"]["b"]["next_nodes"] = json!(["c"]);
        std::fs::write(&path, wf.to_string()).unwrap();
        assert_eq!(loader.load("wf").await.unwrap().nodes.len(), 2);

        loader.reload("wf").await;
        assert_eq!(loader.load("wf").await.unwrap().nodes.len(), 3);
    }

    #[tokio::test]
    async fn loader_reports_missing_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let loader = WorkflowLoader::new(dir.path());
        let err = loader.load("ghost").await.unwrap_err();
        assert!(matches!(err, DefinitionError::NotFound(_)));
    }
}
