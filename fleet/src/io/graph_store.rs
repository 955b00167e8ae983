//! Graph definition load/save with schema validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

use crate::core::graph::{ConfigurationError, Graph, GraphDefinition};

/// JSON schema (Draft 2020-12) for `.fleet/graph.json`.
pub const GRAPH_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/graph.schema.json"
));

/// Read, schema-check and load the graph at `path`.
pub fn load_graph(path: &Path) -> Result<Graph> {
    let raw = fs::read_to_string(path).with_context(|| format!("read graph {}", path.display()))?;
    let graph = parse_graph(&raw)?;
    debug!(
        path = %path.display(),
        workers = graph.workers().len(),
        max_phase = graph.max_phase(),
        "graph loaded"
    );
    Ok(graph)
}

/// Schema-check and load a graph from JSON text.
pub fn parse_graph(raw: &str) -> Result<Graph, ConfigurationError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| ConfigurationError::Schema(format!("invalid JSON: {err}")))?;
    validate_schema(&value)?;
    let definition: GraphDefinition = serde_json::from_value(value)
        .map_err(|err| ConfigurationError::Schema(err.to_string()))?;
    Graph::load(definition)
}

/// Write a definition as pretty JSON.
pub fn write_graph_definition(path: &Path, definition: &GraphDefinition) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(definition).context("serialize graph")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

fn validate_schema(instance: &Value) -> Result<(), ConfigurationError> {
    let schema: Value = serde_json::from_str(GRAPH_SCHEMA)
        .map_err(|err| ConfigurationError::Schema(format!("embedded schema: {err}")))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| ConfigurationError::Schema(format!("compile schema: {err}")))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(ConfigurationError::Schema(messages.join("; ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{contributor, definition};

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("graph.json");
        let def = definition(vec![contributor("a", 1, &[]), contributor("b", 2, &["a"])]);
        write_graph_definition(&path, &def).expect("write");
        let graph = load_graph(&path).expect("load");
        assert_eq!(graph.max_phase(), 2);
        assert_eq!(graph.project(), &def.project);
    }

    #[test]
    fn schema_rejects_unknown_fields_and_bad_phase() {
        let raw = r#"{
            "project": {"name": "Demo", "slug": "demo"},
            "workers": [{"id": "a", "branch": "fleet/a", "phase": 0, "colour": "red"}]
        }"#;
        let err = parse_graph(raw).unwrap_err();
        let ConfigurationError::Schema(message) = err else {
            panic!("expected schema error");
        };
        assert!(message.contains("phase") || message.contains("colour"));
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let raw = r#"{
            "project": {"name": "Demo", "slug": "demo"},
            "workers": [{"id": "a", "branch": "fleet/a"}]
        }"#;
        let graph = parse_graph(raw).expect("parse");
        let worker = graph.worker("a").expect("a");
        assert_eq!(worker.phase, 1);
        assert!(worker.dependencies.is_empty());
        assert_eq!(graph.project().base_branch, "main");
    }

    #[test]
    fn invalid_json_is_a_configuration_error() {
        assert!(matches!(
            parse_graph("{ not json"),
            Err(ConfigurationError::Schema(_))
        ));
    }
}
