//! The JSON graph exporter: the reference implementation of the
//! backend-artifact boundary. Real engine exporters plug in through the same
//! [`GraphExporter`] seam.

use std::io::Write;

use serde::Serialize;
use serde_json::json;

use modelport_core::export::GraphExporter;
use modelport_core::internal::*;
use modelport_core::trace::BoundaryRole;

#[derive(Serialize)]
struct OpRecord {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

#[derive(Serialize)]
struct BoundaryRecord {
    name: String,
    role: &'static str,
    subgraph: String,
    group: usize,
    shape: Vec<usize>,
}

/// Serializes a trace (ops, boundaries, subgraph partitioning) as JSON.
/// With a `subgraph` filter set, only that subgraph's boundary groups are
/// emitted: one sliced artifact per partition.
pub struct JsonGraphExporter {
    subgraph: Option<String>,
}

impl JsonGraphExporter {
    pub fn full() -> JsonGraphExporter {
        JsonGraphExporter { subgraph: None }
    }

    pub fn sliced(subgraph: impl Into<String>) -> JsonGraphExporter {
        JsonGraphExporter { subgraph: Some(subgraph.into()) }
    }
}

impl GraphExporter for JsonGraphExporter {
    fn format(&self) -> &'static str {
        "json-graph"
    }

    fn write(&self, trace: &Trace, w: &mut dyn Write) -> PortResult<()> {
        let boundaries: Vec<BoundaryRecord> = trace
            .boundaries
            .iter()
            .filter(|b| self.subgraph.as_deref().is_none_or(|s| s == b.subgraph))
            .map(|b| BoundaryRecord {
                name: b.name.clone(),
                role: match b.role {
                    BoundaryRole::Input => "input",
                    BoundaryRole::Output => "output",
                },
                subgraph: b.subgraph.clone(),
                group: b.group,
                shape: b.value.shape().to_vec(),
            })
            .collect();
        let document = match &self.subgraph {
            Some(subgraph) => {
                let spec = trace
                    .subgraphs()
                    .into_iter()
                    .find(|s| &s.id == subgraph)
                    .with_context(|| format!("trace has no subgraph `{subgraph}'"))?;
                json!({
                    "format": self.format(),
                    "subgraph": subgraph,
                    "inputs": spec.input_names,
                    "outputs": spec.output_names,
                    "occurrences": spec.occurrences,
                    "boundaries": boundaries,
                })
            }
            None => {
                let ops: Vec<OpRecord> = trace
                    .ops
                    .iter()
                    .map(|op| OpRecord {
                        name: op.qualified_name.to_string(),
                        inputs: op.input_shapes.iter().map(|s| format_shape(s)).collect(),
                        outputs: op.output_shapes.iter().map(|s| format_shape(s)).collect(),
                    })
                    .collect();
                let subgraphs: Vec<serde_json::Value> = trace
                    .subgraphs()
                    .iter()
                    .map(|s| {
                        json!({
                            "id": s.id,
                            "inputs": s.input_names,
                            "outputs": s.output_names,
                            "occurrences": s.occurrences,
                        })
                    })
                    .collect();
                json!({
                    "format": self.format(),
                    "ops": ops,
                    "boundaries": boundaries,
                    "subgraphs": subgraphs,
                })
            }
        };
        serde_json::to_writer_pretty(&mut *w, &document)?;
        writeln!(w)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use modelport_core::export::publish;
    use modelport_core::tensor::tensor0;

    fn sample_trace() -> Trace {
        let mut session = TraceSession::new();
        session.record_op(
            QualifiedName::new("m.encode").unwrap(),
            tvec![tvec![1, 3, 8, 8]],
            tvec![tvec![1, 8]],
        );
        let marked = mark(callable(|_, inputs| Ok(inputs)), "head", &["input"], &["out"]);
        marked.call(&mut session, tvec![Arc::new(tensor0(1.0))]).unwrap();
        session.finish()
    }

    #[test]
    fn full_artifact_carries_ops_and_partitioning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        publish(&JsonGraphExporter::full(), &sample_trace(), &path).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&fs_err::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["format"], "json-graph");
        assert_eq!(doc["ops"][0]["name"], "m.encode");
        assert_eq!(doc["ops"][0]["inputs"][0], "1x3x8x8");
        assert_eq!(doc["subgraphs"][0]["id"], "head");
    }

    #[test]
    fn sliced_artifact_keeps_only_its_subgraph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.json");
        publish(&JsonGraphExporter::sliced("head"), &sample_trace(), &path).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&fs_err::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["subgraph"], "head");
        assert_eq!(doc["inputs"][0], "input");
        assert_eq!(doc["boundaries"].as_array().unwrap().len(), 2);

        let missing = dir.path().join("missing.json");
        assert!(publish(&JsonGraphExporter::sliced("tail"), &sample_trace(), &missing).is_err());
        assert!(!missing.exists());
    }
}
