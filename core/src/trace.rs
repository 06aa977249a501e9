//! Trace sessions: the op log and boundary sequence one forward invocation
//! leaves behind.

use crate::internal::*;

/// One recorded invocation of a symbol-table callable.
#[derive(Debug, Clone)]
pub struct TraceOp {
    pub qualified_name: QualifiedName,
    pub input_shapes: TVec<TVec<usize>>,
    pub output_shapes: TVec<TVec<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryRole {
    Input,
    Output,
}

/// A named tensor capture marking a subgraph input or output.
///
/// `group` ties together the captures of one marked invocation; re-entrant
/// calls to the same marked function get distinct groups.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub name: String,
    pub role: BoundaryRole,
    pub value: TValue,
    pub subgraph: String,
    pub group: usize,
}

/// Mutable state owned by one trace: ops and boundaries accumulate in
/// capture order. Sessions are not shared across threads or traces.
#[derive(Debug, Default)]
pub struct TraceSession {
    ops: Vec<TraceOp>,
    boundaries: Vec<Boundary>,
    groups: usize,
}

impl TraceSession {
    pub fn new() -> TraceSession {
        TraceSession::default()
    }

    pub fn record_op(
        &mut self,
        qualified_name: QualifiedName,
        input_shapes: TVec<TVec<usize>>,
        output_shapes: TVec<TVec<usize>>,
    ) {
        self.ops.push(TraceOp { qualified_name, input_shapes, output_shapes });
    }

    /// Allocates a fresh boundary group id.
    pub(crate) fn begin_group(&mut self) -> usize {
        let group = self.groups;
        self.groups += 1;
        group
    }

    pub(crate) fn record_boundary(
        &mut self,
        name: impl Into<String>,
        role: BoundaryRole,
        value: TValue,
        subgraph: &str,
        group: usize,
    ) {
        self.boundaries.push(Boundary {
            name: name.into(),
            role,
            value,
            subgraph: subgraph.to_string(),
            group,
        });
    }

    pub fn ops(&self) -> &[TraceOp] {
        &self.ops
    }

    pub fn boundaries(&self) -> &[Boundary] {
        &self.boundaries
    }

    pub fn finish(self) -> Trace {
        Trace { ops: self.ops, boundaries: self.boundaries }
    }
}

/// The finished product of a session, handed to backend export together
/// with its boundary sequence.
#[derive(Debug)]
pub struct Trace {
    pub ops: Vec<TraceOp>,
    pub boundaries: Vec<Boundary>,
}

/// A named slice of the trace, reassembled from the boundary groups carrying
/// the same subgraph identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubgraphSpec {
    pub id: String,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    /// How many marked invocations contributed to this subgraph.
    pub occurrences: usize,
}

impl Trace {
    /// Partitions the boundary sequence by subgraph identifier, in first-seen
    /// order. This is the slicing input for downstream export: each spec
    /// names one subgraph to emit without re-tracing.
    pub fn subgraphs(&self) -> Vec<SubgraphSpec> {
        let mut specs: Vec<SubgraphSpec> = vec![];
        let mut seen_groups: Vec<(String, usize)> = vec![];
        for boundary in &self.boundaries {
            if !seen_groups.iter().any(|(s, g)| s == &boundary.subgraph && *g == boundary.group) {
                seen_groups.push((boundary.subgraph.clone(), boundary.group));
            }
            let spec = match specs.iter_mut().find(|s| s.id == boundary.subgraph) {
                Some(spec) => spec,
                None => {
                    specs.push(SubgraphSpec {
                        id: boundary.subgraph.clone(),
                        input_names: vec![],
                        output_names: vec![],
                        occurrences: 0,
                    });
                    specs.last_mut().unwrap()
                }
            };
            let names = match boundary.role {
                BoundaryRole::Input => &mut spec.input_names,
                BoundaryRole::Output => &mut spec.output_names,
            };
            if !names.iter().any(|n| n == &boundary.name) {
                names.push(boundary.name.clone());
            }
        }
        for spec in &mut specs {
            spec.occurrences =
                seen_groups.iter().filter(|(s, _)| s == &spec.id).count();
        }
        specs
    }
}
