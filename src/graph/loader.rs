use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::graph::{GraphError, GraphSet, NodeData};
use crate::runtime::behavior::BehaviorRegistry;

/// One authored graph document, as produced by the editor/save layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDoc {
    pub group: String,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    pub nodes: Vec<NodeData>,
}

/// Record of a recoverable load-time repair (pruned dangling edge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadDiagnostic {
    pub group: String,
    pub node: String,
    pub output: String,
    pub detail: String,
}

/// Validate a document and assemble it into a [`GraphSet`].
///
/// Fatal to this graph (never to the process): duplicate node ids, kinds the
/// registry does not know, behavior-level parameter rejection. Recoverable:
/// a port referencing a node id outside the group is pruned, logged, and
/// reported as a diagnostic; the engine may then assume every surviving
/// edge resolves.
pub fn assemble(
    doc: GraphDoc,
    behaviors: &BehaviorRegistry,
) -> Result<(GraphSet, Vec<LoadDiagnostic>), GraphError> {
    let group = doc.group;
    let mut seen: HashSet<&str> = HashSet::new();
    for node in &doc.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(GraphError::DuplicateNode {
                group,
                id: node.id.clone(),
            });
        }
    }

    let ids: HashSet<String> = doc.nodes.iter().map(|n| n.id.clone()).collect();
    let mut nodes = doc.nodes;
    let mut diagnostics = Vec::new();

    for node in &mut nodes {
        node.group = group.clone();
        let behavior = behaviors
            .get(&node.kind)
            .ok_or_else(|| GraphError::UnsupportedKind {
                group: group.clone(),
                id: node.id.clone(),
                kind: node.kind.clone(),
            })?;
        behavior.validate(node)?;

        for output in &mut node.outputs {
            output.ports.retain(|port| {
                if port.next.is_empty() || ids.contains(&port.next) {
                    return true;
                }
                warn!(
                    group = %group,
                    node = %node.id,
                    output = %output.name,
                    target = %port.next,
                    "pruning dangling edge"
                );
                diagnostics.push(LoadDiagnostic {
                    group: group.clone(),
                    node: node.id.clone(),
                    output: output.name.clone(),
                    detail: format!("dangling edge to '{}'", port.next),
                });
                false
            });
        }
    }

    Ok((GraphSet::from_parts(group, doc.variables, nodes), diagnostics))
}

/// Parse a multi-document YAML string into graph sets.
pub fn load_str(
    source: &str,
    behaviors: &BehaviorRegistry,
) -> Result<(Vec<GraphSet>, Vec<LoadDiagnostic>), GraphError> {
    let mut sets = Vec::new();
    let mut diagnostics = Vec::new();
    for document in serde_yaml::Deserializer::from_str(source) {
        let doc = GraphDoc::deserialize(document)?;
        let (set, mut diags) = assemble(doc, behaviors)?;
        sets.push(set);
        diagnostics.append(&mut diags);
    }
    Ok((sets, diagnostics))
}

pub fn load_path(
    path: impl AsRef<Path>,
    behaviors: &BehaviorRegistry,
) -> Result<(Vec<GraphSet>, Vec<LoadDiagnostic>), GraphError> {
    let source = std::fs::read_to_string(path)?;
    load_str(&source, behaviors)
}
