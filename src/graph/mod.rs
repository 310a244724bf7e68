pub mod builder;
pub mod loader;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 图的静态描述 (节点 + 出口 + 连线)
/// 加载完成后不可变；运行时只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    /// Stable unique id within the group.
    pub id: String,
    /// Owning graph group. Filled by the loader for YAML documents.
    #[serde(default)]
    pub group: String,
    /// Node kind tag (e.g. "Start", "Chance", "Sequencer").
    pub kind: String,
    /// Editor position. Kept only for round-trip fidelity, never read at runtime.
    #[serde(default)]
    pub pos: [f32; 2],
    /// Kind-specific authored parameters.
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub outputs: Vec<OutputData>,
}

impl NodeData {
    pub fn output(&self, name: &str) -> Option<&OutputData> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// The first declared output, by convention the default continuation.
    pub fn primary_output(&self) -> Option<&OutputData> {
        self.outputs.first()
    }
}

/// One named exit slot on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputData {
    pub name: String,
    /// Outgoing edges, activated in declaration order.
    #[serde(default)]
    pub ports: Vec<PortData>,
    /// Only meaningful on validator-adjacent nodes.
    #[serde(default)]
    pub mode: ValidatorMode,
    /// Presentation flag consumed by the editor, not the runtime.
    #[serde(default)]
    pub flag: OutputFlag,
}

/// 有向边。`next` 为空表示未接线 (合法的分支终点)。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortData {
    /// Target node id. Empty means the edge is unterminated.
    #[serde(default)]
    pub next: String,
    /// Target port name, used for port-identity matching on multi-input nodes.
    #[serde(default)]
    pub next_name: String,
    /// Actor index for actor-scoped entries on multi-input nodes.
    #[serde(default)]
    pub actor: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ValidatorMode {
    #[default]
    Passive,
    Active,
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFlag {
    #[default]
    Primary,
    Disabled,
    HideIfDisable,
}

/// Load-time failures. These are fatal to the graph being loaded, never to
/// the process.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate node id '{id}' in group '{group}'")]
    DuplicateNode { group: String, id: String },

    #[error("unsupported node kind '{kind}' on node '{id}' in group '{group}'")]
    UnsupportedKind {
        group: String,
        id: String,
        kind: String,
    },

    #[error("node '{id}' in group '{group}': {reason}")]
    BadParams { group: String, id: String, reason: String },

    #[error("group '{group}' has no '{kind}' node")]
    MissingNode { group: String, kind: &'static str },

    #[error("unknown graph group '{0}'")]
    UnknownGroup(String),

    #[error("graph document parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("graph document io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A validated, flat node list for one graph group.
///
/// Invariant (established by the loader): every non-empty `PortData::next`
/// resolves to exactly one node id in this set.
#[derive(Debug, Clone)]
pub struct GraphSet {
    pub group: String,
    /// Variable template, cloned into each running instance.
    pub variables: HashMap<String, Value>,
    nodes: Vec<NodeData>,
    index: HashMap<String, usize>,
}

impl GraphSet {
    pub(crate) fn from_parts(
        group: String,
        variables: HashMap<String, Value>,
        nodes: Vec<NodeData>,
    ) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self {
            group,
            variables,
            nodes,
            index,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeData> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn first_of_kind(&self, kind: &str) -> Option<&NodeData> {
        self.nodes.iter().find(|n| n.kind == kind)
    }

    pub fn nodes(&self) -> &[NodeData] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Shared library of loaded groups. Schemers look up validator rule graphs
/// here, and the async ruler path reads it from a worker task.
#[derive(Default)]
pub struct GraphLibrary {
    groups: DashMap<String, Arc<GraphSet>>,
}

impl GraphLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, set: GraphSet) {
        self.groups.insert(set.group.clone(), Arc::new(set));
    }

    pub fn get(&self, group: &str) -> Option<Arc<GraphSet>> {
        self.groups.get(group).map(|g| g.clone())
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
