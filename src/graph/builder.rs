use std::collections::HashMap;

use serde_json::Value;

use crate::graph::loader::GraphDoc;
use crate::graph::{NodeData, OutputData, OutputFlag, PortData, ValidatorMode};

/// Fluent authoring API for graph documents, used by tests and host code
/// that builds graphs without going through YAML.
pub struct GraphBuilder {
    group: String,
    variables: HashMap<String, Value>,
    nodes: Vec<NodeData>,
}

impl GraphBuilder {
    pub fn new(group: &str) -> Self {
        Self {
            group: group.to_string(),
            variables: HashMap::new(),
            nodes: Vec::new(),
        }
    }

    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    pub fn node(self, id: &str, kind: &str) -> NodeBuilder {
        NodeBuilder {
            graph: self,
            node: NodeData {
                id: id.to_string(),
                group: String::new(),
                kind: kind.to_string(),
                pos: [0.0, 0.0],
                params: Value::Null,
                outputs: Vec::new(),
            },
        }
    }

    pub fn build(self) -> GraphDoc {
        GraphDoc {
            group: self.group,
            variables: self.variables,
            nodes: self.nodes,
        }
    }
}

pub struct NodeBuilder {
    graph: GraphBuilder,
    node: NodeData,
}

impl NodeBuilder {
    pub fn params(mut self, params: Value) -> Self {
        self.node.params = params;
        self
    }

    /// Add an output wired to the given targets, one port per target.
    pub fn out(mut self, name: &str, targets: &[&str]) -> Self {
        self.node.outputs.push(OutputData {
            name: name.to_string(),
            ports: targets
                .iter()
                .map(|t| PortData {
                    next: t.to_string(),
                    next_name: String::new(),
                    actor: None,
                })
                .collect(),
            mode: ValidatorMode::Passive,
            flag: OutputFlag::Primary,
        });
        self
    }

    /// Add an output with an explicit validator mode.
    pub fn out_mode(mut self, name: &str, mode: ValidatorMode, targets: &[&str]) -> Self {
        self = self.out(name, targets);
        if let Some(last) = self.node.outputs.last_mut() {
            last.mode = mode;
        }
        self
    }

    /// Append an actor-indexed port to an existing output (multi-input wiring).
    pub fn actor_port(mut self, output: &str, target: &str, next_name: &str, actor: u32) -> Self {
        if let Some(out) = self.node.outputs.iter_mut().find(|o| o.name == output) {
            out.ports.push(PortData {
                next: target.to_string(),
                next_name: next_name.to_string(),
                actor: Some(actor),
            });
        } else {
            self.node.outputs.push(OutputData {
                name: output.to_string(),
                ports: vec![PortData {
                    next: target.to_string(),
                    next_name: next_name.to_string(),
                    actor: Some(actor),
                }],
                mode: ValidatorMode::Passive,
                flag: OutputFlag::Primary,
            });
        }
        self
    }

    pub fn done(mut self) -> GraphBuilder {
        self.graph.nodes.push(self.node);
        self.graph
    }
}
