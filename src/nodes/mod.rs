pub mod actors;
pub mod common;
pub mod control;
pub mod flow;
pub mod timed;

use crate::graph::NodeData;
use crate::runtime::behavior::{BehaviorRegistry, Flow, Scope};

/// Register every builtin node kind. Called once by the engine; hosts with
/// custom kinds can register more on the same registry before loading.
pub fn install(registry: &mut BehaviorRegistry) {
    common::install(registry);
    flow::install(registry);
    timed::install(registry);
    control::install(registry);
    actors::install(registry);
}

/// Forward along the first declared output, the default continuation.
pub(crate) fn forward_primary(node: &NodeData, flow: &mut Flow) {
    if let Some(out) = node.primary_output() {
        flow.forward(out.name.clone());
    }
}

/// Forward `preferred` when the node declares it, else the primary output.
pub(crate) fn forward_or_primary(node: &NodeData, flow: &mut Flow, preferred: &str) {
    if node.output(preferred).is_some() {
        flow.forward(preferred.to_string());
    } else {
        forward_primary(node, flow);
    }
}

/// Substitute `${name}` references with the scope's variable values.
pub(crate) fn interpolate(template: &str, scope: &dyn Scope) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match scope.var(name) {
                    Some(serde_json::Value::String(s)) => out.push_str(&s),
                    Some(value) => out.push_str(&value.to_string()),
                    None => {}
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
