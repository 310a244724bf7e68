use crate::graph::{GraphError, NodeData};
use crate::runtime::activation::{NodeInfo, ParentRole};
use crate::runtime::behavior::{
    param_i64, param_str, require_str, BehaviorRegistry, Flow, NodeBehavior, Scope,
};
use crate::runtime::EngineError;

pub fn install(registry: &mut BehaviorRegistry) {
    registry.register(Box::new(SequencerBehavior));
    registry.register(Box::new(RepeaterBehavior));
    registry.register(Box::new(ValidatorBehavior));
    registry.register(Box::new(BackgroundWorkerBehavior));
}

fn require_output(node: &NodeData, name: &str) -> Result<(), GraphError> {
    match node.output(name) {
        Some(out) if !out.ports.is_empty() => Ok(()),
        _ => Err(GraphError::BadParams {
            group: node.group.clone(),
            id: node.id.clone(),
            reason: format!("missing wired '{name}' output"),
        }),
    }
}

/// Runs its outputs one at a time, in declaration order. The engine
/// re-triggers this activation with an incremented index each time the
/// current step's children have all retired; after the last step the
/// sequencer itself retires.
pub struct SequencerBehavior;

impl NodeBehavior for SequencerBehavior {
    fn kind(&self) -> &'static str {
        "Sequencer"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        if node.outputs.is_empty() {
            return Err(GraphError::BadParams {
                group: node.group.clone(),
                id: node.id.clone(),
                reason: "sequencer needs at least one output".into(),
            });
        }
        Ok(())
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        if info.index < node.outputs.len() {
            flow.spawn(node.outputs[info.index].name.clone(), ParentRole::Sequencer);
            flow.stay();
        }
        // Exhausted: no ops, the branch ends.
        Ok(())
    }
}

/// Re-runs its `Body` output until the authored count is reached
/// (`count: -1` repeats forever). The engine increments the repeat counter
/// whenever the body drains; an optional `Done` output continues after the
/// final repetition.
pub struct RepeaterBehavior;

impl NodeBehavior for RepeaterBehavior {
    fn kind(&self) -> &'static str {
        "Repeater"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_output(node, "Body")
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let count = param_i64(node, "count").unwrap_or(-1);
        if count >= 0 && i64::from(info.repeat) >= count {
            if node.output("Done").is_some() {
                flow.forward("Done");
            }
            return Ok(());
        }
        flow.spawn("Body", ParentRole::Repeater);
        flow.stay();
        Ok(())
    }
}

/// Guards its `Body` subtree with a periodically re-evaluated rule graph.
/// The poll loop is armed here and runs until the subtree drains or an
/// interruption redirects flow through a Break/Active output.
pub struct ValidatorBehavior;

impl NodeBehavior for ValidatorBehavior {
    fn kind(&self) -> &'static str {
        "Validator"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "rule")?;
        require_output(node, "Body")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let rule = param_str(node, "rule").unwrap_or_default().to_string();
        flow.spawn("Body", ParentRole::Validator);
        flow.validator(rule);
        flow.stay();
        Ok(())
    }
}

/// Detaches its `Background` output into branches that never hold the
/// scheme open, then continues along `Next`.
pub struct BackgroundWorkerBehavior;

impl NodeBehavior for BackgroundWorkerBehavior {
    fn kind(&self) -> &'static str {
        "BackgroundWorker"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_output(node, "Background")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        flow.spawn("Background", ParentRole::Background);
        if node.output("Next").is_some() {
            flow.forward("Next");
        }
        Ok(())
    }
}
