use crate::graph::{GraphError, NodeData};
use crate::nodes::interpolate;
use crate::present::{DialogueSpec, SoundSpec};
use crate::runtime::activation::NodeInfo;
use crate::runtime::behavior::{
    param_bool, param_f64, param_str, require_str, BehaviorRegistry, Flow, NodeBehavior, Scope,
};
use crate::runtime::EngineError;

pub fn install(registry: &mut BehaviorRegistry) {
    registry.register(Box::new(WaitBehavior));
    registry.register(Box::new(WaitRandomBehavior));
    registry.register(Box::new(WaitTriggerBehavior));
    registry.register(Box::new(SoundBehavior));
    registry.register(Box::new(DialogueBehavior));
}

fn require_f64(node: &NodeData, key: &str) -> Result<(), GraphError> {
    if param_f64(node, key).is_none() {
        return Err(GraphError::BadParams {
            group: node.group.clone(),
            id: node.id.clone(),
            reason: format!("missing numeric param '{key}'"),
        });
    }
    Ok(())
}

/// Suspends the branch for a fixed game-time delay.
pub struct WaitBehavior;

impl NodeBehavior for WaitBehavior {
    fn kind(&self) -> &'static str {
        "Wait"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_f64(node, "seconds")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let seconds = param_f64(node, "seconds").unwrap_or(0.0);
        let output = node
            .primary_output()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "Next".to_string());
        flow.wait(seconds, output);
        Ok(())
    }
}

/// Suspends for a uniformly sampled delay in `[min, max]`.
pub struct WaitRandomBehavior;

impl NodeBehavior for WaitRandomBehavior {
    fn kind(&self) -> &'static str {
        "WaitRandom"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_f64(node, "min")?;
        require_f64(node, "max")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let min = param_f64(node, "min").unwrap_or(0.0);
        let max = param_f64(node, "max").unwrap_or(min);
        let seconds = scope.sample(min, max);
        let output = node
            .primary_output()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "Next".to_string());
        flow.wait(seconds, output);
        Ok(())
    }
}

/// Predicate-or-deadline suspension: the named trigger hook is re-checked
/// every tick; whichever of trigger and timeout fires first ends the
/// branch, exactly once. `timeout: -1` waits on the trigger forever.
pub struct WaitTriggerBehavior;

impl NodeBehavior for WaitTriggerBehavior {
    fn kind(&self) -> &'static str {
        "WaitTrigger"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "trigger")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let hook = param_str(node, "trigger").unwrap_or_default().to_string();
        let timeout = param_f64(node, "timeout").unwrap_or(-1.0);
        flow.wait_gate(hook, timeout, "Trigger", "Timeout");
        Ok(())
    }
}

/// Plays a sound through the presenter; with `wait_end` the branch
/// suspends until the host reports completion.
pub struct SoundBehavior;

impl NodeBehavior for SoundBehavior {
    fn kind(&self) -> &'static str {
        "Sound"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "sound")
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let spec = SoundSpec {
            sound: param_str(node, "sound").unwrap_or_default().to_string(),
            actor: info.actor.or(Some(scope.conspirator())),
        };
        let wait_end = param_bool(node, "wait_end").unwrap_or(false);
        let output = node
            .primary_output()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "Next".to_string());
        flow.sound(spec, wait_end, output);
        Ok(())
    }
}

/// Opens a dialogue and suspends until the host reports the chosen option.
/// Every declared output doubles as one selectable option.
pub struct DialogueBehavior;

impl NodeBehavior for DialogueBehavior {
    fn kind(&self) -> &'static str {
        "Dialogue"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "text")?;
        if node.outputs.is_empty() {
            return Err(GraphError::BadParams {
                group: node.group.clone(),
                id: node.id.clone(),
                reason: "dialogue needs at least one output to offer as an option".into(),
            });
        }
        Ok(())
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let speaker = match param_str(node, "speaker").unwrap_or("actor") {
            "target" | "dual" => info.dual.or(scope.target()),
            _ => info.actor.or(Some(scope.conspirator())),
        };
        flow.dialogue(DialogueSpec {
            text: interpolate(param_str(node, "text").unwrap_or_default(), scope),
            speaker,
            options: node.outputs.iter().map(|o| o.name.clone()).collect(),
        });
        Ok(())
    }
}
