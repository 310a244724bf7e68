use std::collections::HashMap;

use serde_json::Value;
use tracing::error;

use crate::graph::{GraphError, NodeData};
use crate::hooks::HookRegistry;
use crate::present::{DialogueSpec, NoticeSpec, SoundSpec};
use crate::runtime::activation::{NodeInfo, ParentRole};
use crate::world::{ActorId, World};

/// Terminal outcomes a node can report.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    EndScheme,
    SuccessScheme,
    FailScheme,
    SuccessRule,
    ErrorRule { name: String, message: String },
    WarningRule { name: String, message: String },
}

/// One scheduling/control effect requested by a node.
///
/// Nodes never mutate the engine directly: they push ops and the
/// interpreter applies them after `run` returns. The ruler accepts only
/// `Forward` and rule-terminal `Finish` ops.
#[derive(Debug, Clone)]
pub enum FlowOp {
    /// Activate every port of the named output, then retire this branch.
    Forward { output: String },
    /// Keep this activation alive without forwarding.
    Stay,
    /// Spawn children along the named output, linked to this activation.
    Spawn { output: String, role: ParentRole },
    /// Suspend; forward the named output when the delay fires.
    Wait { seconds: f64, output: String },
    /// Suspend on a trigger predicate with a deadline; whichever fires
    /// first wins.
    WaitGate {
        hook: String,
        timeout: f64,
        fire: String,
        expire: String,
    },
    /// Suspend until the host reports a dialogue choice.
    Dialogue { spec: DialogueSpec },
    /// Play a sound; optionally suspend until the host reports completion.
    Sound {
        spec: SoundSpec,
        wait_end: bool,
        output: String,
    },
    /// Fire-and-forget notification.
    Notify { spec: NoticeSpec },
    /// Spawn one child per actor along the named output (multi-actor
    /// fan-out, e.g. clan members).
    FanOut {
        output: String,
        actors: Vec<ActorId>,
    },
    /// Arm validator polling of the given rule group on this activation.
    Validator { rule: String },
    Finish { outcome: FlowOutcome },
}

/// 节点通过 Flow 向解释器提交调度请求 (不直接改引擎状态)。
///
/// An empty op list after `run` means the branch simply ends, which is
/// valid terminal behavior for any node kind.
#[derive(Debug, Default)]
pub struct Flow {
    pub(crate) ops: Vec<FlowOp>,
}

impl Flow {
    pub fn forward(&mut self, output: impl Into<String>) {
        self.ops.push(FlowOp::Forward {
            output: output.into(),
        });
    }

    pub fn stay(&mut self) {
        self.ops.push(FlowOp::Stay);
    }

    pub fn spawn(&mut self, output: impl Into<String>, role: ParentRole) {
        self.ops.push(FlowOp::Spawn {
            output: output.into(),
            role,
        });
    }

    pub fn wait(&mut self, seconds: f64, output: impl Into<String>) {
        self.ops.push(FlowOp::Wait {
            seconds,
            output: output.into(),
        });
    }

    pub fn wait_gate(
        &mut self,
        hook: impl Into<String>,
        timeout: f64,
        fire: impl Into<String>,
        expire: impl Into<String>,
    ) {
        self.ops.push(FlowOp::WaitGate {
            hook: hook.into(),
            timeout,
            fire: fire.into(),
            expire: expire.into(),
        });
    }

    pub fn dialogue(&mut self, spec: DialogueSpec) {
        self.ops.push(FlowOp::Dialogue { spec });
    }

    pub fn sound(&mut self, spec: SoundSpec, wait_end: bool, output: impl Into<String>) {
        self.ops.push(FlowOp::Sound {
            spec,
            wait_end,
            output: output.into(),
        });
    }

    pub fn notify(&mut self, spec: NoticeSpec) {
        self.ops.push(FlowOp::Notify { spec });
    }

    pub fn fan_out(&mut self, output: impl Into<String>, actors: Vec<ActorId>) {
        self.ops.push(FlowOp::FanOut {
            output: output.into(),
            actors,
        });
    }

    pub fn validator(&mut self, rule: impl Into<String>) {
        self.ops.push(FlowOp::Validator { rule: rule.into() });
    }

    pub fn finish(&mut self, outcome: FlowOutcome) {
        self.ops.push(FlowOp::Finish { outcome });
    }
}

/// Service surface shared by the schemer and the ruler. Behaviors read the
/// execution environment exclusively through this trait so the same
/// instruction set serves both interpreters.
pub trait Scope {
    fn world(&self) -> &dyn World;
    fn hooks(&self) -> &HookRegistry;
    fn conspirator(&self) -> ActorId;
    fn target(&self) -> Option<ActorId>;

    fn var(&self, name: &str) -> Option<Value>;
    fn set_var(&mut self, name: &str, value: Value);
    fn vars_snapshot(&self) -> HashMap<String, Value>;

    /// Roll against a percentage in [0, 100].
    fn roll(&mut self, percent: f64) -> bool;
    /// Uniform index in `0..len` (`0` when `len == 0`).
    fn pick(&mut self, len: usize) -> usize;
    /// Uniform sample in `[min, max]`.
    fn sample(&mut self, min: f64, max: f64) -> f64;

    /// Precomputed chance-modifier bonus targeting the given node.
    fn chance_bonus(&self, node_id: &str) -> f64;
    /// Whether any scheme instance of the given group is running.
    fn scheme_active(&self, group: &str) -> bool;
}

/// 节点行为接口：每种节点类型实现一份，构成解释器的指令集。
pub trait NodeBehavior: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Load-time check of authored parameters.
    fn validate(&self, _node: &NodeData) -> Result<(), GraphError> {
        Ok(())
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), super::EngineError>;

    /// Retire hook, called when the activation leaves the active set.
    fn end(&self, _info: &NodeInfo) {}
}

/// Kind tag → behavior table, shared by the load, schemer and ruler paths.
#[derive(Default)]
pub struct BehaviorRegistry {
    table: HashMap<String, Box<dyn NodeBehavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, behavior: Box<dyn NodeBehavior>) {
        let kind = behavior.kind().to_string();
        if self.table.contains_key(&kind) {
            error!(kind = %kind, "duplicate behavior registration ignored");
            return;
        }
        self.table.insert(kind, behavior);
    }

    pub fn get(&self, kind: &str) -> Option<&dyn NodeBehavior> {
        self.table.get(kind).map(|b| b.as_ref())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.table.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Shared param-reading helpers for behaviors.
pub(crate) fn param_str<'a>(node: &'a NodeData, key: &str) -> Option<&'a str> {
    node.params.get(key).and_then(|v| v.as_str())
}

pub(crate) fn param_f64(node: &NodeData, key: &str) -> Option<f64> {
    node.params.get(key).and_then(|v| v.as_f64())
}

pub(crate) fn param_i64(node: &NodeData, key: &str) -> Option<i64> {
    node.params.get(key).and_then(|v| v.as_i64())
}

pub(crate) fn param_bool(node: &NodeData, key: &str) -> Option<bool> {
    node.params.get(key).and_then(|v| v.as_bool())
}

pub(crate) fn require_str(node: &NodeData, key: &str) -> Result<(), GraphError> {
    if param_str(node, key).is_none() {
        return Err(GraphError::BadParams {
            group: node.group.clone(),
            id: node.id.clone(),
            reason: format!("missing string param '{key}'"),
        });
    }
    Ok(())
}
