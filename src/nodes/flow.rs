use evalexpr::{
    build_operator_tree, ContextWithMutableVariables, DefaultNumericTypes, HashMapContext,
};
use serde_json::Value;
use tracing::warn;

use crate::graph::{GraphError, NodeData};
use crate::runtime::activation::NodeInfo;
use crate::runtime::behavior::{
    param_f64, param_str, require_str, BehaviorRegistry, Flow, NodeBehavior, Scope,
};
use crate::runtime::EngineError;

pub fn install(registry: &mut BehaviorRegistry) {
    registry.register(Box::new(ChanceBehavior));
    registry.register(Box::new(ChanceModifierBehavior));
    registry.register(Box::new(RandomBehavior));
    registry.register(Box::new(ExpressionBehavior));
    registry.register(Box::new(SchemeIsActiveBehavior));
    registry.register(Box::new(IsAliveBehavior));
    registry.register(Box::new(IsRelativeBehavior));
    registry.register(Box::new(SameClanBehavior));
    registry.register(Box::new(SameFamilyBehavior));
}

fn forward_bool(flow: &mut Flow, value: bool) {
    flow.forward(if value { "True" } else { "False" });
}

/// Probabilistic branch. The draw uses the authored percentage plus every
/// modifier bonus wired into this node, clamped to [0, 100] by the scope.
pub struct ChanceBehavior;

impl NodeBehavior for ChanceBehavior {
    fn kind(&self) -> &'static str {
        "Chance"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        if param_f64(node, "chance").is_none() {
            return Err(GraphError::BadParams {
                group: node.group.clone(),
                id: node.id.clone(),
                reason: "missing numeric param 'chance'".into(),
            });
        }
        Ok(())
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let base = param_f64(node, "chance").unwrap_or(50.0);
        let percent = base + scope.chance_bonus(&node.id);
        if scope.roll(percent) {
            flow.forward("Success");
        } else {
            flow.forward("Fail");
        }
        Ok(())
    }
}

/// Data node: contributes a variable-sourced bonus to the `Chance` nodes
/// its ports point at. The bonus is precomputed at scheme spawn; reaching
/// the node in normal flow does nothing and ends the branch.
pub struct ChanceModifierBehavior;

impl NodeBehavior for ChanceModifierBehavior {
    fn kind(&self) -> &'static str {
        "ChanceModifier"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "variable")
    }

    fn run(
        &self,
        _node: &NodeData,
        _info: &mut NodeInfo,
        _flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Uniformly picks one of the declared outputs.
pub struct RandomBehavior;

impl NodeBehavior for RandomBehavior {
    fn kind(&self) -> &'static str {
        "Random"
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        if node.outputs.is_empty() {
            return Ok(());
        }
        let index = scope.pick(node.outputs.len());
        flow.forward(node.outputs[index].name.clone());
        Ok(())
    }
}

/// Boolean predicate over graph variables, evaluated with `evalexpr`.
pub struct ExpressionBehavior;

impl NodeBehavior for ExpressionBehavior {
    fn kind(&self) -> &'static str {
        "Expression"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        let Some(expr) = param_str(node, "expr") else {
            return Err(GraphError::BadParams {
                group: node.group.clone(),
                id: node.id.clone(),
                reason: "missing string param 'expr'".into(),
            });
        };
        build_operator_tree::<DefaultNumericTypes>(expr).map_err(|e| GraphError::BadParams {
            group: node.group.clone(),
            id: node.id.clone(),
            reason: format!("expression does not parse: {e}"),
        })?;
        Ok(())
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let expr = param_str(node, "expr").unwrap_or("false");
        let result = eval_bool(expr, scope);
        forward_bool(flow, result);
        Ok(())
    }
}

fn eval_context(scope: &dyn Scope) -> HashMapContext<DefaultNumericTypes> {
    let mut context = HashMapContext::<DefaultNumericTypes>::new();
    for (key, value) in scope.vars_snapshot() {
        let converted = match value {
            Value::String(s) => Some(evalexpr::Value::String(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(evalexpr::Value::Int(i))
                } else {
                    n.as_f64().map(evalexpr::Value::Float)
                }
            }
            Value::Bool(b) => Some(evalexpr::Value::Boolean(b)),
            _ => None,
        };
        if let Some(v) = converted {
            let _ = context.set_value(key, v);
        }
    }
    context
}

/// Evaluate a boolean expression against the scope's variables. Evaluation
/// failures log and take the False path, they never end the scheme.
pub(crate) fn eval_bool(expr: &str, scope: &dyn Scope) -> bool {
    let context = eval_context(scope);
    match evalexpr::eval_boolean_with_context(expr, &context) {
        Ok(result) => result,
        Err(e) => {
            warn!(expr, error = %e, "expression evaluation failed");
            false
        }
    }
}

/// Evaluate an expression to a JSON value for variable assignment.
pub(crate) fn eval_value(expr: &str, scope: &dyn Scope) -> Option<Value> {
    let context = eval_context(scope);
    match evalexpr::eval_with_context(expr, &context) {
        Ok(evalexpr::Value::String(s)) => Some(Value::String(s)),
        Ok(evalexpr::Value::Int(i)) => Some(serde_json::json!(i)),
        Ok(evalexpr::Value::Float(f)) => Some(serde_json::json!(f)),
        Ok(evalexpr::Value::Boolean(b)) => Some(Value::Bool(b)),
        Ok(_) => None,
        Err(e) => {
            warn!(expr, error = %e, "expression evaluation failed");
            None
        }
    }
}

/// True when any instance of the named scheme group is currently running.
pub struct SchemeIsActiveBehavior;

impl NodeBehavior for SchemeIsActiveBehavior {
    fn kind(&self) -> &'static str {
        "SchemeIsActive"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "scheme")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let group = param_str(node, "scheme").unwrap_or_default();
        let active = scope.scheme_active(group);
        forward_bool(flow, active);
        Ok(())
    }
}

fn subject(node: &NodeData, info: &NodeInfo, scope: &dyn Scope) -> Option<crate::world::ActorId> {
    match param_str(node, "who").unwrap_or("actor") {
        "dual" => info.dual.or(scope.target()),
        _ => info.actor.or(Some(scope.conspirator())),
    }
}

pub struct IsAliveBehavior;

impl NodeBehavior for IsAliveBehavior {
    fn kind(&self) -> &'static str {
        "IsAlive"
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let alive = subject(node, info, scope)
            .map(|actor| scope.world().is_alive(actor))
            .unwrap_or(false);
        forward_bool(flow, alive);
        Ok(())
    }
}

/// Compares the activation's actor against its dual actor.
pub struct IsRelativeBehavior;

impl NodeBehavior for IsRelativeBehavior {
    fn kind(&self) -> &'static str {
        "IsRelative"
    }

    fn run(
        &self,
        _node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let a = info.actor.unwrap_or(scope.conspirator());
        let related = match info.dual.or(scope.target()) {
            Some(b) => scope.world().is_relative(a, b),
            None => false,
        };
        forward_bool(flow, related);
        Ok(())
    }
}

pub struct SameClanBehavior;

impl NodeBehavior for SameClanBehavior {
    fn kind(&self) -> &'static str {
        "SameClan"
    }

    fn run(
        &self,
        _node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let a = info.actor.unwrap_or(scope.conspirator());
        let same = match info.dual.or(scope.target()) {
            Some(b) => {
                let world = scope.world();
                match (world.clan_of(a), world.clan_of(b)) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                }
            }
            None => false,
        };
        forward_bool(flow, same);
        Ok(())
    }
}

pub struct SameFamilyBehavior;

impl NodeBehavior for SameFamilyBehavior {
    fn kind(&self) -> &'static str {
        "SameFamily"
    }

    fn run(
        &self,
        _node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let a = info.actor.unwrap_or(scope.conspirator());
        let same = match info.dual.or(scope.target()) {
            Some(b) => {
                let world = scope.world();
                match (world.family_of(a), world.family_of(b)) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                }
            }
            None => false,
        };
        forward_bool(flow, same);
        Ok(())
    }
}
