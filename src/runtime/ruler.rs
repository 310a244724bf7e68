use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::{GraphError, GraphSet};
use crate::hooks::HookRegistry;
use crate::runtime::activation::{NodeInfo, PortKey};
use crate::runtime::behavior::{Flow, FlowOp, FlowOutcome, Scope};
use crate::runtime::context::RuntimeContext;
use crate::runtime::EngineError;
use crate::world::{ActorId, World};

/// One error/warning reported by a rule terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleNote {
    pub name: String,
    pub message: String,
}

/// Outcome of one rule evaluation. Domain failure, not a system error:
/// only error-severity notes flip `passed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub passed: bool,
    pub errors: Vec<RuleNote>,
    pub warnings: Vec<RuleNote>,
}

impl RuleResult {
    /// The vacuous-truth result: absence of a rule passes with empty lists.
    pub fn vacuous() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn failed() -> Self {
        Self {
            passed: false,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Names reported at either severity, in report order.
    pub fn names(&self) -> Vec<&str> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .map(|n| n.name.as_str())
            .collect()
    }
}

/// 规则解释器：一次性、同步地遍历规则图，收集 Error/Warning 终端。
///
/// Shares the node model and behavior registry with the schemer but has no
/// persistence, no delays and no structured loops, only forwarding. Both
/// the blocking and the async entry points run this same code, which is
/// what makes their results identical for the same inputs.
pub struct Ruler {
    nodes: Arc<GraphSet>,
    cx: RuntimeContext,
    conspirator: ActorId,
    target: Option<ActorId>,
    vars: HashMap<String, Value>,
    rng: StdRng,
    next_id: u64,
    errors: Vec<RuleNote>,
    warnings: Vec<RuleNote>,
}

impl Ruler {
    pub fn new(
        nodes: Arc<GraphSet>,
        cx: RuntimeContext,
        conspirator: ActorId,
        target: Option<ActorId>,
    ) -> Self {
        let rng = match cx.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let vars = nodes.variables.clone();
        Self {
            nodes,
            cx,
            conspirator,
            target,
            vars,
            rng,
            next_id: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Walk the graph from `StartRule` until every branch has terminated.
    /// Branches are evaluated in spawn order; all reached terminals are
    /// collected, not just the first.
    pub fn evaluate(mut self) -> Result<RuleResult, EngineError> {
        let group = self.nodes.group.clone();
        let start = self
            .nodes
            .first_of_kind("StartRule")
            .ok_or(GraphError::MissingNode {
                group: group.clone(),
                kind: "StartRule",
            })?;

        let mut queue: VecDeque<NodeInfo> = VecDeque::new();
        self.next_id += 1;
        queue.push_back(NodeInfo::root(
            self.next_id,
            start.id.clone(),
            self.conspirator,
            self.target,
        ));

        let mut steps = 0usize;
        while let Some(mut info) = queue.pop_front() {
            steps += 1;
            if steps > self.cx.config.rule_step_budget {
                return Err(EngineError::RuleBudgetExceeded { group });
            }

            let nodes = self.nodes.clone();
            let Some(node) = nodes.node(&info.node) else {
                continue;
            };
            let behaviors = self.cx.behaviors.clone();
            let Some(behavior) = behaviors.get(&node.kind) else {
                return Err(EngineError::UnsupportedInRule {
                    kind: node.kind.clone(),
                });
            };

            let mut flow = Flow::default();
            behavior.run(node, &mut info, &mut flow, &mut self)?;

            for op in flow.ops {
                match op {
                    FlowOp::Forward { output } => {
                        let Some(out) = node.output(&output) else {
                            continue;
                        };
                        for port in &out.ports {
                            if port.next.is_empty() {
                                continue;
                            }
                            self.next_id += 1;
                            let mut child =
                                NodeInfo::child_of(self.next_id, port.next.clone(), &info);
                            if let Some(actor) = port.actor {
                                child.actor = Some(ActorId(actor as u64));
                            }
                            if !port.next_name.is_empty() || port.actor.is_some() {
                                child.entry = Some(PortKey {
                                    name: port.next_name.clone(),
                                    actor: port.actor,
                                });
                            }
                            queue.push_back(child);
                        }
                    }
                    FlowOp::Finish { outcome } => match outcome {
                        FlowOutcome::SuccessRule => {}
                        FlowOutcome::ErrorRule { name, message } => {
                            self.errors.push(RuleNote { name, message });
                        }
                        FlowOutcome::WarningRule { name, message } => {
                            self.warnings.push(RuleNote { name, message });
                        }
                        other => {
                            return Err(EngineError::UnsupportedInRule {
                                kind: format!("{:?} terminal ({})", other, node.kind),
                            });
                        }
                    },
                    _ => {
                        return Err(EngineError::UnsupportedInRule {
                            kind: node.kind.clone(),
                        });
                    }
                }
            }
        }

        Ok(RuleResult {
            passed: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        })
    }
}

impl Scope for Ruler {
    fn world(&self) -> &dyn World {
        self.cx.world.as_ref()
    }

    fn hooks(&self) -> &HookRegistry {
        self.cx.hooks.as_ref()
    }

    fn conspirator(&self) -> ActorId {
        self.conspirator
    }

    fn target(&self) -> Option<ActorId> {
        self.target
    }

    fn var(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    fn vars_snapshot(&self) -> HashMap<String, Value> {
        self.vars.clone()
    }

    fn roll(&mut self, percent: f64) -> bool {
        let clamped = percent.clamp(0.0, 100.0);
        self.rng.gen_range(0.0..100.0) < clamped
    }

    fn pick(&mut self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            self.rng.gen_range(0..len)
        }
    }

    fn sample(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            min
        } else {
            self.rng.gen_range(min..=max)
        }
    }

    fn chance_bonus(&self, _node_id: &str) -> f64 {
        // Modifier precomputation is a schemer concern; rules see none.
        0.0
    }

    fn scheme_active(&self, group: &str) -> bool {
        self.cx.active.active(group)
    }
}
