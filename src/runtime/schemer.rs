use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::graph::{GraphError, GraphSet, NodeData, PortData, ValidatorMode};
use crate::hooks::{HookArgs, HookRegistry};
use crate::present::{DialogueRequest, Notification, SoundRequest};
use crate::runtime::activation::{NodeInfo, ParentRole, PortKey, Suspend};
use crate::runtime::behavior::{Flow, FlowOp, FlowOutcome, Scope};
use crate::runtime::context::RuntimeContext;
use crate::runtime::delay::{DelayRegistry, DelaySpec};
use crate::runtime::ruler::{RuleResult, Ruler};
use crate::runtime::snapshot::SchemeSnapshot;
use crate::runtime::EngineError;
use crate::world::{ActorId, World};

/// Final outcome reported to the host when a scheme instance ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SchemeResult {
    #[default]
    Success,
    Fail,
}

/// Wake commands carried by the delay registry. Plain data so delays
/// round-trip through snapshots with their remaining time intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Wake {
    /// A wait finished: forward the activation along the named output.
    Forward { act: u64, output: String },
    /// A trigger deadline lapsed: take the timeout path.
    Expire { act: u64 },
    /// Re-evaluate the validator bound to this activation.
    Poll { act: u64 },
    /// Never fires; placeholder wake for forever (cancel-only) delays.
    Idle,
}

pub(crate) type EndCallback = Box<dyn FnMut(SchemeResult) + Send>;

/// 长生命周期的故事解释器：活动节点追踪、延迟执行、校验轮询、暂停/恢复。
///
/// One instance per running scheme. All mutation happens inside `tick`
/// (and the host-completion entry points), on the host's logical thread.
/// There is no interior locking because there is no concurrent writer.
pub struct Schemer {
    id: Uuid,
    group: String,
    nodes: Arc<GraphSet>,
    cx: RuntimeContext,

    conspirator: ActorId,
    target: Option<ActorId>,

    vars: HashMap<String, Value>,
    acts: BTreeMap<u64, NodeInfo>,
    queue: VecDeque<u64>,
    delays: DelayRegistry<Wake>,
    /// Chance-node id → summed modifier bonus, precomputed at spawn.
    bonuses: HashMap<String, f64>,

    rng: StdRng,
    next_act: u64,
    paused: bool,
    ended: bool,
    finalized: bool,
    destroyed: bool,
    result: SchemeResult,
    on_end: Option<EndCallback>,
}

impl Schemer {
    /// Spawn a fresh instance from the authored template. Fatal when the
    /// graph has no `Start` or no `End` node.
    pub(crate) fn start(
        id: Uuid,
        nodes: Arc<GraphSet>,
        cx: RuntimeContext,
        conspirator: ActorId,
        target: Option<ActorId>,
        on_end: Option<EndCallback>,
    ) -> Result<Self, EngineError> {
        let start_id = nodes
            .first_of_kind("Start")
            .map(|n| n.id.clone())
            .ok_or(GraphError::MissingNode {
                group: nodes.group.clone(),
                kind: "Start",
            })?;
        if nodes.first_of_kind("End").is_none() {
            return Err(GraphError::MissingNode {
                group: nodes.group.clone(),
                kind: "End",
            }
            .into());
        }

        let mut schemer = Self::empty(id, nodes, cx, conspirator, target, on_end);
        schemer.bonuses = compute_bonuses(
            &schemer.nodes,
            schemer.cx.world.as_ref(),
            conspirator,
            target,
        );
        schemer.cx.active.enter(&schemer.group);

        let root_id = schemer.alloc_id();
        let root = NodeInfo::root(root_id, start_id, conspirator, target);
        schemer.acts.insert(root_id, root);
        schemer.queue.push_back(root_id);
        schemer.drain();
        Ok(schemer)
    }

    /// Rebuild an instance from a serialized snapshot. The activation tree
    /// keeps the shape it had at save time: parents whose children survived
    /// are not re-run: nothing is queued here, so only restored delays and
    /// trigger checks can wake the graph.
    pub(crate) fn restore(
        id: Uuid,
        nodes: Arc<GraphSet>,
        cx: RuntimeContext,
        snapshot: SchemeSnapshot,
        on_end: Option<EndCallback>,
    ) -> Self {
        let mut schemer = Self::empty(
            id,
            nodes,
            cx,
            snapshot.conspirator,
            snapshot.target,
            on_end,
        );
        schemer.paused = snapshot.paused;
        schemer.ended = snapshot.ended;
        schemer.result = snapshot.result;
        schemer.vars = snapshot.vars;
        schemer.acts = snapshot
            .activations
            .into_iter()
            .map(|a| (a.id, a))
            .collect();
        schemer.delays = DelayRegistry::from_records(snapshot.delays, snapshot.paused);
        schemer.next_act = snapshot.next_activation;
        schemer.bonuses = compute_bonuses(
            &schemer.nodes,
            schemer.cx.world.as_ref(),
            schemer.conspirator,
            schemer.target,
        );
        schemer.cx.active.enter(&schemer.group);

        // Re-present dialogues the snapshot left open.
        let reopen: Vec<DialogueRequest> = schemer
            .acts
            .values()
            .filter_map(|info| match &info.suspend {
                Some(Suspend::Dialogue(spec)) => Some(DialogueRequest {
                    scheme: schemer.id,
                    activation: info.id,
                    spec: spec.clone(),
                }),
                _ => None,
            })
            .collect();
        for request in reopen {
            schemer.cx.presenter.open_dialogue(request);
        }
        schemer
    }

    fn empty(
        id: Uuid,
        nodes: Arc<GraphSet>,
        cx: RuntimeContext,
        conspirator: ActorId,
        target: Option<ActorId>,
        on_end: Option<EndCallback>,
    ) -> Self {
        let rng = match cx.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let vars = nodes.variables.clone();
        Self {
            id,
            group: nodes.group.clone(),
            nodes,
            cx,
            conspirator,
            target,
            vars,
            acts: BTreeMap::new(),
            queue: VecDeque::new(),
            delays: DelayRegistry::new(),
            bonuses: HashMap::new(),
            rng,
            next_act: 0,
            paused: false,
            ended: false,
            finalized: false,
            destroyed: false,
            result: SchemeResult::Success,
            on_end,
        }
    }

    /// Serialize the live execution state. Meaningful between ticks: the
    /// run queue always drains within a tick, so every persisted activation
    /// is either suspended or a parent awaiting children.
    pub fn snapshot(&self) -> SchemeSnapshot {
        SchemeSnapshot {
            group: self.group.clone(),
            conspirator: self.conspirator,
            target: self.target,
            paused: self.paused,
            ended: self.ended,
            result: self.result,
            vars: self.vars.clone(),
            activations: self.acts.values().cloned().collect(),
            delays: self.delays.records(),
            next_activation: self.next_act,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn result(&self) -> SchemeResult {
        self.result
    }

    pub fn active_count(&self) -> usize {
        self.acts.len()
    }

    pub fn activations(&self) -> impl Iterator<Item = &NodeInfo> {
        self.acts.values()
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    // ------------------------------------------------------------------
    // Tick driver
    // ------------------------------------------------------------------

    /// Advance the instance by one host frame. A no-op while paused: delays
    /// hold their remaining time and no queued activation runs.
    pub fn tick(&mut self, scaled_dt: f64, unscaled_dt: f64) {
        if self.paused || self.destroyed {
            return;
        }
        for info in self.acts.values_mut() {
            info.time += scaled_dt;
        }
        self.check_triggers();
        for (_, wake) in self.delays.tick(scaled_dt, unscaled_dt) {
            self.handle_wake(wake);
            if self.destroyed {
                return;
            }
        }
        self.drain();
    }

    fn drain(&mut self) {
        while let Some(id) = self.queue.pop_front() {
            self.step(id);
            if self.destroyed {
                return;
            }
        }
    }

    fn step(&mut self, id: u64) {
        let Some(mut info) = self.acts.remove(&id) else {
            return;
        };
        let nodes = self.nodes.clone();
        let Some(node) = nodes.node(&info.node) else {
            warn!(scheme = %self.id, node = %info.node, "activation references unknown node");
            self.retire(info);
            return;
        };
        let behaviors = self.cx.behaviors.clone();
        let Some(behavior) = behaviors.get(&node.kind) else {
            error!(scheme = %self.id, kind = %node.kind, "no behavior for node kind");
            self.retire(info);
            return;
        };

        let mut flow = Flow::default();
        if let Err(e) = behavior.run(node, &mut info, &mut flow, self) {
            error!(scheme = %self.id, node = %node.id, error = %e, "node run failed, ending branch");
            self.retire(info);
            return;
        }
        self.apply(info, node, flow.ops);
    }

    /// Interpret the effects a node requested. An empty list retires the
    /// branch; "no outgoing edge" is valid terminal behavior everywhere.
    fn apply(&mut self, mut info: NodeInfo, node: &NodeData, ops: Vec<FlowOp>) {
        let mut keep = false;
        for op in ops {
            match op {
                FlowOp::Forward { output } => {
                    self.forward_output(&info, node, &output);
                }
                FlowOp::Stay => {
                    keep = true;
                }
                FlowOp::Spawn { output, role } => {
                    self.spawn_children(&info, node, &output, role);
                    // Background children detach; the spawner does not wait.
                    if role != ParentRole::Background {
                        keep = true;
                    }
                }
                FlowOp::FanOut { output, actors } => {
                    self.spawn_fanout(&info, node, &output, &actors);
                }
                FlowOp::Wait { seconds, output } => {
                    let name = format!("wait:{}", info.id);
                    self.delays.schedule(
                        DelaySpec::once(seconds).named(&name),
                        Wake::Forward {
                            act: info.id,
                            output,
                        },
                    );
                    info.delays.push(name);
                    info.suspend = Some(Suspend::Wait);
                    keep = true;
                }
                FlowOp::WaitGate {
                    hook,
                    timeout,
                    fire,
                    expire,
                } => {
                    let name = format!("trigger:{}", info.id);
                    self.delays.schedule(
                        DelaySpec::once(timeout).named(&name),
                        Wake::Expire { act: info.id },
                    );
                    info.delays.push(name);
                    info.suspend = Some(Suspend::Trigger { hook, fire, expire });
                    keep = true;
                }
                FlowOp::Dialogue { spec } => {
                    let name = format!("dialogue:{}", info.id);
                    self.delays
                        .schedule(DelaySpec::forever().named(&name), Wake::Idle);
                    info.delays.push(name);
                    info.suspend = Some(Suspend::Dialogue(spec.clone()));
                    self.cx.presenter.open_dialogue(DialogueRequest {
                        scheme: self.id,
                        activation: info.id,
                        spec,
                    });
                    keep = true;
                }
                FlowOp::Sound {
                    spec,
                    wait_end,
                    output,
                } => {
                    self.cx.presenter.play_sound(SoundRequest {
                        scheme: self.id,
                        activation: info.id,
                        spec,
                        wait_end,
                    });
                    if wait_end {
                        let name = format!("sound:{}", info.id);
                        self.delays
                            .schedule(DelaySpec::forever().named(&name), Wake::Idle);
                        info.delays.push(name);
                        info.suspend = Some(Suspend::Sound { output });
                        keep = true;
                    } else {
                        self.forward_output(&info, node, &output);
                    }
                }
                FlowOp::Notify { spec } => {
                    self.cx.presenter.notify(Notification {
                        scheme: self.id,
                        spec,
                    });
                }
                FlowOp::Validator { rule } => {
                    let name = format!("poll:{}", info.id);
                    self.delays.schedule(
                        DelaySpec::looping(self.cx.config.validator_period).named(&name),
                        Wake::Poll { act: info.id },
                    );
                    info.delays.push(name);
                    info.rule = Some(rule);
                    keep = true;
                }
                FlowOp::Finish { outcome } => match outcome {
                    FlowOutcome::EndScheme => {
                        self.ended = true;
                    }
                    FlowOutcome::SuccessScheme => {
                        self.result = SchemeResult::Success;
                        self.ended = true;
                    }
                    FlowOutcome::FailScheme => {
                        self.result = SchemeResult::Fail;
                        self.ended = true;
                    }
                    other => {
                        error!(scheme = %self.id, outcome = ?other, "rule terminal outside rule evaluation");
                    }
                },
            }
        }
        if keep {
            self.acts.insert(info.id, info);
        } else {
            self.retire(info);
        }
    }

    // ------------------------------------------------------------------
    // Spawning and forwarding
    // ------------------------------------------------------------------

    fn alloc_id(&mut self) -> u64 {
        self.next_act += 1;
        self.next_act
    }

    fn forward_output(&mut self, from: &NodeInfo, node: &NodeData, output: &str) {
        // Absent output = the branch ends here, silently.
        let Some(out) = node.output(output) else {
            return;
        };
        // Ports are activated in declaration order within this same tick.
        for port in &out.ports {
            self.spawn_port(from, port, None, None);
        }
    }

    fn spawn_children(
        &mut self,
        parent: &NodeInfo,
        node: &NodeData,
        output: &str,
        role: ParentRole,
    ) {
        let Some(out) = node.output(output) else {
            return;
        };
        for port in &out.ports {
            self.spawn_port(parent, port, None, Some((role, parent.id)));
        }
    }

    /// Fan out one child per actor along the named output.
    fn spawn_fanout(&mut self, from: &NodeInfo, node: &NodeData, output: &str, actors: &[ActorId]) {
        let Some(out) = node.output(output) else {
            return;
        };
        for actor in actors {
            for port in &out.ports {
                self.spawn_port(from, port, Some(*actor), None);
            }
        }
    }

    fn spawn_port(
        &mut self,
        from: &NodeInfo,
        port: &PortData,
        actor_override: Option<ActorId>,
        link: Option<(ParentRole, u64)>,
    ) {
        if port.next.is_empty() {
            return;
        }
        if self.nodes.node(&port.next).is_none() {
            // Pruned at load; anything left is a defensive no-op.
            warn!(scheme = %self.id, target = %port.next, "edge to unknown node ignored");
            return;
        }
        let id = self.alloc_id();
        let mut child = NodeInfo::child_of(id, port.next.clone(), from);
        if let Some(actor) = actor_override {
            child.actor = Some(actor);
        } else if let Some(actor) = port.actor {
            child.actor = Some(ActorId(actor as u64));
        }
        if !port.next_name.is_empty() || port.actor.is_some() {
            child.entry = Some(PortKey {
                name: port.next_name.clone(),
                actor: port.actor,
            });
        }
        if let Some((role, parent)) = link {
            child.link(role, parent);
        }
        self.acts.insert(id, child);
        self.queue.push_back(id);
    }

    // ------------------------------------------------------------------
    // Branch retirement, the single convergence point
    // ------------------------------------------------------------------

    /// Retire a completed branch: cancel its delays, re-trigger structured
    /// parents left without children, and detect whole-graph completion.
    fn retire(&mut self, info: NodeInfo) {
        for name in &info.delays {
            self.delays.cancel(name);
        }
        let nodes = self.nodes.clone();
        let behaviors = self.cx.behaviors.clone();
        if let Some(node) = nodes.node(&info.node) {
            if let Some(behavior) = behaviors.get(&node.kind) {
                behavior.end(&info);
            }
        }

        if self.destroyed {
            return;
        }

        // Innermost structured parent wins; at most one re-trigger.
        if let Some(parent) = info.repeater {
            if !self.has_children_of(parent) {
                self.retrigger(parent, ParentRole::Repeater);
            }
        } else if let Some(parent) = info.sequencer {
            if !self.has_children_of(parent) {
                self.retrigger(parent, ParentRole::Sequencer);
            }
        } else if let Some(parent) = info.validator {
            if !self.has_children_of(parent) {
                // A validator with no remaining children is retired outright.
                self.kill_activation(parent);
            }
        }

        self.check_completion();
    }

    fn has_children_of(&self, parent: u64) -> bool {
        self.acts.values().any(|a| {
            a.sequencer == Some(parent) || a.repeater == Some(parent) || a.validator == Some(parent)
        })
    }

    fn retrigger(&mut self, parent: u64, role: ParentRole) {
        let Some(info) = self.acts.get_mut(&parent) else {
            return;
        };
        match role {
            ParentRole::Repeater => info.repeat += 1,
            ParentRole::Sequencer => info.index += 1,
            _ => {}
        }
        self.queue.push_back(parent);
    }

    fn kill_activation(&mut self, id: u64) {
        if let Some(info) = self.acts.remove(&id) {
            self.retire(info);
        }
    }

    /// Remove a branch without convergence processing. Used for mass
    /// clears (interrupts, kills) where re-triggering parents would fight
    /// the clear itself.
    fn quiet_kill(&mut self, id: u64) {
        if let Some(info) = self.acts.remove(&id) {
            for name in &info.delays {
                self.delays.cancel(name);
            }
        }
        self.queue.retain(|q| *q != id);
    }

    fn has_foreground(&self) -> bool {
        self.acts.values().any(|a| !a.background)
    }

    fn check_completion(&mut self) {
        if self.has_foreground() {
            return;
        }
        if self.ended {
            self.finalize();
        } else {
            // Natural completion by exhaustion: converge on the End node so
            // both completion paths share one finalization.
            self.ended = true;
            self.stop_validators();
            self.force_end();
        }
    }

    fn stop_validators(&mut self) {
        let names: Vec<String> = self
            .acts
            .values()
            .filter(|a| a.rule.is_some())
            .flat_map(|a| a.delays.iter().cloned())
            .collect();
        for name in names {
            self.delays.cancel(&name);
        }
    }

    fn force_end(&mut self) {
        let end_id = self.nodes.first_of_kind("End").map(|n| n.id.clone());
        match end_id {
            Some(end) => {
                let id = self.alloc_id();
                let info = NodeInfo::root(id, end, self.conspirator, self.target);
                self.acts.insert(id, info);
                self.queue.push_back(id);
            }
            None => {
                // Checked at spawn; only restored legacy data can get here.
                warn!(scheme = %self.id, "graph has no End node, finalizing directly");
                self.finalize();
            }
        }
    }

    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.destroyed = true;
        self.delays.cancel_all();
        self.acts.clear();
        self.queue.clear();
        self.cx.presenter.close_dialogues(self.id);
        self.cx.active.leave(&self.group);
        info!(scheme = %self.id, group = %self.group, result = ?self.result, "scheme ended");
        if let Some(mut callback) = self.on_end.take() {
            callback(self.result);
        }
    }

    /// Tear the instance down without running the terminal callback.
    /// Nothing owned by this instance fires after this returns.
    pub fn kill(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.delays.cancel_all();
        self.acts.clear();
        self.queue.clear();
        self.cx.active.leave(&self.group);
        debug!(scheme = %self.id, "scheme killed");
    }

    // ------------------------------------------------------------------
    // Wakes, triggers and host completions
    // ------------------------------------------------------------------

    fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Forward { act, output } => self.release(act, &output),
            Wake::Expire { act } => {
                let expire = match self.acts.get(&act).map(|a| &a.suspend) {
                    Some(Some(Suspend::Trigger { expire, .. })) => expire.clone(),
                    _ => return,
                };
                self.release(act, &expire);
            }
            Wake::Poll { act } => self.poll_validator(act),
            Wake::Idle => {}
        }
    }

    /// Cancel a suspended activation's delays and forward it. The shared
    /// exit for waits, trigger fires, dialogue choices and sound ends.
    fn release(&mut self, act: u64, output: &str) {
        let Some(mut info) = self.acts.remove(&act) else {
            return;
        };
        for name in info.delays.drain(..) {
            self.delays.cancel(&name);
        }
        info.suspend = None;
        let nodes = self.nodes.clone();
        if let Some(node) = nodes.node(&info.node) {
            self.forward_output(&info, node, output);
        }
        self.retire(info);
    }

    fn check_triggers(&mut self) {
        let mut fired: Vec<(u64, String)> = Vec::new();
        for (id, info) in &self.acts {
            if let Some(Suspend::Trigger { hook, fire, .. }) = &info.suspend {
                let args = HookArgs {
                    conspirator: self.conspirator,
                    target: self.target,
                    world: self.cx.world.as_ref(),
                };
                if self.cx.hooks.flag(hook, args) {
                    fired.push((*id, fire.clone()));
                }
            }
        }
        for (id, output) in fired {
            self.release(id, &output);
        }
    }

    /// Host reports a dialogue choice. The spawned continuation runs on the
    /// next unpaused tick.
    pub fn choose(&mut self, act: u64, option: &str) -> Result<(), EngineError> {
        match self.acts.get(&act) {
            Some(info) => match &info.suspend {
                Some(Suspend::Dialogue(spec)) => {
                    if !spec.options.iter().any(|o| o == option) {
                        warn!(scheme = %self.id, option, "dialogue choice not among options");
                    }
                    let output = option.to_string();
                    self.release(act, &output);
                    Ok(())
                }
                _ => Err(EngineError::InvalidCompletion {
                    activation: act,
                    expected: "dialogue",
                }),
            },
            None => Err(EngineError::UnknownActivation(act)),
        }
    }

    /// Host reports that a waited-on sound finished playing.
    pub fn sound_finished(&mut self, act: u64) -> Result<(), EngineError> {
        match self.acts.get(&act) {
            Some(info) => match &info.suspend {
                Some(Suspend::Sound { output }) => {
                    let output = output.clone();
                    self.release(act, &output);
                    Ok(())
                }
                _ => Err(EngineError::InvalidCompletion {
                    activation: act,
                    expected: "sound",
                }),
            },
            None => Err(EngineError::UnknownActivation(act)),
        }
    }

    // ------------------------------------------------------------------
    // Validator polling
    // ------------------------------------------------------------------

    fn poll_validator(&mut self, act: u64) {
        if self.ended {
            return;
        }
        let (rule, node_id) = match self.acts.get(&act) {
            Some(info) => match &info.rule {
                Some(rule) => (rule.clone(), info.node.clone()),
                None => return,
            },
            None => return,
        };

        let result = match self.cx.library.get(&rule) {
            Some(set) => {
                let ruler = Ruler::new(set, self.cx.clone(), self.conspirator, self.target);
                match ruler.evaluate() {
                    Ok(result) => result,
                    Err(e) => {
                        error!(scheme = %self.id, rule = %rule, error = %e, "validator rule evaluation failed");
                        RuleResult::failed()
                    }
                }
            }
            // Absence of a rule is vacuously true.
            None => return,
        };
        if result.passed {
            return;
        }

        let names = result.names();
        let nodes = self.nodes.clone();
        let Some(node) = nodes.node(&node_id) else {
            return;
        };

        // Break-mode outputs take precedence, in declaration order; the
        // first match wins and interrupts hard.
        for out in &node.outputs {
            if out.mode == ValidatorMode::Break && names.contains(&out.name.as_str()) {
                debug!(scheme = %self.id, output = %out.name, "validator break");
                self.hard_interrupt(act, &out.name);
                return;
            }
        }
        for out in &node.outputs {
            if out.mode == ValidatorMode::Active && names.contains(&out.name.as_str()) {
                debug!(scheme = %self.id, output = %out.name, "validator interrupt");
                self.soft_interrupt(act, &out.name);
                return;
            }
        }

        // No matching handler (or no outputs at all): the validator is
        // considered failed and the scheme ends in failure.
        self.result = SchemeResult::Fail;
        self.ended = true;
        let others: Vec<u64> = self.acts.keys().copied().collect();
        for id in others {
            self.quiet_kill(id);
        }
        self.force_end();
    }

    /// Clear every other branch and redirect flow through the validator's
    /// matched break output.
    fn hard_interrupt(&mut self, act: u64, output: &str) {
        let others: Vec<u64> = self.acts.keys().copied().filter(|id| *id != act).collect();
        for id in others {
            self.quiet_kill(id);
        }
        self.queue.clear();
        self.release(act, output);
    }

    /// Clear only the validator's own subtree, then redirect it.
    fn soft_interrupt(&mut self, act: u64, output: &str) {
        let children: Vec<u64> = self
            .acts
            .iter()
            .filter(|(id, info)| **id != act && info.validator == Some(act))
            .map(|(id, _)| *id)
            .collect();
        for id in children {
            self.quiet_kill(id);
        }
        self.release(act, output);
    }

    // ------------------------------------------------------------------
    // Interruption and pause
    // ------------------------------------------------------------------

    /// Redirect flow through one branch: end every other branch, cancel the
    /// kept branch's delays and forward it along `output`. `spare_dialogues`
    /// leaves dialogue-suspended branches running.
    pub fn continue_flow(
        &mut self,
        keep: u64,
        output: &str,
        close_dialogues: bool,
        spare_dialogues: bool,
    ) -> Result<(), EngineError> {
        if !self.acts.contains_key(&keep) {
            return Err(EngineError::UnknownActivation(keep));
        }
        if close_dialogues {
            self.cx.presenter.close_dialogues(self.id);
        }
        let mut spared = self.ancestors_of(keep);
        spared.push(keep);
        let victims: Vec<u64> = self
            .acts
            .iter()
            .filter(|(id, info)| {
                !spared.contains(id)
                    && !(spare_dialogues && matches!(info.suspend, Some(Suspend::Dialogue(_))))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in victims {
            self.quiet_kill(id);
        }
        self.release(keep, output);
        Ok(())
    }

    fn ancestors_of(&self, id: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cursor = self.acts.get(&id);
        while let Some(info) = cursor {
            let parent = info
                .repeater
                .or(info.sequencer)
                .or(info.validator)
                .filter(|p| !out.contains(p));
            match parent {
                Some(p) => {
                    out.push(p);
                    cursor = self.acts.get(&p);
                }
                None => break,
            }
        }
        out
    }

    /// Stop every outstanding delay, preserving remaining time. No node
    /// executes while paused: `tick` is a no-op until resume.
    pub fn pause(&mut self) {
        self.paused = true;
        self.delays.halt();
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.delays.unhalt();
    }

    /// Open a named gate on this instance's delay registry (host-raised).
    pub fn open_gate(&mut self, name: &str) -> bool {
        self.delays.open_gate(name)
    }
}

// ----------------------------------------------------------------------
// Chance-modifier aggregation
// ----------------------------------------------------------------------

/// Precompute the summed bonus each `ChanceModifier` contributes to the
/// `Chance` nodes it is wired into. The modifier's output name selects the
/// variable source: Conspirator, Target, or the world's global table;
/// any other name reads the graph's variable template.
fn compute_bonuses(
    nodes: &GraphSet,
    world: &dyn World,
    conspirator: ActorId,
    target: Option<ActorId>,
) -> HashMap<String, f64> {
    let mut bonuses: HashMap<String, f64> = HashMap::new();
    for node in nodes.nodes() {
        if node.kind != "ChanceModifier" {
            continue;
        }
        let Some(variable) = node.params.get("variable").and_then(|v| v.as_str()) else {
            continue;
        };
        let positive = node
            .params
            .get("positive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let opposite = node
            .params
            .get("opposite")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        for output in &node.outputs {
            let raw = match output.name.as_str() {
                "Conspirator" => world.actor_var(conspirator, variable),
                "Target" => target.and_then(|t| world.actor_var(t, variable)),
                "Global" => world.global_var(variable),
                _ => nodes.variables.get(variable).cloned(),
            };
            let mut value = raw.and_then(|v| v.as_f64()).unwrap_or(0.0);
            if opposite {
                value = 100.0 - value;
            }
            if !positive {
                value = -value;
            }
            for port in &output.ports {
                let Some(target_node) = nodes.node(&port.next) else {
                    continue;
                };
                if target_node.kind != "Chance" {
                    continue;
                }
                *bonuses.entry(target_node.id.clone()).or_insert(0.0) += value;
            }
        }
    }
    bonuses
}

impl Scope for Schemer {
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

    fn chance_bonus(&self, node_id: &str) -> f64 {
        self.bonuses.get(node_id).copied().unwrap_or(0.0)
    }

    fn scheme_active(&self, group: &str) -> bool {
        self.cx.active.active(group)
    }
}
