use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::graph::loader::{self, GraphDoc, LoadDiagnostic};
use crate::graph::{GraphLibrary, GraphSet};
use crate::hooks::{HookRegistry, ScriptHook};
use crate::nodes;
use crate::present::Presenter;
use crate::runtime::behavior::BehaviorRegistry;
use crate::runtime::context::{EngineConfig, RuntimeContext, SchemeRegistry};
use crate::runtime::ruler::{RuleResult, Ruler};
use crate::runtime::schemer::{SchemeResult, Schemer};
use crate::runtime::snapshot::SchemeSnapshot;
use crate::runtime::EngineError;
use crate::world::{ActorId, World};

/// 引擎门面：注册表、图库与所有运行中的 Scheme 实例。
///
/// Owns the runtime context and drives every instance from the host's
/// frame loop. There are no statics: tearing the engine down releases
/// everything it registered.
pub struct Engine {
    cx: RuntimeContext,
    instances: HashMap<Uuid, Schemer>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        world: Arc<dyn World>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let mut behaviors = BehaviorRegistry::new();
        nodes::install(&mut behaviors);
        Self {
            cx: RuntimeContext {
                behaviors: Arc::new(behaviors),
                hooks: Arc::new(HookRegistry::new()),
                world,
                presenter,
                library: Arc::new(GraphLibrary::new()),
                active: Arc::new(SchemeRegistry::new()),
                config,
            },
            instances: HashMap::new(),
        }
    }

    /// The engine's runtime context, cloneable into workers.
    pub fn context(&self) -> RuntimeContext {
        self.cx.clone()
    }

    pub fn register_hook(&self, name: &str, hook: impl ScriptHook + 'static) -> bool {
        self.cx.hooks.register(name, hook)
    }

    // ------------------------------------------------------------------
    // Graph loading
    // ------------------------------------------------------------------

    pub fn load_doc(&self, doc: GraphDoc) -> Result<Vec<LoadDiagnostic>, EngineError> {
        let (set, diagnostics) = loader::assemble(doc, &self.cx.behaviors)?;
        info!(group = %set.group, nodes = set.len(), "graph group loaded");
        self.cx.library.insert(set);
        Ok(diagnostics)
    }

    pub fn load_str(&self, source: &str) -> Result<Vec<LoadDiagnostic>, EngineError> {
        let (sets, diagnostics) = loader::load_str(source, &self.cx.behaviors)?;
        for set in sets {
            info!(group = %set.group, nodes = set.len(), "graph group loaded");
            self.cx.library.insert(set);
        }
        Ok(diagnostics)
    }

    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<Vec<LoadDiagnostic>, EngineError> {
        let (sets, diagnostics) = loader::load_path(path, &self.cx.behaviors)?;
        for set in sets {
            info!(group = %set.group, nodes = set.len(), "graph group loaded");
            self.cx.library.insert(set);
        }
        Ok(diagnostics)
    }

    pub fn graph(&self, group: &str) -> Option<Arc<GraphSet>> {
        self.cx.library.get(group)
    }

    // ------------------------------------------------------------------
    // Scheme lifecycle
    // ------------------------------------------------------------------

    pub fn start_scheme(
        &mut self,
        group: &str,
        conspirator: ActorId,
        target: Option<ActorId>,
    ) -> Result<Uuid, EngineError> {
        self.start_scheme_with(group, conspirator, target, |_| {})
    }

    /// Start a scheme with a terminal callback, invoked exactly once when
    /// the instance finalizes (never for an external kill).
    pub fn start_scheme_with(
        &mut self,
        group: &str,
        conspirator: ActorId,
        target: Option<ActorId>,
        on_end: impl FnMut(SchemeResult) + Send + 'static,
    ) -> Result<Uuid, EngineError> {
        let nodes = self
            .cx
            .library
            .get(group)
            .ok_or_else(|| crate::graph::GraphError::UnknownGroup(group.to_string()))?;
        let id = Uuid::new_v4();
        let schemer = Schemer::start(
            id,
            nodes,
            self.cx.clone(),
            conspirator,
            target,
            Some(Box::new(on_end)),
        )?;
        // The first drain may already have finished the whole graph.
        if !schemer.is_destroyed() {
            self.instances.insert(id, schemer);
        }
        Ok(id)
    }

    /// Rebuild an instance from a snapshot, preserving the activation tree
    /// shape and all remaining delay times.
    pub fn restore_scheme(
        &mut self,
        snapshot: SchemeSnapshot,
        on_end: impl FnMut(SchemeResult) + Send + 'static,
    ) -> Result<Uuid, EngineError> {
        let nodes = self
            .cx
            .library
            .get(&snapshot.group)
            .ok_or_else(|| crate::graph::GraphError::UnknownGroup(snapshot.group.clone()))?;
        let id = Uuid::new_v4();
        let schemer = Schemer::restore(id, nodes, self.cx.clone(), snapshot, Some(Box::new(on_end)));
        self.instances.insert(id, schemer);
        Ok(id)
    }

    pub fn snapshot(&self, scheme: Uuid) -> Result<SchemeSnapshot, EngineError> {
        self.instances
            .get(&scheme)
            .map(|s| s.snapshot())
            .ok_or(EngineError::UnknownScheme(scheme))
    }

    /// Advance every running instance by one host frame and sweep the ones
    /// that ended, returning their results.
    pub fn tick(&mut self, dt: f64) -> Vec<(Uuid, SchemeResult)> {
        let scaled = dt * self.cx.config.time_scale;
        for schemer in self.instances.values_mut() {
            schemer.tick(scaled, dt);
        }
        let mut finished = Vec::new();
        self.instances.retain(|id, schemer| {
            if schemer.is_destroyed() {
                finished.push((*id, schemer.result()));
                false
            } else {
                true
            }
        });
        finished
    }

    pub fn pause(&mut self, scheme: Uuid) -> Result<(), EngineError> {
        self.schemer_mut(scheme)?.pause();
        Ok(())
    }

    pub fn resume(&mut self, scheme: Uuid) -> Result<(), EngineError> {
        self.schemer_mut(scheme)?.resume();
        Ok(())
    }

    /// Synchronously destroy an instance. Every outstanding delay is
    /// cancelled before this returns; the terminal callback does not fire.
    pub fn kill_scheme(&mut self, scheme: Uuid) -> Result<(), EngineError> {
        let mut schemer = self
            .instances
            .remove(&scheme)
            .ok_or(EngineError::UnknownScheme(scheme))?;
        schemer.kill();
        Ok(())
    }

    pub fn scheme_active(&self, group: &str) -> bool {
        self.cx.active.active(group)
    }

    pub fn scheme(&self, scheme: Uuid) -> Option<&Schemer> {
        self.instances.get(&scheme)
    }

    pub fn scheme_mut(&mut self, scheme: Uuid) -> Option<&mut Schemer> {
        self.instances.get_mut(&scheme)
    }

    fn schemer_mut(&mut self, scheme: Uuid) -> Result<&mut Schemer, EngineError> {
        self.instances
            .get_mut(&scheme)
            .ok_or(EngineError::UnknownScheme(scheme))
    }

    // ------------------------------------------------------------------
    // Host completions
    // ------------------------------------------------------------------

    pub fn choose(&mut self, scheme: Uuid, activation: u64, option: &str) -> Result<(), EngineError> {
        self.schemer_mut(scheme)?.choose(activation, option)
    }

    pub fn sound_finished(&mut self, scheme: Uuid, activation: u64) -> Result<(), EngineError> {
        self.schemer_mut(scheme)?.sound_finished(activation)
    }

    /// Open a named gate on one instance's delay registry (host-raised
    /// trigger for gated delays).
    pub fn open_gate(&mut self, scheme: Uuid, name: &str) -> Result<bool, EngineError> {
        Ok(self.schemer_mut(scheme)?.open_gate(name))
    }

    // ------------------------------------------------------------------
    // Rule evaluation
    // ------------------------------------------------------------------

    /// Blocking rule check. A `None` conspirator fails fast without loading
    /// any node list; an unknown rule group passes vacuously.
    pub fn check_rule(
        &self,
        rule: &str,
        conspirator: Option<ActorId>,
        target: Option<ActorId>,
    ) -> Result<RuleResult, EngineError> {
        let Some(conspirator) = conspirator else {
            warn!(rule, "rule check with no conspirator fails fast");
            return Ok(RuleResult::failed());
        };
        let Some(nodes) = self.cx.library.get(rule) else {
            return Ok(RuleResult::vacuous());
        };
        Ruler::new(nodes, self.cx.clone(), conspirator, target).evaluate()
    }

    /// Asynchronous rule check: the same evaluation offloaded to a blocking
    /// worker, completion signalled through a oneshot channel. For the same
    /// inputs the delivered result matches [`check_rule`](Self::check_rule)
    /// exactly, stochastic nodes aside.
    pub fn check_rule_async(
        &self,
        rule: &str,
        conspirator: Option<ActorId>,
        target: Option<ActorId>,
    ) -> oneshot::Receiver<Result<RuleResult, EngineError>> {
        let (tx, rx) = oneshot::channel();
        let Some(conspirator) = conspirator else {
            let _ = tx.send(Ok(RuleResult::failed()));
            return rx;
        };
        let Some(nodes) = self.cx.library.get(rule) else {
            let _ = tx.send(Ok(RuleResult::vacuous()));
            return rx;
        };
        let cx = self.cx.clone();
        tokio::task::spawn_blocking(move || {
            let result = Ruler::new(nodes, cx, conspirator, target).evaluate();
            let _ = tx.send(result);
        });
        rx
    }
}
