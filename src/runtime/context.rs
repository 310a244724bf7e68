use std::sync::Arc;

use dashmap::DashMap;

use crate::graph::GraphLibrary;
use crate::hooks::HookRegistry;
use crate::present::Presenter;
use crate::runtime::behavior::BehaviorRegistry;
use crate::world::World;

/// Engine-wide tunables. Plain data, passed in at construction; there is
/// no global configuration state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Seconds between validator re-evaluations.
    pub validator_period: f64,
    /// Game-time multiplier applied to the host frame delta.
    pub time_scale: f64,
    /// Hard cap on rule-evaluation steps, guarding authored cycles.
    pub rule_step_budget: usize,
    /// Fixed RNG seed for every spawned instance. Test hook; leave `None`
    /// in production so chance nodes stay stochastic.
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validator_period: 5.0,
            time_scale: 1.0,
            rule_step_budget: 10_000,
            rng_seed: None,
        }
    }
}

/// Count of running scheme instances per graph group, shared with every
/// interpreter so `SchemeIsActive` nodes can query it.
#[derive(Default)]
pub struct SchemeRegistry {
    counts: DashMap<String, usize>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, group: &str) {
        *self.counts.entry(group.to_string()).or_insert(0) += 1;
    }

    pub fn leave(&self, group: &str) {
        if let Some(mut count) = self.counts.get_mut(group) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn active(&self, group: &str) -> bool {
        self.counts.get(group).map(|c| *c > 0).unwrap_or(false)
    }
}

/// 运行时上下文：全部注册表和外部协作者的显式集合。
///
/// Replaces the source system's static manager singletons: constructed once
/// by the [`Engine`](crate::runtime::engine::Engine) and cloned (cheap, all
/// `Arc`s) into every schemer and ruler.
#[derive(Clone)]
pub struct RuntimeContext {
    pub behaviors: Arc<BehaviorRegistry>,
    pub hooks: Arc<HookRegistry>,
    pub world: Arc<dyn World>,
    pub presenter: Arc<dyn Presenter>,
    pub library: Arc<GraphLibrary>,
    pub active: Arc<SchemeRegistry>,
    pub config: EngineConfig,
}
