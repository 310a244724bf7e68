use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, warn};

use crate::world::{ActorId, ClanId, FamilyId, World};

/// Value returned by a user script hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookValue {
    Nothing,
    Flag(bool),
    Actor(ActorId),
    Clan(ClanId),
    Family(FamilyId),
    Data(serde_json::Value),
}

/// Arguments handed to every hook invocation.
pub struct HookArgs<'a> {
    pub conspirator: ActorId,
    pub target: Option<ActorId>,
    pub world: &'a dyn World,
}

/// 用户脚本钩子。宿主在启动时显式注册 (取代源系统的反射扫描)。
pub trait ScriptHook: Send + Sync {
    fn call(&self, args: HookArgs<'_>) -> anyhow::Result<HookValue>;
}

impl<F> ScriptHook for F
where
    F: Fn(HookArgs<'_>) -> anyhow::Result<HookValue> + Send + Sync,
{
    fn call(&self, args: HookArgs<'_>) -> anyhow::Result<HookValue> {
        self(args)
    }
}

/// Name-keyed hook table. Duplicate registration keeps the first entry and
/// logs the collision; invoking an absent name is a recoverable no-op.
#[derive(Default)]
pub struct HookRegistry {
    table: DashMap<String, Arc<dyn ScriptHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, hook: impl ScriptHook + 'static) -> bool {
        if self.table.contains_key(name) {
            error!(hook = name, "duplicate hook registration ignored");
            return false;
        }
        self.table.insert(name.to_string(), Arc::new(hook));
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Invoke a hook by name. Missing names and hook failures are logged and
    /// reported as `None` so a broken hook never takes the graph down.
    pub fn invoke(&self, name: &str, args: HookArgs<'_>) -> Option<HookValue> {
        let hook = match self.table.get(name) {
            Some(entry) => entry.value().clone(),
            None => {
                warn!(hook = name, "hook not registered, treating as no-op");
                return None;
            }
        };
        match hook.call(args) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(hook = name, error = %e, "hook call failed");
                None
            }
        }
    }

    /// Evaluate a hook as a boolean trigger predicate.
    pub fn flag(&self, name: &str, args: HookArgs<'_>) -> bool {
        matches!(
            self.invoke(name, args),
            Some(HookValue::Flag(true)) | Some(HookValue::Data(serde_json::Value::Bool(true)))
        )
    }
}
