use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(ActorId);
id_type!(ClanId);
id_type!(FamilyId);

/// 领域层查询接口。引擎通过它读取/修改外部游戏状态。
///
/// All lookups are synchronous and return `None` on miss. A missing entity
/// is never an engine error.
pub trait World: Send + Sync {
    fn is_alive(&self, actor: ActorId) -> bool;
    fn clan_of(&self, actor: ActorId) -> Option<ClanId>;
    fn family_of(&self, actor: ActorId) -> Option<FamilyId>;
    fn is_relative(&self, a: ActorId, b: ActorId) -> bool;
    fn clan_members(&self, clan: ClanId) -> Vec<ActorId>;
    fn family_members(&self, family: FamilyId) -> Vec<ActorId>;

    fn actor_var(&self, actor: ActorId, name: &str) -> Option<Value>;
    fn set_actor_var(&self, actor: ActorId, name: &str, value: Value);
    fn global_var(&self, name: &str) -> Option<Value>;
    fn set_global_var(&self, name: &str, value: Value);
}

#[derive(Debug, Clone, Default)]
struct ActorRecord {
    alive: bool,
    clan: Option<ClanId>,
    family: Option<FamilyId>,
}

/// In-memory world, used by tests and the CLI stub. Interior mutability so
/// node effects can write through a shared reference.
#[derive(Default)]
pub struct StaticWorld {
    actors: DashMap<ActorId, ActorRecord>,
    relatives: DashMap<ActorId, Vec<ActorId>>,
    actor_vars: DashMap<(ActorId, String), Value>,
    globals: DashMap<String, Value>,
}

impl StaticWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_actor(&self, actor: ActorId) {
        self.actors.insert(
            actor,
            ActorRecord {
                alive: true,
                ..Default::default()
            },
        );
    }

    pub fn set_alive(&self, actor: ActorId, alive: bool) {
        self.actors.entry(actor).or_default().alive = alive;
    }

    pub fn set_clan(&self, actor: ActorId, clan: ClanId) {
        self.actors.entry(actor).or_default().clan = Some(clan);
    }

    pub fn set_family(&self, actor: ActorId, family: FamilyId) {
        self.actors.entry(actor).or_default().family = Some(family);
    }

    pub fn add_relatives(&self, a: ActorId, b: ActorId) {
        self.relatives.entry(a).or_default().push(b);
        self.relatives.entry(b).or_default().push(a);
    }
}

impl World for StaticWorld {
    fn is_alive(&self, actor: ActorId) -> bool {
        self.actors.get(&actor).map(|a| a.alive).unwrap_or(false)
    }

    fn clan_of(&self, actor: ActorId) -> Option<ClanId> {
        self.actors.get(&actor).and_then(|a| a.clan)
    }

    fn family_of(&self, actor: ActorId) -> Option<FamilyId> {
        self.actors.get(&actor).and_then(|a| a.family)
    }

    fn is_relative(&self, a: ActorId, b: ActorId) -> bool {
        self.relatives
            .get(&a)
            .map(|list| list.contains(&b))
            .unwrap_or(false)
    }

    fn clan_members(&self, clan: ClanId) -> Vec<ActorId> {
        let mut members: Vec<ActorId> = self
            .actors
            .iter()
            .filter(|entry| entry.value().clan == Some(clan))
            .map(|entry| *entry.key())
            .collect();
        members.sort();
        members
    }

    fn family_members(&self, family: FamilyId) -> Vec<ActorId> {
        let mut members: Vec<ActorId> = self
            .actors
            .iter()
            .filter(|entry| entry.value().family == Some(family))
            .map(|entry| *entry.key())
            .collect();
        members.sort();
        members
    }

    fn actor_var(&self, actor: ActorId, name: &str) -> Option<Value> {
        self.actor_vars
            .get(&(actor, name.to_string()))
            .map(|v| v.clone())
    }

    fn set_actor_var(&self, actor: ActorId, name: &str, value: Value) {
        self.actor_vars.insert((actor, name.to_string()), value);
    }

    fn global_var(&self, name: &str) -> Option<Value> {
        self.globals.get(name).map(|v| v.clone())
    }

    fn set_global_var(&self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }
}
