use serde_json::Value;
use tracing::warn;

use crate::graph::{GraphError, NodeData};
use crate::hooks::{HookArgs, HookValue};
use crate::nodes::{forward_or_primary, forward_primary};
use crate::runtime::activation::NodeInfo;
use crate::runtime::behavior::{
    param_str, require_str, BehaviorRegistry, Flow, NodeBehavior, Scope,
};
use crate::runtime::EngineError;
use crate::world::ActorId;

pub fn install(registry: &mut BehaviorRegistry) {
    registry.register(Box::new(SetVariableBehavior));
    registry.register(Box::new(GetActorBehavior));
    registry.register(Box::new(SetClanBehavior));
    registry.register(Box::new(SetFamilyBehavior));
    registry.register(Box::new(ClanMemberBehavior));
    registry.register(Box::new(FamilyMemberBehavior));
    registry.register(Box::new(InvokeBehavior));
    registry.register(Box::new(ReturnActorBehavior));
    registry.register(Box::new(ReturnDualActorBehavior));
    registry.register(Box::new(ReturnClanBehavior));
    registry.register(Box::new(ReturnFamilyBehavior));
}

fn hook_args<'a>(scope: &'a dyn Scope) -> HookArgs<'a> {
    HookArgs {
        conspirator: scope.conspirator(),
        target: scope.target(),
        world: scope.world(),
    }
}

/// Writes a literal or computed value into the selected variable store:
/// the scheme instance (default), an actor, or the world's global table.
pub struct SetVariableBehavior;

impl NodeBehavior for SetVariableBehavior {
    fn kind(&self) -> &'static str {
        "SetVariable"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "name")?;
        if node.params.get("value").is_none() && param_str(node, "expression").is_none() {
            return Err(GraphError::BadParams {
                group: node.group.clone(),
                id: node.id.clone(),
                reason: "needs either 'value' or 'expression'".into(),
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
        let name = param_str(node, "name").unwrap_or_default().to_string();
        let value = match node.params.get("value") {
            Some(v) => v.clone(),
            None => {
                let expr = param_str(node, "expression").unwrap_or_default();
                crate::nodes::flow::eval_value(expr, scope).unwrap_or(Value::Null)
            }
        };
        match param_str(node, "scope").unwrap_or("scheme") {
            "conspirator" => {
                let actor = info.actor.unwrap_or(scope.conspirator());
                scope.world().set_actor_var(actor, &name, value);
            }
            "target" => match info.dual.or(scope.target()) {
                Some(actor) => scope.world().set_actor_var(actor, &name, value),
                None => warn!(node = %node.id, "no target actor for variable write"),
            },
            "global" => scope.world().set_global_var(&name, value),
            _ => scope.set_var(&name, value),
        }
        forward_primary(node, flow);
        Ok(())
    }
}

/// Binds the activation's actor slot from the instance's bound pair.
pub struct GetActorBehavior;

impl NodeBehavior for GetActorBehavior {
    fn kind(&self) -> &'static str {
        "GetActor"
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let source = match param_str(node, "source").unwrap_or("conspirator") {
            "target" => scope.target(),
            _ => Some(scope.conspirator()),
        };
        match param_str(node, "slot").unwrap_or("actor") {
            "dual" => info.dual = source,
            _ => info.actor = source,
        }
        forward_primary(node, flow);
        Ok(())
    }
}

pub struct SetClanBehavior;

impl NodeBehavior for SetClanBehavior {
    fn kind(&self) -> &'static str {
        "SetClan"
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let actor = match param_str(node, "from").unwrap_or("actor") {
            "dual" => info.dual.or(scope.target()),
            _ => info.actor.or(Some(scope.conspirator())),
        };
        info.clan = actor.and_then(|a| scope.world().clan_of(a));
        forward_primary(node, flow);
        Ok(())
    }
}

pub struct SetFamilyBehavior;

impl NodeBehavior for SetFamilyBehavior {
    fn kind(&self) -> &'static str {
        "SetFamily"
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let actor = match param_str(node, "from").unwrap_or("actor") {
            "dual" => info.dual.or(scope.target()),
            _ => info.actor.or(Some(scope.conspirator())),
        };
        info.family = actor.and_then(|a| scope.world().family_of(a));
        forward_primary(node, flow);
        Ok(())
    }
}

/// Multi-actor fan-out over a clan. Entered normally, it spawns one child
/// per member along `Member` and continues along `Done`. Entered through an
/// actor-indexed port, the entry's name selects the continuation for the
/// already-bound actor instead.
pub struct ClanMemberBehavior;

impl NodeBehavior for ClanMemberBehavior {
    fn kind(&self) -> &'static str {
        "ClanMember"
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        if let Some(entry) = &info.entry {
            let output = if entry.name.is_empty() {
                "Member".to_string()
            } else {
                entry.name.clone()
            };
            flow.forward(output);
            return Ok(());
        }
        let clan = info.clan.or_else(|| {
            let actor = info.actor.unwrap_or(scope.conspirator());
            scope.world().clan_of(actor)
        });
        let members: Vec<ActorId> = match clan {
            Some(clan) => scope.world().clan_members(clan),
            None => Vec::new(),
        };
        if members.is_empty() {
            warn!(node = %node.id, "clan fan-out found no members");
        }
        flow.fan_out("Member", members);
        if node.output("Done").is_some() {
            flow.forward("Done");
        }
        Ok(())
    }
}

/// Family counterpart of [`ClanMemberBehavior`].
pub struct FamilyMemberBehavior;

impl NodeBehavior for FamilyMemberBehavior {
    fn kind(&self) -> &'static str {
        "FamilyMember"
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        if let Some(entry) = &info.entry {
            let output = if entry.name.is_empty() {
                "Member".to_string()
            } else {
                entry.name.clone()
            };
            flow.forward(output);
            return Ok(());
        }
        let family = info.family.or_else(|| {
            let actor = info.actor.unwrap_or(scope.conspirator());
            scope.world().family_of(actor)
        });
        let members: Vec<ActorId> = match family {
            Some(family) => scope.world().family_members(family),
            None => Vec::new(),
        };
        if members.is_empty() {
            warn!(node = %node.id, "family fan-out found no members");
        }
        flow.fan_out("Member", members);
        if node.output("Done").is_some() {
            flow.forward("Done");
        }
        Ok(())
    }
}

/// Calls a registered user hook for its side effects.
pub struct InvokeBehavior;

impl NodeBehavior for InvokeBehavior {
    fn kind(&self) -> &'static str {
        "Invoke"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "method")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let method = param_str(node, "method").unwrap_or_default();
        // Absent hooks are a recoverable no-op; the registry logs them.
        scope.hooks().invoke(method, hook_args(scope));
        forward_primary(node, flow);
        Ok(())
    }
}

/// Binds an actor returned by a user hook into the activation; a miss
/// takes the `Fail` output when one is declared.
pub struct ReturnActorBehavior;

impl NodeBehavior for ReturnActorBehavior {
    fn kind(&self) -> &'static str {
        "ReturnActor"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "method")
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let method = param_str(node, "method").unwrap_or_default();
        match scope.hooks().invoke(method, hook_args(scope)) {
            Some(HookValue::Actor(actor)) => {
                match param_str(node, "slot").unwrap_or("actor") {
                    "dual" => info.dual = Some(actor),
                    _ => info.actor = Some(actor),
                }
                forward_primary(node, flow);
            }
            _ => forward_or_primary(node, flow, "Fail"),
        }
        Ok(())
    }
}

pub struct ReturnDualActorBehavior;

impl NodeBehavior for ReturnDualActorBehavior {
    fn kind(&self) -> &'static str {
        "ReturnDualActor"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "method")
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let method = param_str(node, "method").unwrap_or_default();
        match scope.hooks().invoke(method, hook_args(scope)) {
            Some(HookValue::Actor(actor)) => {
                info.dual = Some(actor);
                forward_primary(node, flow);
            }
            _ => forward_or_primary(node, flow, "Fail"),
        }
        Ok(())
    }
}

pub struct ReturnClanBehavior;

impl NodeBehavior for ReturnClanBehavior {
    fn kind(&self) -> &'static str {
        "ReturnClan"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "method")
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let method = param_str(node, "method").unwrap_or_default();
        match scope.hooks().invoke(method, hook_args(scope)) {
            Some(HookValue::Clan(clan)) => {
                info.clan = Some(clan);
                forward_primary(node, flow);
            }
            _ => forward_or_primary(node, flow, "Fail"),
        }
        Ok(())
    }
}

pub struct ReturnFamilyBehavior;

impl NodeBehavior for ReturnFamilyBehavior {
    fn kind(&self) -> &'static str {
        "ReturnFamily"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "method")
    }

    fn run(
        &self,
        node: &NodeData,
        info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let method = param_str(node, "method").unwrap_or_default();
        match scope.hooks().invoke(method, hook_args(scope)) {
            Some(HookValue::Family(family)) => {
                info.family = Some(family);
                forward_primary(node, flow);
            }
            _ => forward_or_primary(node, flow, "Fail"),
        }
        Ok(())
    }
}
