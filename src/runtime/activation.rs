use serde::{Deserialize, Serialize};

use crate::present::DialogueSpec;
use crate::world::{ActorId, ClanId, FamilyId};

/// Identity of the port a branch entered a node through, for multi-input
/// nodes whose entries are distinguished by `(name, actor)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortKey {
    pub name: String,
    pub actor: Option<u32>,
}

/// What a suspended branch is parked on. Restoring a snapshot uses this to
/// re-arm trigger checks and re-present open dialogues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Suspend {
    Wait,
    Trigger {
        hook: String,
        fire: String,
        expire: String,
    },
    Dialogue(DialogueSpec),
    Sound {
        output: String,
    },
}

/// Relation of a spawned child activation to its structured-control parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRole {
    Sequencer,
    Repeater,
    Validator,
    Background,
}

/// 激活记录：节点的一次运行实例，区别于静态的 NodeData。
///
/// Parent back-references are activation ids into the engine's active set
/// (an arena), never owning pointers, so the whole record round-trips
/// through serde unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique per activation, independent of the node id. Several live
    /// activations of the same node are possible inside a repeater.
    pub id: u64,
    /// Id of the [`NodeData`](crate::graph::NodeData) this activation executes.
    pub node: String,

    pub actor: Option<ActorId>,
    pub dual: Option<ActorId>,
    pub clan: Option<ClanId>,
    pub family: Option<FamilyId>,

    /// Seconds this activation has been live.
    pub time: f64,
    /// Sequencer step cursor.
    pub index: usize,
    /// Repeater iteration counter.
    pub repeat: u32,
    /// Background branches never hold the scheme open.
    pub background: bool,

    /// Port identity this activation was entered through, if any.
    pub entry: Option<PortKey>,
    /// Names of outstanding scheduling primitives owned by this activation.
    pub delays: Vec<String>,
    pub suspend: Option<Suspend>,
    /// Rule group bound to a running validator activation.
    pub rule: Option<String>,

    pub sequencer: Option<u64>,
    pub repeater: Option<u64>,
    pub validator: Option<u64>,
}

impl NodeInfo {
    pub fn root(id: u64, node: String, actor: ActorId, dual: Option<ActorId>) -> Self {
        Self {
            id,
            node,
            actor: Some(actor),
            dual,
            clan: None,
            family: None,
            time: 0.0,
            index: 0,
            repeat: 0,
            background: false,
            entry: None,
            delays: Vec::new(),
            suspend: None,
            rule: None,
            sequencer: None,
            repeater: None,
            validator: None,
        }
    }

    /// Child spawned by forwarding: inherits actor context, background flag
    /// and every structured-control link of the spawning activation.
    pub fn child_of(id: u64, node: String, parent: &NodeInfo) -> Self {
        Self {
            id,
            node,
            actor: parent.actor,
            dual: parent.dual,
            clan: parent.clan,
            family: parent.family,
            time: 0.0,
            index: 0,
            repeat: 0,
            background: parent.background,
            entry: None,
            delays: Vec::new(),
            suspend: None,
            rule: None,
            sequencer: parent.sequencer,
            repeater: parent.repeater,
            validator: parent.validator,
        }
    }

    /// Apply the structured-control role for a child spawned by a
    /// sequencer/repeater/validator/background node.
    pub fn link(&mut self, role: ParentRole, parent: u64) {
        match role {
            ParentRole::Sequencer => self.sequencer = Some(parent),
            ParentRole::Repeater => self.repeater = Some(parent),
            ParentRole::Validator => self.validator = Some(parent),
            ParentRole::Background => {
                self.background = true;
                self.sequencer = None;
                self.repeater = None;
                self.validator = None;
            }
        }
    }
}
