use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::activation::NodeInfo;
use crate::runtime::delay::DelayRecord;
use crate::runtime::schemer::{SchemeResult, Wake};
use crate::world::ActorId;

/// 单个 Scheme 实例的可序列化快照。
///
/// Round-trip contract: `snapshot(restore(s)) == s` for every field here.
/// Delay entries carry their remaining time; on restore they are simply
/// re-registered, which is the only "transient" state rebuilt fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeSnapshot {
    pub group: String,
    pub conspirator: ActorId,
    pub target: Option<ActorId>,
    pub paused: bool,
    pub ended: bool,
    pub result: SchemeResult,
    pub vars: HashMap<String, Value>,
    /// Flat activation records; parent linkage travels as activation ids.
    pub activations: Vec<NodeInfo>,
    pub delays: Vec<DelayRecord<Wake>>,
    pub next_activation: u64,
}

impl SchemeSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        serde_json::from_str(source)
    }
}
