use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::world::ActorId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueSpec {
    pub text: String,
    #[serde(default)]
    pub speaker: Option<ActorId>,
    /// Option labels; each must name an output on the dialogue node.
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundSpec {
    pub sound: String,
    #[serde(default)]
    pub actor: Option<ActorId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeSpec {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// A dialogue request carries the ids the host needs to report the choice
/// back through [`Engine::choose`](crate::runtime::engine::Engine::choose).
#[derive(Debug, Clone)]
pub struct DialogueRequest {
    pub scheme: Uuid,
    pub activation: u64,
    pub spec: DialogueSpec,
}

#[derive(Debug, Clone)]
pub struct SoundRequest {
    pub scheme: Uuid,
    pub activation: u64,
    pub spec: SoundSpec,
    /// Whether the branch is suspended until the host reports completion.
    pub wait_end: bool,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub scheme: Uuid,
    pub spec: NoticeSpec,
}

/// 表现层回调。引擎只发请求，完成信号由宿主通过 Engine 的 API 送回。
pub trait Presenter: Send + Sync {
    fn open_dialogue(&self, request: DialogueRequest);
    fn play_sound(&self, request: SoundRequest);
    fn notify(&self, notification: Notification);
    fn close_dialogues(&self, scheme: Uuid);
}

/// Logs every request and swallows it. Default for headless runs and tests.
#[derive(Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn open_dialogue(&self, request: DialogueRequest) {
        debug!(scheme = %request.scheme, text = %request.spec.text, "dialogue (null presenter)");
    }

    fn play_sound(&self, request: SoundRequest) {
        debug!(scheme = %request.scheme, sound = %request.spec.sound, "sound (null presenter)");
    }

    fn notify(&self, notification: Notification) {
        debug!(scheme = %notification.scheme, title = %notification.spec.title, "notification (null presenter)");
    }

    fn close_dialogues(&self, scheme: Uuid) {
        debug!(scheme = %scheme, "close dialogues (null presenter)");
    }
}
