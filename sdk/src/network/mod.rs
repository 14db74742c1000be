pub(crate) mod event_handler;
pub(crate) mod media;
pub(crate) mod signaling;

pub use event_handler::VoiceEvent;
pub(crate) use event_handler::EventHandler;
pub(crate) use signaling::{HeartbeatTracker, SignalingChannel};
