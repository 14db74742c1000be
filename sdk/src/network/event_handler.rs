use async_channel::{unbounded, Receiver, Sender};
use std::time::Duration;
use tracing::trace;

/// Events from the voice gateway and the media path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// The gateway accepted identify and assigned our SSRC
    Ready { ssrc: u32 },
    /// The audio sender is running; frames written now go out on the wire
    Connected,
    /// A user started or stopped speaking
    Speaking {
        user_id: String,
        ssrc: u32,
        speaking: bool,
    },
    /// The gateway acknowledged a heartbeat
    HeartbeatAck { latency: Option<Duration> },
    /// The signaling connection ended; no further gateway events will arrive
    SignalingClosed,
}

/// Fans out connection events to any number of consumers
#[derive(Clone)]
pub(crate) struct EventHandler {
    event_tx: Sender<VoiceEvent>,
    event_rx: Receiver<VoiceEvent>,
}

impl EventHandler {
    pub(crate) fn new() -> Self {
        let (event_tx, event_rx) = unbounded();

        Self { event_tx, event_rx }
    }

    /// Get event stream for processed events
    pub(crate) fn event_stream(&self) -> Receiver<VoiceEvent> {
        self.event_rx.clone()
    }

    pub(crate) fn emit(&self, event: VoiceEvent) {
        trace!("[Voice] Event {:?}", event);
        // Unbounded; only fails once every receiver is gone.
        let _ = self.event_tx.try_send(event);
    }
}
