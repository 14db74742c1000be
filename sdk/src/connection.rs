use async_channel::{bounded, unbounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use voicegate_protocol::{
    FrameClock, GatewayCommand, GatewayEvent, ReadyPayload, SessionDescription, VoiceStateUpdate,
    ENCRYPTION_MODE,
};

use crate::config::{endpoint_host, signaling_url, VoiceConfig};
use crate::crypto::EncryptionContext;
use crate::error::SdkError;
use crate::network::{media, signaling, EventHandler, HeartbeatTracker, SignalingChannel, VoiceEvent};
use crate::session::ParentSession;
use crate::voice::receiver::AudioReceiver;
use crate::voice::sender::AudioSender;
use crate::voice::{Negotiated, Packet, StatsCounters, VoiceStats};

/// What the parent session knows about a voice join before it is opened.
#[derive(Clone)]
pub struct VoiceCredentials {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
    /// Signaling endpoint, `host[:port]` or a full `ws://`/`wss://` URL.
    pub endpoint: String,
}

impl fmt::Debug for VoiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceCredentials")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Handles owned by the connection. Everything here is guarded by one lock.
#[derive(Default)]
struct ConnectionHandles {
    signaling: Option<SignalingChannel>,
    udp: Option<Arc<UdpSocket>>,
    cancel: Option<CancellationToken>,
    /// Stops the heartbeat started by the latest ready event.
    heartbeat_cancel: Option<CancellationToken>,
    channel_id: String,
    session_id: String,
}

/// Per-open state given to every event handler of that signaling connection.
#[derive(Clone)]
struct Session {
    signaling: SignalingChannel,
    cancel: CancellationToken,
}

struct Shared {
    guild_id: String,
    user_id: String,
    token: String,
    endpoint: String,
    config: VoiceConfig,
    parent: Arc<dyn ParentSession>,
    receive: AtomicBool,

    handles: Mutex<ConnectionHandles>,
    readiness: Arc<watch::Sender<bool>>,
    negotiated: watch::Sender<Negotiated>,

    frames_tx: Sender<Vec<u8>>,
    frames_rx: Receiver<Vec<u8>>,
    packets_tx: Sender<Packet>,
    packets_rx: Receiver<Packet>,

    events: EventHandler,
    stats: Arc<StatsCounters>,
    heartbeat: Arc<HeartbeatTracker>,
}

/// A voice connection for one guild.
///
/// Drives the signaling handshake, the UDP media path and the audio
/// sender/receiver. Audio is exchanged through [`opus_sender`] and
/// [`opus_receiver`].
///
/// [`opus_sender`]: VoiceConnection::opus_sender
/// [`opus_receiver`]: VoiceConnection::opus_receiver
pub struct VoiceConnection {
    shared: Arc<Shared>,
}

impl VoiceConnection {
    pub fn new(
        credentials: VoiceCredentials,
        config: VoiceConfig,
        parent: Arc<dyn ParentSession>,
    ) -> Self {
        let (frames_tx, frames_rx) = bounded(config.channel_capacity.max(1));
        let (packets_tx, packets_rx) = bounded(config.channel_capacity.max(1));
        let (readiness, _) = watch::channel(false);
        let (negotiated, _) = watch::channel(Negotiated::default());

        let handles = ConnectionHandles {
            channel_id: credentials.channel_id,
            session_id: credentials.session_id,
            ..ConnectionHandles::default()
        };

        Self {
            shared: Arc::new(Shared {
                guild_id: credentials.guild_id,
                user_id: credentials.user_id,
                token: credentials.token,
                endpoint: credentials.endpoint,
                receive: AtomicBool::new(config.receive),
                config,
                parent,
                handles: Mutex::new(handles),
                readiness: Arc::new(readiness),
                negotiated,
                frames_tx,
                frames_rx,
                packets_tx,
                packets_rx,
                events: EventHandler::new(),
                stats: Arc::new(StatsCounters::default()),
                heartbeat: Arc::new(HeartbeatTracker::new()),
            }),
        }
    }

    /// Dial the signaling endpoint and identify.
    ///
    /// The rest of the handshake runs in the background; use
    /// [`wait_until_connected`](Self::wait_until_connected) to wait for it.
    /// Does nothing if signaling is already open.
    ///
    /// # Errors
    /// [`SdkError::NotReady`] without an endpoint, [`SdkError::ConnectionFailed`]
    /// if the dial or the identify write fails.
    pub async fn open(&self) -> Result<(), SdkError> {
        let mut handles = self.shared.handles.lock().await;
        if handles.signaling.is_some() {
            debug!("[Voice] Signaling already open");
            return Ok(());
        }
        if self.shared.endpoint.is_empty() {
            return Err(SdkError::NotReady("endpoint"));
        }

        let identify = GatewayCommand::Identify {
            server_id: self.shared.guild_id.clone(),
            user_id: self.shared.user_id.clone(),
            session_id: handles.session_id.clone(),
            token: self.shared.token.clone(),
        };
        let url = signaling_url(&self.shared.endpoint);

        let cancel = CancellationToken::new();
        let (signaling, reader) = SignalingChannel::connect(&url, &identify, cancel.clone()).await?;

        self.shared.negotiated.send_replace(Negotiated::default());

        let (event_tx, event_rx) = unbounded();
        signaling::spawn_reader(reader, event_tx, cancel.clone());

        handles.signaling = Some(signaling.clone());
        handles.cancel = Some(cancel.clone());
        drop(handles);

        info!("[Voice] Identified for guild {}", self.shared.guild_id);
        Shared::dispatch(Arc::clone(&self.shared), Session { signaling, cancel }, event_rx);
        Ok(())
    }

    /// Wait until the audio sender is running.
    ///
    /// # Errors
    /// [`SdkError::Timeout`] if that does not happen within `timeout`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), SdkError> {
        let mut ready = self.shared.readiness.subscribe();
        let outcome = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
            .await
            .map(|result| result.is_ok());

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(SdkError::Disconnected),
            Err(_) => Err(SdkError::Timeout(format!(
                "{:?} waiting for voice connection",
                timeout
            ))),
        }
    }

    /// [`wait_until_connected`](Self::wait_until_connected) with the configured timeout.
    ///
    /// # Errors
    /// [`SdkError::Timeout`] if the connection is not ready in time.
    pub async fn wait_until_connected_default(&self) -> Result<(), SdkError> {
        self.wait_until_connected(self.shared.config.connect_timeout).await
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.shared.readiness.borrow()
    }

    /// Tell the gateway whether we are transmitting.
    ///
    /// # Errors
    /// [`SdkError::NotReady`] if signaling is not open, or the write error.
    pub async fn set_speaking(&self, active: bool) -> Result<(), SdkError> {
        let signaling = self
            .shared
            .handles
            .lock()
            .await
            .signaling
            .clone()
            .ok_or(SdkError::NotReady("signaling connection"))?;

        signaling.speaking(active).await
    }

    /// Move to another channel of the same guild, via the parent session.
    ///
    /// # Errors
    /// Whatever the parent session returns for the voice state update.
    pub async fn change_channel(
        &self,
        channel_id: &str,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<(), SdkError> {
        let update = VoiceStateUpdate::join(&self.shared.guild_id, channel_id, self_mute, self_deaf);
        self.shared.parent.send_voice_state_update(update).await?;

        self.shared.handles.lock().await.channel_id = channel_id.to_string();
        debug!("[Voice] Moved to channel {}", channel_id);
        Ok(())
    }

    /// Leave the voice channel, close everything and unregister from the parent.
    ///
    /// The leave request goes out only while a session id is held; the id is
    /// cleared, so disconnecting twice sends it once. Closing and unregistering
    /// happen even if the leave request fails.
    ///
    /// # Errors
    /// The error from sending the leave request, if any.
    pub async fn disconnect(&self) -> Result<(), SdkError> {
        let session_id = std::mem::take(&mut self.shared.handles.lock().await.session_id);

        let result = if session_id.is_empty() {
            Ok(())
        } else {
            self.shared
                .parent
                .send_voice_state_update(VoiceStateUpdate::leave(&self.shared.guild_id))
                .await
        };
        if let Err(e) = &result {
            warn!("[Voice] Leave request failed: {}", e);
        }

        self.close().await;
        self.shared.parent.remove_voice_connection(&self.shared.guild_id);
        info!("[Voice] Disconnected from guild {}", self.shared.guild_id);
        result
    }

    /// Stop every task and release the sockets. Safe to call repeatedly.
    ///
    /// Frames still queued on [`opus_sender`](Self::opus_sender) are dropped.
    pub async fn close(&self) {
        let mut handles = self.shared.handles.lock().await;

        self.shared.readiness.send_replace(false);
        if let Some(cancel) = handles.cancel.take() {
            cancel.cancel();
        }
        if let Some(heartbeat) = handles.heartbeat_cancel.take() {
            heartbeat.cancel();
        }
        handles.udp = None;

        let mut dropped = 0usize;
        while self.shared.frames_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("[Voice] Dropped {} queued frames", dropped);
        }

        if handles.signaling.take().is_some() {
            debug!("[Voice] Closed");
        }
    }

    /// Outbound opus frames. Each frame is one packet on the wire.
    #[must_use]
    pub fn opus_sender(&self) -> Sender<Vec<u8>> {
        self.shared.frames_tx.clone()
    }

    /// Inbound packets. Fed only while receiving is enabled.
    #[must_use]
    pub fn opus_receiver(&self) -> Receiver<Packet> {
        self.shared.packets_rx.clone()
    }

    #[must_use]
    pub fn event_stream(&self) -> Receiver<VoiceEvent> {
        self.shared.events.event_stream()
    }

    /// Takes effect on the next ready event.
    pub fn set_receive(&self, receive: bool) {
        self.shared.receive.store(receive, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> VoiceStats {
        self.shared.stats.snapshot()
    }

    /// Round trip of the last acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.shared.heartbeat.latency()
    }

    /// The ready payload of the current signaling session.
    #[must_use]
    pub fn ready_payload(&self) -> Option<ReadyPayload> {
        self.shared.negotiated.borrow().ready.clone()
    }

    /// Whether the session description has been received.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.shared.negotiated.borrow().encryption.is_some()
    }

    #[must_use]
    pub fn guild_id(&self) -> &str {
        &self.shared.guild_id
    }

    pub async fn channel_id(&self) -> String {
        self.shared.handles.lock().await.channel_id.clone()
    }
}

impl fmt::Debug for VoiceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceConnection")
            .field("guild_id", &self.shared.guild_id)
            .field("user_id", &self.shared.user_id)
            .field("endpoint", &self.shared.endpoint)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Shared {
    /// Spawn one handler task per inbound event until the reader stops.
    fn dispatch(shared: Arc<Self>, session: Session, event_rx: Receiver<GatewayEvent>) {
        tokio::spawn(async move {
            while let Ok(event) = event_rx.recv().await {
                tokio::spawn(Self::handle_event(
                    Arc::clone(&shared),
                    session.clone(),
                    event,
                ));
            }

            debug!("[Voice] Signaling event stream closed");
            shared.events.emit(VoiceEvent::SignalingClosed);
        });
    }

    async fn handle_event(self: Arc<Self>, session: Session, event: GatewayEvent) {
        if session.cancel.is_cancelled() {
            trace!("[Signaling] Dropping event from a closed session");
            return;
        }

        match event {
            GatewayEvent::Ready(ready) => self.handle_ready(&session, ready).await,
            GatewayEvent::SessionDescription(description) => {
                self.handle_session_description(&session, &description).await;
            }
            GatewayEvent::HeartbeatAck(_) => {
                let latency = self.heartbeat.acknowledge();
                trace!("[Signaling] Heartbeat ack, latency {:?}", latency);
                self.events.emit(VoiceEvent::HeartbeatAck { latency });
            }
            GatewayEvent::Speaking(notice) => {
                self.events.emit(VoiceEvent::Speaking {
                    user_id: notice.user_id,
                    ssrc: notice.ssrc,
                    speaking: notice.speaking,
                });
            }
            GatewayEvent::Acknowledge(op) => trace!("[Signaling] {:?} acknowledged", op),
            GatewayEvent::Unknown { op, data } => {
                warn!("[Signaling] Ignoring unknown opcode {}: {}", op, data);
            }
        }
    }

    async fn handle_ready(&self, session: &Session, ready: ReadyPayload) {
        info!(
            "[Signaling] Ready: ssrc={} port={} modes={:?}",
            ready.ssrc, ready.port, ready.modes
        );
        if !ready.modes.is_empty() && !ready.supports_mode(ENCRYPTION_MODE) {
            warn!("[Signaling] Gateway does not list {}", ENCRYPTION_MODE);
        }

        {
            // Under the lock so a concurrent close or reopen cannot interleave.
            let mut handles = self.handles.lock().await;
            if session.cancel.is_cancelled() {
                debug!("[Signaling] Ignoring ready for a closed session");
                return;
            }
            self.negotiated
                .send_modify(|negotiated| negotiated.ready = Some(ready.clone()));
            self.replace_heartbeat(&mut handles, session, ready.heartbeat_period());
        }
        self.events.emit(VoiceEvent::Ready { ssrc: ready.ssrc });

        let socket = match self.open_media(session, &ready).await {
            Ok(socket) => socket,
            Err(e) if e.is_precondition() => {
                warn!("[Media] Not opening: {}", e);
                return;
            }
            Err(e) => {
                error!("[Media] Bootstrap failed: {}", e);
                return;
            }
        };

        AudioSender {
            socket: Arc::clone(&socket),
            frames: self.frames_rx.clone(),
            clock: FrameClock::new(ready.ssrc, self.config.frame_size),
            interval: self.config.frame_interval(),
            readiness: Arc::clone(&self.readiness),
            events: self.events.clone(),
            stats: Arc::clone(&self.stats),
            cancel: session.cancel.clone(),
        }
        .spawn(self.negotiated.subscribe());

        if self.receive.load(Ordering::Relaxed) {
            AudioReceiver {
                socket,
                publish: self.packets_tx.clone(),
                stats: Arc::clone(&self.stats),
                cancel: session.cancel.clone(),
            }
            .spawn(self.negotiated.subscribe());
        }
    }

    /// Stop the previous heartbeat and start one for `period`, if any.
    fn replace_heartbeat(
        &self,
        handles: &mut ConnectionHandles,
        session: &Session,
        period: Option<Duration>,
    ) {
        if let Some(previous) = handles.heartbeat_cancel.take() {
            previous.cancel();
        }

        if let Some(period) = period {
            let cancel = session.cancel.child_token();
            signaling::spawn_heartbeat(
                session.signaling.clone(),
                period,
                Arc::clone(&self.heartbeat),
                cancel.clone(),
            );
            handles.heartbeat_cancel = Some(cancel);
        }
    }

    async fn handle_session_description(&self, session: &Session, description: &SessionDescription) {
        let context = match EncryptionContext::from_description(description) {
            Ok(context) => Arc::new(context),
            Err(e) => {
                warn!("[Signaling] Dropping session description: {}", e);
                return;
            }
        };

        let _handles = self.handles.lock().await;
        if session.cancel.is_cancelled() {
            debug!("[Signaling] Ignoring session description for a closed session");
            return;
        }
        info!("[Signaling] Session description received, mode {}", description.mode);
        self.negotiated
            .send_modify(|negotiated| negotiated.encryption = Some(context));
    }

    /// Dial the media server, run IP discovery and select the protocol.
    async fn open_media(&self, session: &Session, ready: &ReadyPayload) -> Result<Arc<UdpSocket>, SdkError> {
        check_media_preconditions(&*self.handles.lock().await, &self.endpoint, ready)?;

        let socket = media::connect(endpoint_host(&self.endpoint), ready.port).await?;
        let external = media::discover_ip(
            &socket,
            ready.ssrc,
            self.config.discovery_timeout,
            &session.cancel,
        )
        .await?;
        info!("[Media] External address {}:{}", external.ip, external.port);

        let socket = Arc::new(socket);
        {
            let mut handles = self.handles.lock().await;
            if session.cancel.is_cancelled() {
                return Err(SdkError::Disconnected);
            }
            if handles.udp.is_some() {
                return Err(SdkError::AlreadyOpen("udp connection"));
            }
            handles.udp = Some(Arc::clone(&socket));
        }

        session
            .signaling
            .send(GatewayCommand::SelectProtocol {
                address: external.ip,
                port: external.port,
                mode: ENCRYPTION_MODE.to_string(),
            })
            .await?;

        media::spawn_keepalive(
            Arc::clone(&socket),
            self.config.keepalive_interval,
            session.cancel.clone(),
        );
        Ok(socket)
    }
}

fn check_media_preconditions(
    handles: &ConnectionHandles,
    endpoint: &str,
    ready: &ReadyPayload,
) -> Result<(), SdkError> {
    if handles.signaling.is_none() {
        return Err(SdkError::NotReady("signaling connection"));
    }
    if handles.cancel.is_none() {
        return Err(SdkError::NotReady("cancellation signal"));
    }
    if handles.udp.is_some() {
        return Err(SdkError::AlreadyOpen("udp connection"));
    }
    if endpoint.is_empty() {
        return Err(SdkError::NotReady("endpoint"));
    }
    if ready.port == 0 {
        return Err(SdkError::NotReady("ready payload port"));
    }
    Ok(())
}
