use async_channel::{unbounded, Receiver, Sender};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use voicegate_protocol::{GatewayCommand, GatewayEvent};

use crate::config::DIAL_TIMEOUT;
use crate::error::SdkError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type SignalingReader = SplitStream<WsStream>;

/// Outbound frame plus an optional slot for the write result.
type Outbound = (Message, Option<oneshot::Sender<Result<(), SdkError>>>);

/// Write side of the voice gateway connection.
///
/// Cloneable; every clone feeds the same writer task.
#[derive(Clone)]
pub(crate) struct SignalingChannel {
    send_tx: Sender<Outbound>,
}

impl SignalingChannel {
    /// Dial the voice gateway and write the identify message.
    ///
    /// Spawns the writer task, which closes the connection when `cancel` fires.
    /// The read half is returned for [`spawn_reader`].
    pub(crate) async fn connect(
        url: &str,
        identify: &GatewayCommand,
        cancel: CancellationToken,
    ) -> Result<(Self, SignalingReader), SdkError> {
        debug!("[Signaling] Dialing {}", url);

        let connector = tls_connector()?;
        let (socket, _response) = tokio::time::timeout(
            DIAL_TIMEOUT,
            tokio_tungstenite::connect_async_tls_with_config(url, None, false, Some(connector)),
        )
        .await
        .map_err(|_| SdkError::ConnectionFailed("Operation timed out".to_string()))?
        .map_err(|e| SdkError::ConnectionFailed(e.to_string()))?;

        let (mut sink, stream) = socket.split();

        sink.send(Message::Text(identify.encode().into()))
            .await
            .map_err(|e| SdkError::ConnectionFailed(format!("identify write failed: {}", e)))?;

        info!("[Signaling] Connected to {}", url);

        let (send_tx, send_rx) = unbounded();
        Self::spawn_writer(sink, send_rx, cancel);

        Ok((Self { send_tx }, stream))
    }

    /// Send a command and wait until it has been written to the socket.
    pub(crate) async fn send(&self, command: GatewayCommand) -> Result<(), SdkError> {
        trace!("[Signaling] Sending {:?}", command);

        let (result_tx, result_rx) = oneshot::channel();
        self.send_tx
            .send((Message::Text(command.encode().into()), Some(result_tx)))
            .await
            .map_err(|_| SdkError::Disconnected)?;

        result_rx.await.map_err(|_| SdkError::Disconnected)?
    }

    pub(crate) async fn speaking(&self, active: bool) -> Result<(), SdkError> {
        self.send(GatewayCommand::Speaking {
            speaking: active,
            delay: 0,
        })
        .await
    }

    /// A channel with no socket behind it.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, Receiver<Outbound>) {
        let (send_tx, send_rx) = unbounded();
        (Self { send_tx }, send_rx)
    }

    fn spawn_writer(
        mut sink: SplitSink<WsStream, Message>,
        send_rx: Receiver<Outbound>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        // Best effort close frame; the peer may already be gone.
                        let _ = sink.close().await;
                        break;
                    }

                    result = send_rx.recv() => {
                        let Ok((message, result_tx)) = result else {
                            break;
                        };

                        let result = sink
                            .send(message)
                            .await
                            .map_err(|e| SdkError::ConnectionFailed(format!("Write error: {}", e)));
                        let failed = result.is_err();
                        if let Err(e) = &result {
                            error!("[Signaling] {}", e);
                        }
                        if let Some(tx) = result_tx {
                            let _ = tx.send(result);
                        }
                        if failed {
                            break;
                        }
                    }
                }
            }

            debug!("[Signaling] Writer stopped");
        });
    }
}

/// Spawn the read loop. Decoded events are forwarded to `event_tx`; the loop
/// ends on a read error, a close frame, or cancellation, and closes the
/// event channel on its way out.
pub(crate) fn spawn_reader(
    mut stream: SignalingReader,
    event_tx: Sender<GatewayEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    trace!("[Signaling] Received {}", text.as_str());

                    match GatewayEvent::decode(&text) {
                        Ok(event) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("[Signaling] Dropping malformed message: {}", e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("[Signaling] Closed by gateway: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("[Signaling] Read error: {}", e);
                    break;
                }
                None => {
                    debug!("[Signaling] Stream ended");
                    break;
                }
            }
        }

        debug!("[Signaling] Reader stopped");
    });
}

/// Round-trip tracking for heartbeats.
#[derive(Debug)]
pub(crate) struct HeartbeatTracker {
    base: Instant,
    /// Milliseconds since `base` plus one; zero when no heartbeat is outstanding.
    sent_at: AtomicU64,
    /// `u64::MAX` until the first ack.
    latency_ms: AtomicU64,
}

impl HeartbeatTracker {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            sent_at: AtomicU64::new(0),
            latency_ms: AtomicU64::new(u64::MAX),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.base.elapsed().as_millis()).unwrap_or(u64::MAX - 1)
    }

    pub(crate) fn mark_sent(&self) {
        self.sent_at.store(self.elapsed_ms() + 1, Ordering::Relaxed);
    }

    /// Record an ack, returning the round trip if a heartbeat was outstanding.
    pub(crate) fn acknowledge(&self) -> Option<Duration> {
        let sent = self.sent_at.swap(0, Ordering::Relaxed);
        if sent == 0 {
            return None;
        }
        let rtt = (self.elapsed_ms() + 1).saturating_sub(sent);
        self.latency_ms.store(rtt, Ordering::Relaxed);
        Some(Duration::from_millis(rtt))
    }

    pub(crate) fn latency(&self) -> Option<Duration> {
        match self.latency_ms.load(Ordering::Relaxed) {
            u64::MAX => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Send a heartbeat every `period` until a write fails or `cancel` fires.
/// The first heartbeat goes out immediately.
pub(crate) fn spawn_heartbeat(
    channel: SignalingChannel,
    period: Duration,
    tracker: Arc<HeartbeatTracker>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        debug!("[Signaling] Heartbeat every {:?}", period);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tracker.mark_sent();
            let heartbeat = GatewayCommand::Heartbeat {
                timestamp: unix_time(),
            };
            if let Err(e) = channel.send(heartbeat).await {
                warn!("[Signaling] Heartbeat send failed: {}", e);
                break;
            }
        }

        debug!("[Signaling] Heartbeat stopped");
    });
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn tls_connector() -> Result<Connector, SdkError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| SdkError::ConnectionFailed(format!("TLS setup failed: {}", e)))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Connector::Rustls(Arc::new(config)))
}
