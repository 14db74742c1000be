use async_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use voicegate_protocol::FrameClock;

use super::{Negotiated, SessionKey, StatsCounters};
use crate::crypto::EncryptionContext;
use crate::error::SdkError;
use crate::network::{EventHandler, VoiceEvent};

/// Paces opus frames from the outbound channel onto the UDP socket.
pub(crate) struct AudioSender {
    pub socket: Arc<UdpSocket>,
    pub frames: Receiver<Vec<u8>>,
    pub clock: FrameClock,
    pub interval: Duration,
    pub readiness: Arc<watch::Sender<bool>>,
    pub events: EventHandler,
    pub stats: Arc<StatsCounters>,
    pub cancel: CancellationToken,
}

impl AudioSender {
    /// Start sending once the session key is known.
    pub(crate) fn spawn(self, negotiated: watch::Receiver<Negotiated>) {
        tokio::spawn(async move {
            let Some(key) = SessionKey::wait(negotiated, &self.cancel).await else {
                debug!("[Sender] Cancelled before session description");
                return;
            };
            self.run(key).await;
        });
    }

    async fn run(self, mut key: SessionKey) {
        let Self {
            socket,
            frames,
            mut clock,
            interval,
            readiness,
            events,
            stats,
            cancel,
        } = self;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let _ready = ReadyGuard::set(&readiness);
        events.emit(VoiceEvent::Connected);
        info!("[Sender] Ready, pacing frames every {:?}", interval);

        loop {
            let frame = tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Ok(frame) => frame,
                    Err(_) => break,
                },
            };

            let packet = match seal_frame(&clock, key.current(), &frame) {
                Ok(packet) => packet,
                Err(e) => {
                    error!("[Sender] Dropping frame: {}", e);
                    continue;
                }
            };

            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = socket.send(&packet).await {
                error!("[Sender] UDP write failed: {}", e);
                break;
            }
            trace!(
                "[Sender] Sent seq={} ts={} ({} bytes)",
                clock.sequence(),
                clock.timestamp(),
                packet.len()
            );

            clock.advance();
            stats.frame_sent();
        }

        debug!("[Sender] Stopped");
    }
}

/// Header plus sealed payload for the frame at the clock's current position.
pub(crate) fn seal_frame(
    clock: &FrameClock,
    crypto: &EncryptionContext,
    frame: &[u8],
) -> Result<Vec<u8>, SdkError> {
    crypto.seal(&clock.header().encode(), frame)
}

/// Holds the connection ready while the send loop runs.
struct ReadyGuard<'a>(&'a watch::Sender<bool>);

impl<'a> ReadyGuard<'a> {
    fn set(flag: &'a watch::Sender<bool>) -> Self {
        flag.send_replace(true);
        Self(flag)
    }
}

impl Drop for ReadyGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicegate_protocol::{RtpHeader, ENCRYPTION_MODE, HEADER_LEN};

    struct Harness {
        peer: UdpSocket,
        frames: async_channel::Sender<Vec<u8>>,
        readiness: Arc<watch::Sender<bool>>,
        negotiated: watch::Sender<Negotiated>,
        cancel: CancellationToken,
        stats: Arc<StatsCounters>,
    }

    async fn start(ssrc: u32) -> Harness {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer.local_addr().unwrap()).await.unwrap();

        let (frames_tx, frames_rx) = async_channel::bounded(2);
        let (readiness, _) = watch::channel(false);
        let readiness = Arc::new(readiness);
        let (negotiated, negotiated_rx) = watch::channel(Negotiated::default());
        let cancel = CancellationToken::new();
        let stats = Arc::new(StatsCounters::default());

        AudioSender {
            socket: Arc::new(socket),
            frames: frames_rx,
            clock: FrameClock::new(ssrc, 960),
            interval: Duration::from_millis(5),
            readiness: Arc::clone(&readiness),
            events: EventHandler::new(),
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
        }
        .spawn(negotiated_rx);

        Harness {
            peer,
            frames: frames_tx,
            readiness,
            negotiated,
            cancel,
            stats,
        }
    }

    fn key() -> Arc<EncryptionContext> {
        Arc::new(EncryptionContext::new(&[5; 32], ENCRYPTION_MODE).unwrap())
    }

    #[tokio::test]
    async fn waits_for_key_then_sends_in_sequence() {
        let harness = start(0x1234_5678).await;
        assert!(!*harness.readiness.borrow());

        let crypto = key();
        harness
            .negotiated
            .send_modify(|n| n.encryption = Some(Arc::clone(&crypto)));

        let mut ready = harness.readiness.subscribe();
        ready.wait_for(|r| *r).await.unwrap();

        for frame in [vec![1u8, 2, 3], vec![4u8, 5, 6]] {
            harness.frames.send(frame).await.unwrap();
        }

        let mut buf = [0u8; 256];
        for (i, expected) in [[1u8, 2, 3], [4u8, 5, 6]].iter().enumerate() {
            let (n, _) = harness.peer.recv_from(&mut buf).await.unwrap();
            let header = RtpHeader::decode(&buf[..n]).unwrap();
            assert_eq!(usize::from(header.sequence), i);
            assert_eq!(header.timestamp, 960 * u32::try_from(i).unwrap());
            assert_eq!(header.ssrc, 0x1234_5678);

            let opened = crypto.open(&header.nonce(), &buf[HEADER_LEN..n]).unwrap();
            assert_eq!(&opened, expected);
        }

        assert_eq!(harness.stats.snapshot().frames_sent, 2);
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn cancel_clears_readiness() {
        let harness = start(1).await;
        harness.negotiated.send_modify(|n| n.encryption = Some(key()));

        let mut ready = harness.readiness.subscribe();
        ready.wait_for(|r| *r).await.unwrap();

        harness.cancel.cancel();
        ready.wait_for(|r| !*r).await.unwrap();
    }

    #[tokio::test]
    async fn replaced_key_seals_next_frame() {
        let harness = start(3).await;
        let first = key();
        harness
            .negotiated
            .send_modify(|n| n.encryption = Some(Arc::clone(&first)));

        let mut ready = harness.readiness.subscribe();
        ready.wait_for(|r| *r).await.unwrap();

        let second = Arc::new(EncryptionContext::new(&[9; 32], ENCRYPTION_MODE).unwrap());
        harness
            .negotiated
            .send_modify(|n| n.encryption = Some(Arc::clone(&second)));
        harness.frames.send(vec![7u8, 7, 7]).await.unwrap();

        let mut buf = [0u8; 256];
        let (n, _) = harness.peer.recv_from(&mut buf).await.unwrap();
        let header = RtpHeader::decode(&buf[..n]).unwrap();
        assert!(first.open(&header.nonce(), &buf[HEADER_LEN..n]).is_err());
        assert_eq!(
            second.open(&header.nonce(), &buf[HEADER_LEN..n]).unwrap(),
            [7u8, 7, 7]
        );
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn nothing_is_sent_after_cancel() {
        let harness = start(4).await;
        harness.negotiated.send_modify(|n| n.encryption = Some(key()));

        let mut ready = harness.readiness.subscribe();
        ready.wait_for(|r| *r).await.unwrap();

        harness.cancel.cancel();
        ready.wait_for(|r| !*r).await.unwrap();

        // The stopped loop has dropped its end of the channel.
        assert!(harness.frames.try_send(vec![1u8, 2, 3]).is_err());
        let mut buf = [0u8; 256];
        let silent =
            tokio::time::timeout(Duration::from_millis(100), harness.peer.recv_from(&mut buf)).await;
        assert!(silent.is_err());
        assert_eq!(harness.stats.snapshot().frames_sent, 0);
    }

    #[test]
    fn sealed_frame_carries_clock_header() {
        let mut clock = FrameClock::new(9, 960);
        clock.advance();
        let packet = seal_frame(&clock, &key(), b"opus").unwrap();
        assert_eq!(
            &packet[..HEADER_LEN],
            &[0x80, 0x78, 0, 1, 0, 0, 0x03, 0xC0, 0, 0, 0, 9]
        );
    }
}
