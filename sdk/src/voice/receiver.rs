use async_channel::Sender;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use voicegate_protocol::{RtpHeader, HEADER_LEN};

use super::{Negotiated, Packet, SessionKey, StatsCounters};
use crate::config::RECEIVE_BUFFER_SIZE;
use crate::crypto::EncryptionContext;
use crate::error::SdkError;

/// Reads audio datagrams, decrypts them and publishes [`Packet`]s.
pub(crate) struct AudioReceiver {
    pub socket: Arc<UdpSocket>,
    pub publish: Sender<Packet>,
    pub stats: Arc<StatsCounters>,
    pub cancel: CancellationToken,
}

impl AudioReceiver {
    pub(crate) fn spawn(self, negotiated: watch::Receiver<Negotiated>) {
        tokio::spawn(async move {
            let Some(key) = SessionKey::wait(negotiated, &self.cancel).await else {
                debug!("[Receiver] Cancelled before session description");
                return;
            };
            self.run(key).await;
        });
    }

    async fn run(self, mut key: SessionKey) {
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        debug!("[Receiver] Listening");

        loop {
            let len = tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,
                result = self.socket.recv(&mut buf) => match result {
                    Ok(len) => len,
                    Err(e) => {
                        warn!("[Receiver] UDP read failed: {}", e);
                        break;
                    }
                },
            };
            self.stats.datagram_received();

            let packet = match open_datagram(&buf[..len], key.current()) {
                Ok(packet) => packet,
                Err(SdkError::Authentication) => {
                    self.stats.auth_failed();
                    trace!("[Receiver] Dropping datagram that failed authentication");
                    continue;
                }
                Err(_) => {
                    self.stats.non_audio_dropped();
                    continue;
                }
            };

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,
                result = self.publish.send(packet) => {
                    if result.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("[Receiver] Stopped");
    }
}

/// Parse and decrypt one datagram.
///
/// Datagrams shorter than a header or not starting with the audio marker
/// byte yield a protocol error; bad ciphertext yields
/// [`SdkError::Authentication`].
pub(crate) fn open_datagram(datagram: &[u8], crypto: &EncryptionContext) -> Result<Packet, SdkError> {
    let header = RtpHeader::decode(datagram)?;
    let opus = crypto.open(&header.nonce(), &datagram[HEADER_LEN..])?;

    Ok(Packet {
        ssrc: header.ssrc,
        sequence: header.sequence,
        timestamp: header.timestamp,
        kind: header.kind,
        opus,
        pcm: None,
    })
}
