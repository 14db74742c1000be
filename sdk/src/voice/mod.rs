pub(crate) mod receiver;
pub(crate) mod sender;
mod models;
mod stats;

pub use models::Packet;
pub use stats::VoiceStats;
pub(crate) use stats::StatsCounters;

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use voicegate_protocol::ReadyPayload;

use crate::crypto::EncryptionContext;

/// Parameters learned during the handshake, published to the data-plane tasks.
#[derive(Debug, Clone, Default)]
pub(crate) struct Negotiated {
    pub ready: Option<ReadyPayload>,
    pub encryption: Option<Arc<EncryptionContext>>,
}

/// The session key as seen by a data-plane loop.
///
/// Follows replacements published after the first key, so a later session
/// description takes effect on the next packet.
pub(crate) struct SessionKey {
    negotiated: watch::Receiver<Negotiated>,
    current: Arc<EncryptionContext>,
}

impl SessionKey {
    /// Wait until the session description has installed a key.
    ///
    /// Returns `None` if `cancel` fires first or the publisher is gone.
    pub(crate) async fn wait(
        mut negotiated: watch::Receiver<Negotiated>,
        cancel: &CancellationToken,
    ) -> Option<Self> {
        let installed = tokio::select! {
            biased;

            () = cancel.cancelled() => None,
            result = negotiated.wait_for(|n| n.encryption.is_some()) => {
                result.ok().and_then(|n| n.encryption.clone())
            }
        };

        Some(Self {
            negotiated,
            current: installed?,
        })
    }

    /// The key in force now.
    pub(crate) fn current(&mut self) -> &EncryptionContext {
        if self.negotiated.has_changed().unwrap_or(false) {
            let replacement = self.negotiated.borrow_and_update().encryption.clone();
            if let Some(replacement) = replacement {
                self.current = replacement;
            }
        }
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicegate_protocol::ENCRYPTION_MODE;

    fn context(byte: u8) -> Arc<EncryptionContext> {
        Arc::new(EncryptionContext::new(&[byte; 32], ENCRYPTION_MODE).unwrap())
    }

    #[tokio::test]
    async fn key_follows_replacement() {
        let (negotiated, rx) = watch::channel(Negotiated::default());
        negotiated.send_modify(|n| n.encryption = Some(context(1)));

        let cancel = CancellationToken::new();
        let mut key = SessionKey::wait(rx, &cancel).await.unwrap();
        let first = key.current() as *const EncryptionContext;

        let replacement = context(2);
        negotiated.send_modify(|n| n.encryption = Some(Arc::clone(&replacement)));
        assert!(std::ptr::eq(key.current(), &*replacement));
        assert!(!std::ptr::eq(key.current(), first));

        // A reset without a key keeps the last one.
        negotiated.send_replace(Negotiated::default());
        assert!(std::ptr::eq(key.current(), &*replacement));
    }

    #[tokio::test]
    async fn wait_observes_cancel() {
        let (_negotiated, rx) = watch::channel(Negotiated::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(SessionKey::wait(rx, &cancel).await.is_none());
    }
}
