use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of data-plane counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceStats {
    pub frames_sent: u64,
    pub datagrams_received: u64,
    /// Datagrams too short or not starting with the audio marker byte.
    pub non_audio_dropped: u64,
    /// Datagrams whose ciphertext failed authentication.
    pub auth_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    frames_sent: AtomicU64,
    datagrams_received: AtomicU64,
    non_audio_dropped: AtomicU64,
    auth_failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn datagram_received(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn non_audio_dropped(&self) {
        self.non_audio_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> VoiceStats {
        VoiceStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            non_audio_dropped: self.non_audio_dropped.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
        }
    }
}
