//! Configuration for voice connections.

use std::env;
use std::str::FromStr;
use std::time::Duration;

pub use voicegate_protocol::ENCRYPTION_MODE;

/// Sample rate the opus frames are produced at.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Samples per opus frame (20 ms at 48 kHz).
pub const DEFAULT_FRAME_SIZE: u32 = 960;

/// Interval between NAT keepalive datagrams.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Buffer size for reading audio datagrams. Longer datagrams are truncated.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

/// Capacity of the outbound and inbound audio channels.
pub const AUDIO_CHANNEL_CAPACITY: usize = 2;

/// Upper bound on the IP discovery round trip.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound for `wait_until_connected`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on dialing the signaling endpoint.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for one voice connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceConfig {
    pub sample_rate: u32,
    pub frame_size: u32,
    /// Start the audio receiver once the media path is up.
    pub receive: bool,
    pub keepalive_interval: Duration,
    pub discovery_timeout: Duration,
    pub connect_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            receive: true,
            keepalive_interval: KEEPALIVE_INTERVAL,
            discovery_timeout: DISCOVERY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: AUDIO_CHANNEL_CAPACITY,
        }
    }
}

impl VoiceConfig {
    /// Defaults, overridden by `VOICE_SAMPLE_RATE`, `VOICE_FRAME_SIZE`,
    /// `VOICE_CONNECT_TIMEOUT_MS` and `VOICE_RECEIVE` when set and parseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sample_rate: env_parse("VOICE_SAMPLE_RATE").unwrap_or(defaults.sample_rate),
            frame_size: env_parse("VOICE_FRAME_SIZE").unwrap_or(defaults.frame_size),
            receive: env_parse("VOICE_RECEIVE").unwrap_or(defaults.receive),
            connect_timeout: env_parse("VOICE_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            ..defaults
        }
    }

    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    #[must_use]
    pub fn with_frame_size(mut self, frame_size: u32) -> Self {
        self.frame_size = frame_size;
        self
    }

    #[must_use]
    pub fn with_receive(mut self, receive: bool) -> Self {
        self.receive = receive;
        self
    }

    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    #[must_use]
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Pacing interval of the audio sender: `frame_size / (sample_rate / 1000)` ms.
    ///
    /// Never shorter than one millisecond.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        let samples_per_ms = (self.sample_rate / 1000).max(1);
        Duration::from_millis(u64::from(self.frame_size / samples_per_ms).max(1))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// URL dialed for the signaling connection.
///
/// Bare `host[:port]` endpoints are dialed over `wss://`; explicit `ws://` or
/// `wss://` URLs are used as given. A trailing `:80` is dropped.
#[must_use]
pub fn signaling_url(endpoint: &str) -> String {
    let endpoint = endpoint.strip_suffix(":80").unwrap_or(endpoint);
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("wss://{}", endpoint)
    }
}

/// Host part of the endpoint, used to reach the UDP media server.
#[must_use]
pub fn endpoint_host(endpoint: &str) -> &str {
    let without_scheme = endpoint
        .strip_prefix("wss://")
        .or_else(|| endpoint.strip_prefix("ws://"))
        .unwrap_or(endpoint);
    let authority = without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or(without_scheme);

    if authority.starts_with('[') {
        // Bracketed IPv6 literal, keep the brackets for `host:port` formatting.
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => authority,
    }
}
