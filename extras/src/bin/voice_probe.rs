use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use voicegate_sdk::protocol::VoiceStateUpdate;
use voicegate_sdk::{
    ParentSession, SdkError, VoiceConfig, VoiceConnection, VoiceCredentials, VoiceEvent,
};

/// Opus encoding of a silent 20ms frame
const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Stands in for the main gateway session; voice state updates are only logged
struct LoggingSession;

#[async_trait]
impl ParentSession for LoggingSession {
    async fn send_voice_state_update(&self, update: VoiceStateUpdate) -> Result<(), SdkError> {
        info!("Parent session would send: {}", update.encode());
        Ok(())
    }

    fn remove_voice_connection(&self, guild_id: &str) {
        info!("Voice connection for guild {} removed", guild_id);
    }
}

fn required(key: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(key).map_err(|_| format!("{} is not set", key).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let seconds: u64 = match args.get(1) {
        Some(arg) => arg.parse()?,
        None => 5,
    };

    let credentials = VoiceCredentials {
        guild_id: required("VOICE_GUILD_ID")?,
        channel_id: required("VOICE_CHANNEL_ID")?,
        user_id: required("VOICE_USER_ID")?,
        session_id: required("VOICE_SESSION_ID")?,
        token: required("VOICE_TOKEN")?,
        endpoint: required("VOICE_ENDPOINT")?,
    };
    let config = VoiceConfig::from_env();

    info!("Voice probe starting...");
    info!("Endpoint: {}", credentials.endpoint);

    let conn = VoiceConnection::new(credentials, config, Arc::new(LoggingSession));

    let events = conn.event_stream();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                VoiceEvent::Speaking {
                    user_id,
                    ssrc,
                    speaking,
                } => info!("User {} (ssrc {}) speaking: {}", user_id, ssrc, speaking),
                VoiceEvent::SignalingClosed => {
                    warn!("Signaling closed");
                    break;
                }
                other => info!("Event: {:?}", other),
            }
        }
    });

    let packets = conn.opus_receiver();
    tokio::spawn(async move {
        let mut count = 0u64;
        while let Ok(packet) = packets.recv().await {
            count += 1;
            if count % 250 == 0 {
                info!("Received {} packets, last from ssrc {}", count, packet.ssrc);
            }
        }
    });

    conn.open().await?;
    conn.wait_until_connected_default().await?;
    info!("Connected!");

    conn.set_speaking(true).await?;

    let frames = conn.opus_sender();
    let stream_start = Instant::now();
    let duration = Duration::from_secs(seconds);
    info!("Sending silence for {:?}", duration);

    while stream_start.elapsed() < duration {
        // The sender paces frames; a full channel just makes this wait.
        if frames.send(SILENCE_FRAME.to_vec()).await.is_err() {
            warn!("Frame channel closed, stopping");
            break;
        }
    }

    conn.set_speaking(false).await?;

    let stats = conn.stats();
    info!(
        "Sent {} frames, received {} datagrams ({} non-audio, {} failed authentication), latency {:?}",
        stats.frames_sent,
        stats.datagrams_received,
        stats.non_audio_dropped,
        stats.auth_failures,
        conn.latency()
    );

    conn.disconnect().await?;
    info!("Disconnected");

    Ok(())
}
