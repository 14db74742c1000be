use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use voicegate_sdk::protocol::{RtpHeader, VoiceStateUpdate, ENCRYPTION_MODE, HEADER_LEN};
use voicegate_sdk::{
    EncryptionContext, ParentSession, SdkError, VoiceConfig, VoiceConnection, VoiceCredentials,
    VoiceEvent, VoiceRegistry,
};

const SSRC: u32 = 4242;
const SECRET_KEY: [u8; 32] = [7; 32];
const STEP: Duration = Duration::from_secs(3);

/// Parent session backed by a registry, recording what it is asked to send
#[derive(Default)]
struct TestSession {
    registry: VoiceRegistry,
    updates: Mutex<Vec<VoiceStateUpdate>>,
}

#[async_trait]
impl ParentSession for TestSession {
    async fn send_voice_state_update(&self, update: VoiceStateUpdate) -> Result<(), SdkError> {
        self.updates.lock().unwrap().push(update);
        Ok(())
    }

    fn remove_voice_connection(&self, guild_id: &str) {
        self.registry.remove(guild_id);
    }
}

/// Server side of the voice gateway
struct MockGateway {
    ws: WebSocketStream<TcpStream>,
}

impl MockGateway {
    async fn send(&mut self, op: u8, d: Value) {
        let text = json!({ "op": op, "d": d }).to_string();
        self.ws
            .send(Message::Text(text.into()))
            .await
            .expect("gateway write");
    }

    /// Next message with opcode `op`. Heartbeats seen on the way are acknowledged.
    async fn expect_op(&mut self, op: u64) -> Value {
        loop {
            let message = tokio::time::timeout(STEP, self.ws.next())
                .await
                .expect("gateway read timed out")
                .expect("gateway stream ended")
                .expect("gateway read");

            let Message::Text(text) = message else {
                continue;
            };
            let value: Value = serde_json::from_str(text.as_str()).expect("json");

            if value["op"] == 3 && op != 3 {
                self.send(3, value["d"].clone()).await;
                continue;
            }
            if value["op"] == op {
                return value["d"].clone();
            }
        }
    }
}

/// Next datagram that is not an 8-byte keepalive
async fn recv_media(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = [0u8; 1500];
    loop {
        let (n, from) = tokio::time::timeout(STEP, socket.recv_from(&mut buf))
            .await
            .expect("udp read timed out")
            .expect("udp read");
        if n != 8 {
            return (buf[..n].to_vec(), from);
        }
    }
}

async fn next_event(events: &async_channel::Receiver<VoiceEvent>, wanted: impl Fn(&VoiceEvent) -> bool) -> VoiceEvent {
    loop {
        let event = tokio::time::timeout(STEP, events.recv())
            .await
            .expect("event timed out")
            .expect("event stream closed");
        if wanted(&event) {
            return event;
        }
    }
}

fn credentials(gateway: SocketAddr) -> VoiceCredentials {
    VoiceCredentials {
        guild_id: "41771983423143937".to_string(),
        channel_id: "127121515262115840".to_string(),
        user_id: "80351110224678912".to_string(),
        session_id: "my_session_id".to_string(),
        token: "my_token".to_string(),
        endpoint: format!("ws://{}", gateway),
    }
}

#[tokio::test]
async fn test_full_handshake_and_audio_exchange() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gateway_addr = listener.local_addr().unwrap();
    let media = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let media_port = media.local_addr().unwrap().port();

    let session = Arc::new(TestSession::default());
    let conn = Arc::new(VoiceConnection::new(
        credentials(gateway_addr),
        VoiceConfig::default().with_discovery_timeout(STEP),
        Arc::clone(&session) as Arc<dyn ParentSession>,
    ));
    session.registry.insert(Arc::clone(&conn));
    let events = conn.event_stream();

    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    });
    conn.open().await.expect("open");
    let mut gateway = MockGateway {
        ws: accept.await.unwrap(),
    };

    // A second open is a no-op on the live connection.
    conn.open().await.expect("second open");

    let identify = gateway.expect_op(0).await;
    assert_eq!(identify["server_id"], "41771983423143937");
    assert_eq!(identify["user_id"], "80351110224678912");
    assert_eq!(identify["session_id"], "my_session_id");
    assert_eq!(identify["token"], "my_token");

    gateway
        .send(
            2,
            json!({
                "ssrc": SSRC,
                "port": media_port,
                "modes": ["plain", ENCRYPTION_MODE],
                "heartbeat_interval": 100
            }),
        )
        .await;

    // IP discovery
    let (probe, client_addr) = recv_media(&media).await;
    assert_eq!(probe.len(), 70);
    assert_eq!(&probe[..4], &SSRC.to_be_bytes());
    let mut response = [0u8; 70];
    response[4..13].copy_from_slice(b"127.0.0.1");
    response[68..70].copy_from_slice(&client_addr.port().to_le_bytes());
    media.send_to(&response, client_addr).await.unwrap();

    let select = gateway.expect_op(1).await;
    assert_eq!(select["protocol"], "udp");
    assert_eq!(select["data"]["address"], "127.0.0.1");
    assert_eq!(select["data"]["port"], client_addr.port());
    assert_eq!(select["data"]["mode"], ENCRYPTION_MODE);

    // Nothing is sent before the key arrives.
    assert!(!conn.is_ready());
    assert_eq!(conn.ready_payload().map(|r| r.ssrc), Some(SSRC));

    gateway
        .send(4, json!({ "secret_key": SECRET_KEY, "mode": ENCRYPTION_MODE }))
        .await;

    conn.wait_until_connected(STEP).await.expect("connected");
    assert!(conn.is_ready());
    assert!(conn.is_encrypted());
    next_event(&events, |e| matches!(e, VoiceEvent::Ready { ssrc: SSRC })).await;
    next_event(&events, |e| *e == VoiceEvent::Connected).await;

    let crypto = EncryptionContext::new(&SECRET_KEY, ENCRYPTION_MODE).unwrap();

    // Outbound audio
    conn.opus_sender().send(vec![0xF8, 0xFF, 0xFE]).await.unwrap();
    conn.opus_sender().send(vec![1, 2, 3, 4]).await.unwrap();
    for (sequence, expected) in [(0u16, vec![0xF8, 0xFF, 0xFE]), (1, vec![1, 2, 3, 4])] {
        let (packet, _) = recv_media(&media).await;
        let header = RtpHeader::decode(&packet).unwrap();
        assert_eq!(header.kind, [0x80, 0x78]);
        assert_eq!(header.ssrc, SSRC);
        assert_eq!(header.sequence, sequence);
        assert_eq!(header.timestamp, 960 * u32::from(sequence));
        let opus = crypto.open(&header.nonce(), &packet[HEADER_LEN..]).unwrap();
        assert_eq!(opus, expected);
    }

    // Inbound audio: junk and forgeries are dropped, real audio is published.
    let forged = EncryptionContext::new(&[8; 32], ENCRYPTION_MODE).unwrap();
    let header = RtpHeader::outbound(77, 960 * 77, 99);
    media.send_to(&[0x80; 4], client_addr).await.unwrap();
    media
        .send_to(&forged.seal(&header.encode(), b"forged").unwrap(), client_addr)
        .await
        .unwrap();
    media
        .send_to(&crypto.seal(&header.encode(), b"inbound").unwrap(), client_addr)
        .await
        .unwrap();

    let packet = tokio::time::timeout(STEP, conn.opus_receiver().recv())
        .await
        .expect("inbound packet timed out")
        .unwrap();
    assert_eq!(packet.ssrc, 99);
    assert_eq!(packet.sequence, 77);
    assert_eq!(packet.opus, b"inbound");

    let stats = conn.stats();
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.datagrams_received, 3);
    assert_eq!(stats.non_audio_dropped, 1);
    assert_eq!(stats.auth_failures, 1);

    // Speaking, both directions
    conn.set_speaking(true).await.expect("speaking");
    let speaking = gateway.expect_op(5).await;
    assert_eq!(speaking["speaking"], true);
    assert_eq!(speaking["delay"], 0);

    gateway
        .send(5, json!({ "speaking": true, "ssrc": 99, "user_id": "1234" }))
        .await;
    let event = next_event(&events, |e| matches!(e, VoiceEvent::Speaking { .. })).await;
    assert_eq!(
        event,
        VoiceEvent::Speaking {
            user_id: "1234".to_string(),
            ssrc: 99,
            speaking: true,
        }
    );

    // Unknown opcodes are ignored; the next heartbeat still gets through.
    gateway.send(42, json!({ "anything": 1 })).await;
    let nonce = gateway.expect_op(3).await;
    assert!(nonce.as_u64().is_some());
    gateway.send(3, nonce).await;
    next_event(&events, |e| matches!(e, VoiceEvent::HeartbeatAck { latency: Some(_) })).await;
    assert!(conn.latency().is_some());

    // Teardown
    conn.disconnect().await.expect("disconnect");
    assert!(!conn.is_ready());
    assert!(session.registry.is_empty());
    assert_eq!(
        session.updates.lock().unwrap().as_slice(),
        &[VoiceStateUpdate::leave("41771983423143937")]
    );

    conn.close().await;
    conn.close().await;

    // The gateway sees the connection close.
    let closed = tokio::time::timeout(STEP, async {
        while let Some(Ok(message)) = gateway.ws.next().await {
            if message.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    next_event(&events, |e| *e == VoiceEvent::SignalingClosed).await;

    assert!(matches!(
        conn.set_speaking(false).await,
        Err(SdkError::NotReady(_))
    ));
}

#[tokio::test]
async fn test_open_fails_when_gateway_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let conn = VoiceConnection::new(
        credentials(addr),
        VoiceConfig::default(),
        Arc::new(TestSession::default()),
    );

    assert!(matches!(
        conn.open().await,
        Err(SdkError::ConnectionFailed(_))
    ));
    assert!(matches!(
        conn.wait_until_connected(Duration::from_millis(20)).await,
        Err(SdkError::Timeout(_))
    ));
}
