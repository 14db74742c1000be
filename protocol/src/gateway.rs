//! JSON messages exchanged with the voice gateway.
//!
//! Every message on the signaling connection is a text frame of the form
//! `{"op": <int>, "d": <payload>}`. Inbound frames decode into [`GatewayEvent`],
//! outbound frames are built from [`GatewayCommand`].

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ProtocolError;
use crate::opcode::{Opcode, VOICE_STATE_UPDATE};

/// The only encryption mode this client negotiates.
pub const ENCRYPTION_MODE: &str = "xsalsa20_poly1305";

#[derive(Debug, Deserialize)]
struct RawMessage {
    op: u8,
    #[serde(default)]
    d: Value,
}

/// Payload of the ready event (op 2).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadyPayload {
    pub ssrc: u32,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
    /// Milliseconds. Some gateways send this as a float.
    #[serde(default)]
    pub heartbeat_interval: f64,
}

impl ReadyPayload {
    /// Heartbeat period, or `None` when the gateway did not ask for one.
    #[must_use]
    pub fn heartbeat_period(&self) -> Option<Duration> {
        if self.heartbeat_interval.is_finite() && self.heartbeat_interval >= 1.0 {
            Some(Duration::from_secs_f64(self.heartbeat_interval / 1000.0))
        } else {
            None
        }
    }

    #[must_use]
    pub fn supports_mode(&self, mode: &str) -> bool {
        self.modes.iter().any(|m| m == mode)
    }
}

/// Payload of the session description event (op 4).
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SessionDescription {
    pub secret_key: [u8; 32],
    pub mode: String,
}

impl fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescription")
            .field("secret_key", &"<redacted>")
            .field("mode", &self.mode)
            .finish()
    }
}

/// Payload of the speaking notification (op 5).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpeakingNotice {
    #[serde(default)]
    pub speaking: bool,
    #[serde(default)]
    pub ssrc: u32,
    #[serde(default)]
    pub user_id: String,
}

/// An inbound voice gateway event.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Echo of a client-originated opcode (identify/select protocol). Carries no action.
    Acknowledge(Opcode),
    Ready(ReadyPayload),
    /// Heartbeat ack, with the echoed nonce when the gateway sent a numeric one.
    HeartbeatAck(Option<u64>),
    SessionDescription(SessionDescription),
    Speaking(SpeakingNotice),
    /// Opcode this client does not handle, kept raw for logging.
    Unknown { op: u8, data: Value },
}

impl GatewayEvent {
    /// Decode an inbound text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a `{op, d}` object or the payload of a
    /// known opcode does not match its schema.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawMessage = serde_json::from_str(text)?;

        let Some(opcode) = Opcode::from_u8(raw.op) else {
            return Ok(Self::Unknown {
                op: raw.op,
                data: raw.d,
            });
        };

        let event = match opcode {
            Opcode::Identify | Opcode::SelectProtocol => Self::Acknowledge(opcode),
            Opcode::Ready => Self::Ready(payload(raw.op, raw.d)?),
            Opcode::Heartbeat => Self::HeartbeatAck(raw.d.as_u64()),
            Opcode::SessionDescription => Self::SessionDescription(payload(raw.op, raw.d)?),
            Opcode::Speaking => Self::Speaking(payload(raw.op, raw.d)?),
        };

        Ok(event)
    }

    /// Returns the raw opcode of this event.
    #[must_use]
    pub fn op(&self) -> u8 {
        match self {
            Self::Acknowledge(opcode) => opcode.as_u8(),
            Self::Ready(_) => Opcode::Ready.as_u8(),
            Self::HeartbeatAck(_) => Opcode::Heartbeat.as_u8(),
            Self::SessionDescription(_) => Opcode::SessionDescription.as_u8(),
            Self::Speaking(_) => Opcode::Speaking.as_u8(),
            Self::Unknown { op, .. } => *op,
        }
    }
}

fn payload<T: DeserializeOwned>(op: u8, d: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(d).map_err(|e| ProtocolError::InvalidPayload {
        op,
        reason: e.to_string(),
    })
}

/// An outbound voice gateway command.
#[derive(Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    Identify {
        server_id: String,
        user_id: String,
        session_id: String,
        token: String,
    },
    SelectProtocol {
        address: String,
        port: u16,
        mode: String,
    },
    /// Heartbeat carrying the current unix time in seconds.
    Heartbeat { timestamp: u64 },
    Speaking { speaking: bool, delay: u32 },
}

impl GatewayCommand {
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Identify { .. } => Opcode::Identify,
            Self::SelectProtocol { .. } => Opcode::SelectProtocol,
            Self::Heartbeat { .. } => Opcode::Heartbeat,
            Self::Speaking { .. } => Opcode::Speaking,
        }
    }

    /// Encode to the JSON text frame sent on the signaling connection.
    #[must_use]
    pub fn encode(&self) -> String {
        let d = match self {
            Self::Identify {
                server_id,
                user_id,
                session_id,
                token,
            } => json!({
                "server_id": server_id,
                "user_id": user_id,
                "session_id": session_id,
                "token": token,
            }),
            Self::SelectProtocol {
                address,
                port,
                mode,
            } => json!({
                "protocol": "udp",
                "data": {
                    "address": address,
                    "port": port,
                    "mode": mode,
                },
            }),
            Self::Heartbeat { timestamp } => json!(timestamp),
            Self::Speaking { speaking, delay } => json!({
                "speaking": speaking,
                "delay": delay,
            }),
        };

        json!({ "op": self.opcode().as_u8(), "d": d }).to_string()
    }
}

impl fmt::Debug for GatewayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identify {
                server_id,
                user_id,
                session_id,
                ..
            } => f
                .debug_struct("Identify")
                .field("server_id", server_id)
                .field("user_id", user_id)
                .field("session_id", session_id)
                .field("token", &"<redacted>")
                .finish(),
            Self::SelectProtocol {
                address,
                port,
                mode,
            } => f
                .debug_struct("SelectProtocol")
                .field("address", address)
                .field("port", port)
                .field("mode", mode)
                .finish(),
            Self::Heartbeat { timestamp } => f
                .debug_struct("Heartbeat")
                .field("timestamp", timestamp)
                .finish(),
            Self::Speaking { speaking, delay } => f
                .debug_struct("Speaking")
                .field("speaking", speaking)
                .field("delay", delay)
                .finish(),
        }
    }
}

/// Channel move / leave request written to the parent session's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceStateUpdate {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl VoiceStateUpdate {
    #[must_use]
    pub fn join(guild_id: &str, channel_id: &str, self_mute: bool, self_deaf: bool) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            channel_id: Some(channel_id.to_string()),
            self_mute,
            self_deaf,
        }
    }

    /// A leave request: no channel, muted and deafened.
    #[must_use]
    pub fn leave(guild_id: &str) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            channel_id: None,
            self_mute: true,
            self_deaf: true,
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        json!({ "op": VOICE_STATE_UPDATE, "d": self }).to_string()
    }
}
