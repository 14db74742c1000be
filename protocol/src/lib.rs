//! Wire formats for the voicegate voice transport client.
//!
//! Everything here is pure encoding and decoding; sockets live in the SDK.

pub mod discovery;
pub mod error;
pub mod gateway;
pub mod io;
pub mod opcode;
pub mod rtp;

pub use discovery::{
    decode_discovery_response, encode_discovery_request, encode_keepalive, ExternalAddress,
    DISCOVERY_PACKET_LEN, KEEPALIVE_LEN,
};
pub use error::ProtocolError;
pub use gateway::{
    GatewayCommand, GatewayEvent, ReadyPayload, SessionDescription, SpeakingNotice,
    VoiceStateUpdate, ENCRYPTION_MODE,
};
pub use opcode::Opcode;
pub use rtp::{
    next_sequence, next_timestamp, nonce_from_header, FrameClock, RtpHeader, HEADER_LEN,
    NONCE_LEN,
};
