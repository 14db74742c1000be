//! The 12-byte RTP-style header carried in front of every audio packet.
//!
//! Format: `[0x80][0x78][sequence: u16 BE][timestamp: u32 BE][ssrc: u32 BE]`.
//! The header travels in the clear and doubles as the per-packet nonce.

use crate::error::ProtocolError;
use crate::io::Reader;

pub const HEADER_LEN: usize = 12;
pub const NONCE_LEN: usize = 24;

/// Version/flags byte. Also the coarse "is audio" marker checked on receive.
pub const VERSION_FLAGS: u8 = 0x80;
pub const PAYLOAD_TYPE: u8 = 0x78;

/// Parsed audio packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Raw version/flags and payload type bytes.
    pub kind: [u8; 2],
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header for an outbound audio frame.
    #[must_use]
    pub fn outbound(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            kind: [VERSION_FLAGS, PAYLOAD_TYPE],
            sequence,
            timestamp,
            ssrc,
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..2].copy_from_slice(&self.kind);
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Parse the header at the start of a datagram.
    ///
    /// Only the first byte is validated; anything else that is at least
    /// [`HEADER_LEN`] bytes long and starts with [`VERSION_FLAGS`] is accepted.
    ///
    /// # Errors
    /// Returns error if the datagram is shorter than a header or is not audio.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::PacketTooShort {
                expected: HEADER_LEN,
                got: buf.len(),
            });
        }
        if buf[0] != VERSION_FLAGS {
            return Err(ProtocolError::InvalidHeader(buf[0]));
        }

        let mut r = Reader::new(buf);
        let flags = r.read_u8()?;
        let payload_type = r.read_u8()?;

        Ok(Self {
            kind: [flags, payload_type],
            sequence: r.read_u16()?,
            timestamp: r.read_u32()?,
            ssrc: r.read_u32()?,
        })
    }

    /// Nonce for this packet: the encoded header followed by twelve zero bytes.
    #[must_use]
    pub fn nonce(&self) -> [u8; NONCE_LEN] {
        nonce_from_header(&self.encode())
    }
}

/// Derive the 24-byte nonce from a raw 12-byte header.
#[must_use]
pub fn nonce_from_header(header: &[u8; HEADER_LEN]) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..HEADER_LEN].copy_from_slice(header);
    nonce
}

/// Sequence number following `sequence`; 0xFFFF wraps to 0.
#[must_use]
pub const fn next_sequence(sequence: u16) -> u16 {
    sequence.wrapping_add(1)
}

/// Timestamp following `timestamp` after a frame of `frame_size` samples.
///
/// Resets to 0 once the sum reaches 0xFFFFFFFF instead of wrapping modulo 2^32.
#[must_use]
pub fn next_timestamp(timestamp: u32, frame_size: u32) -> u32 {
    let next = u64::from(timestamp) + u64::from(frame_size);
    if next >= u64::from(u32::MAX) {
        0
    } else {
        // Lossless: next < u32::MAX here.
        next as u32
    }
}

/// Sequence/timestamp state for one outbound stream.
#[derive(Debug, Clone)]
pub struct FrameClock {
    ssrc: u32,
    frame_size: u32,
    sequence: u16,
    timestamp: u32,
}

impl FrameClock {
    #[must_use]
    pub fn new(ssrc: u32, frame_size: u32) -> Self {
        Self {
            ssrc,
            frame_size,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Header for the frame about to be sent.
    #[must_use]
    pub fn header(&self) -> RtpHeader {
        RtpHeader::outbound(self.sequence, self.timestamp, self.ssrc)
    }

    /// Move past the frame that was just sent.
    pub fn advance(&mut self) {
        self.sequence = next_sequence(self.sequence);
        self.timestamp = next_timestamp(self.timestamp, self.frame_size);
    }

    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }
}
