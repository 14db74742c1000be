//! UDP datagrams exchanged outside the audio stream: the IP discovery probe
//! and the NAT keepalive.

use crate::error::ProtocolError;
use crate::io::{Reader, Writer};

/// Size of both the discovery probe and its response.
pub const DISCOVERY_PACKET_LEN: usize = 70;

/// Size of a keepalive datagram.
pub const KEEPALIVE_LEN: usize = 8;

const ADDRESS_OFFSET: usize = 4;
const ADDRESS_END: usize = 20;
const PORT_OFFSET: usize = 68;

/// Our address and port as seen by the voice server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAddress {
    pub ip: String,
    pub port: u16,
}

/// Build the discovery probe: the SSRC big-endian, then zeros.
#[must_use]
pub fn encode_discovery_request(ssrc: u32) -> Vec<u8> {
    let mut w = Writer::with_capacity(DISCOVERY_PACKET_LEN);
    w.write_u32(ssrc);
    w.pad_to(DISCOVERY_PACKET_LEN);
    w.into_vec()
}

/// Parse the discovery response.
///
/// The address is the ASCII run starting at offset 4 and ending at the first
/// zero byte, never reaching past offset 20. The port is little-endian at 68..70.
///
/// # Errors
/// Returns error if the response is shorter than 70 bytes, the address is
/// empty or is not valid text.
pub fn decode_discovery_response(buf: &[u8]) -> Result<ExternalAddress, ProtocolError> {
    if buf.len() < DISCOVERY_PACKET_LEN {
        return Err(ProtocolError::PacketTooShort {
            expected: DISCOVERY_PACKET_LEN,
            got: buf.len(),
        });
    }

    let mut r = Reader::new(buf);
    r.skip(ADDRESS_OFFSET)?;
    let field = r.read_bytes(ADDRESS_END - ADDRESS_OFFSET)?;
    let len = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    let ip = std::str::from_utf8(&field[..len]).map_err(|_| ProtocolError::InvalidUtf8)?;
    if ip.is_empty() {
        return Err(ProtocolError::InvalidAddress);
    }

    r.skip(PORT_OFFSET - r.position())?;
    let port = r.read_u16_le()?;

    Ok(ExternalAddress {
        ip: ip.to_string(),
        port,
    })
}

/// Build a keepalive datagram carrying `counter` little-endian.
#[must_use]
pub fn encode_keepalive(counter: u64) -> Vec<u8> {
    let mut w = Writer::with_capacity(KEEPALIVE_LEN);
    w.write_u64_le(counter);
    w.into_vec()
}
