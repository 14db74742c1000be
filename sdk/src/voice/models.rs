/// Decrypted inbound audio packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub ssrc: u32,
    pub sequence: u16,
    pub timestamp: u32,
    /// Version/flags and payload type bytes, copied from the header.
    pub kind: [u8; 2],
    pub opus: Vec<u8>,
    /// Decoded samples. Never filled in by the transport.
    pub pcm: Option<Vec<i16>>,
}
