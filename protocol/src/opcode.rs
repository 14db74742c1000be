macro_rules! opcodes {
    ($($name:ident = $val:expr),* $(,)?) => {
        /// Voice gateway opcodes understood by this client.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode { $($name = $val,)* }

        impl Opcode {
            #[must_use]
            pub const fn as_u8(self) -> u8 { self as u8 }

            /// Maps a raw opcode, returning `None` for anything this client does not know.
            #[must_use]
            pub const fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($val => Some(Self::$name),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    // Sent by the client, or received as an identify acknowledgement
    Identify = 0,
    SelectProtocol = 1,
    // Received
    Ready = 2,
    // Heartbeat from the client, heartbeat ack from the gateway
    Heartbeat = 3,
    SessionDescription = 4,
    Speaking = 5,
}

/// Opcode of the parent session's voice state update, written to the
/// parent's own gateway connection rather than the voice gateway.
pub const VOICE_STATE_UPDATE: u8 = 4;
