pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod session;
mod network;
mod voice;

pub use config::VoiceConfig;
pub use connection::{VoiceConnection, VoiceCredentials};
pub use crypto::{EncryptionContext, EncryptionMode};
pub use error::SdkError;
pub use network::VoiceEvent;
pub use session::{ParentSession, VoiceRegistry};
pub use voice::{Packet, VoiceStats};

pub use voicegate_protocol as protocol;
