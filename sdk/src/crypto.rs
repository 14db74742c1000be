//! Shared encryption state negotiated through the session description event.

use std::fmt;

use voicegate_protocol::{SessionDescription, ENCRYPTION_MODE, HEADER_LEN, NONCE_LEN};
use xsalsa20poly1305::aead::{Aead, KeyInit};
use xsalsa20poly1305::{Key, Nonce, XSalsa20Poly1305};

use crate::error::SdkError;

/// Authentication tag overhead added to every payload.
pub const TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    XSalsa20Poly1305,
}

impl EncryptionMode {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        (name == ENCRYPTION_MODE).then_some(Self::XSalsa20Poly1305)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::XSalsa20Poly1305 => ENCRYPTION_MODE,
        }
    }
}

/// Secret key plus mode. Only the keyed cipher is kept, never the raw key bytes.
pub struct EncryptionContext {
    cipher: XSalsa20Poly1305,
    mode: EncryptionMode,
}

impl EncryptionContext {
    /// # Errors
    /// Returns a protocol error if `mode` is not the supported mode.
    pub fn new(secret_key: &[u8; 32], mode: &str) -> Result<Self, SdkError> {
        let mode = EncryptionMode::from_name(mode).ok_or_else(|| {
            SdkError::Protocol(voicegate_protocol::ProtocolError::InvalidPayload {
                op: voicegate_protocol::Opcode::SessionDescription.as_u8(),
                reason: format!("unsupported encryption mode {:?}", mode),
            })
        })?;

        Ok(Self {
            cipher: XSalsa20Poly1305::new(Key::from_slice(secret_key)),
            mode,
        })
    }

    /// # Errors
    /// Returns a protocol error if the description names an unsupported mode.
    pub fn from_description(description: &SessionDescription) -> Result<Self, SdkError> {
        Self::new(&description.secret_key, &description.mode)
    }

    #[must_use]
    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Build a transport packet: the cleartext header followed by the
    /// authenticated ciphertext of `payload`, keyed by the header-derived nonce.
    ///
    /// # Errors
    /// Returns error if the cipher refuses the payload.
    pub fn seal(&self, header: &[u8; HEADER_LEN], payload: &[u8]) -> Result<Vec<u8>, SdkError> {
        let nonce = voicegate_protocol::nonce_from_header(header);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| SdkError::Authentication)?;

        let mut packet = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        packet.extend_from_slice(header);
        packet.extend_from_slice(&ciphertext);
        Ok(packet)
    }

    /// Decrypt and authenticate `ciphertext`.
    ///
    /// # Errors
    /// Returns [`SdkError::Authentication`] on a wrong key, wrong nonce or
    /// tampered ciphertext. No partial plaintext is ever returned.
    pub fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, SdkError> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SdkError::Authentication)
    }
}

impl fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("key", &"<redacted>")
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicegate_protocol::RtpHeader;

    fn context(key: u8) -> EncryptionContext {
        EncryptionContext::new(&[key; 32], ENCRYPTION_MODE).unwrap()
    }

    #[test]
    fn seal_then_open_round_trips() {
        let ctx = context(7);
        let header = RtpHeader::outbound(1, 960, 0x1234_5678);
        let payload = b"opus frame bytes";

        let packet = ctx.seal(&header.encode(), payload).unwrap();
        assert_eq!(&packet[..HEADER_LEN], &header.encode());
        assert_eq!(packet.len(), HEADER_LEN + payload.len() + TAG_LEN);

        let opened = ctx.open(&header.nonce(), &packet[HEADER_LEN..]).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let header = RtpHeader::outbound(2, 1920, 1);
        let packet = context(1).seal(&header.encode(), b"hello").unwrap();

        let result = context(2).open(&header.nonce(), &packet[HEADER_LEN..]);
        assert!(matches!(result, Err(SdkError::Authentication)));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let ctx = context(3);
        let header = RtpHeader::outbound(3, 2880, 1);
        let mut packet = ctx.seal(&header.encode(), b"hello").unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0x01;

        assert!(matches!(
            ctx.open(&header.nonce(), &packet[HEADER_LEN..]),
            Err(SdkError::Authentication)
        ));
    }

    #[test]
    fn header_is_bound_through_nonce() {
        let ctx = context(4);
        let header = RtpHeader::outbound(4, 3840, 1);
        let packet = ctx.seal(&header.encode(), b"hello").unwrap();

        let other = RtpHeader::outbound(5, 3840, 1);
        assert!(ctx.open(&other.nonce(), &packet[HEADER_LEN..]).is_err());
    }

    #[test]
    fn unsupported_mode_is_rejected() {
        let err = EncryptionContext::new(&[0; 32], "aead_aes256_gcm").unwrap_err();
        assert!(matches!(err, SdkError::Protocol(_)));
        assert_eq!(context(0).mode().as_str(), "xsalsa20_poly1305");
    }

    #[test]
    fn debug_hides_key() {
        assert!(format!("{:?}", context(9)).contains("<redacted>"));
    }
}
