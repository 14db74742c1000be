use crate::error::ProtocolError;

/// Helper for reading binary data with automatic cursor advancement.
///
/// Multi-byte reads are big-endian unless the method name says otherwise.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[inline]
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    fn take<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or(ProtocolError::PacketTooShort {
                expected: self.pos + N,
                got: self.data.len(),
            })?;
        out.copy_from_slice(bytes);
        self.pos += N;
        Ok(out)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take::<1>()?[0])
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    #[inline]
    pub fn read_u16_le(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or(ProtocolError::PacketTooShort {
                expected: self.pos + len,
                got: self.data.len(),
            })?;
        self.pos += len;
        Ok(bytes)
    }

    /// Advances the cursor without inspecting the skipped bytes.
    pub fn skip(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.read_bytes(len).map(|_| ())
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_mixed_endianness() {
        let data = [0x12, 0x34, 0x34, 0x12, 0xDE, 0xAD, 0xBE, 0xEF, 0xFF];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u16_le().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.position(), 8);
        assert_eq!(r.remaining(), &[0xFF]);
    }

    #[test]
    fn short_read_reports_expected_length() {
        let data = [0x01, 0x02];
        let mut r = Reader::new(&data);
        r.skip(1).unwrap();
        assert_eq!(
            r.read_u32(),
            Err(ProtocolError::PacketTooShort { expected: 5, got: 2 })
        );
        // A failed read leaves the cursor where it was.
        assert_eq!(r.position(), 1);
    }
}
