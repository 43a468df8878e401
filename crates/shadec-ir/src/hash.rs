//! CRC64 content keys.

use crc::{CRC_64_ECMA_182, Crc, Digest};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// One-shot CRC64 of a byte slice.
pub fn crc64(bytes: &[u8]) -> u64 {
    CRC64.checksum(bytes)
}

/// Incremental CRC64 builder used for structural keys.
///
/// Strings are length-prefixed so `("ab", "c")` and `("a", "bc")` produce
/// different keys.
pub struct KeyBuilder {
    digest: Digest<'static, u64>,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyBuilder {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.digest.update(bytes);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes(&[v])
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32);
        self.bytes(s.as_bytes())
    }

    pub fn finish(self) -> u64 {
        self.digest.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_length_prefixed() {
        let mut a = KeyBuilder::new();
        a.str("ab").str("c");
        let mut b = KeyBuilder::new();
        b.str("a").str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut k = KeyBuilder::new();
        k.bytes(b"shader");
        assert_eq!(k.finish(), crc64(b"shader"));
    }
}
