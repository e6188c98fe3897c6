//! Positional XOR cipher used by version 1 archives.

/// Obfuscation applied to every byte of a version 1 archive after the header.
///
/// The transform depends on the absolute file offset of each byte, so a buffer
/// must always be processed together with the offset it was read from (or will
/// be written to). Applying it twice at the same offset restores the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cipher {
    key: Option<u32>,
}

impl Cipher {
    /// Derives the cipher from the raw key stored in the archive header.
    ///
    /// A raw key of zero disables the cipher.
    pub fn new(raw_key: u32) -> Self {
        if raw_key == 0 {
            return Self { key: None };
        }

        Self {
            key: Some(!(raw_key.wrapping_mul(4) | (raw_key >> 6))),
        }
    }

    /// Returns true when bytes are actually transformed.
    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Transforms `buf` in place, treating `buf[0]` as the byte at `offset`.
    pub fn apply(&self, buf: &mut [u8], offset: u64) {
        let Some(key) = self.key else {
            return;
        };

        // only the low byte survives the final truncation
        let key = key as u8;
        let mut position = offset as u8;
        for byte in buf.iter_mut() {
            *byte = (position ^ key) ^ !*byte;
            position = position.wrapping_add(1);
        }
    }
}
