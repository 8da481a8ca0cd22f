// Fri Jan 16 2026 - Alex

/// Counter buffer whose contents map a recovered value back to the offset it came from.
///
/// Element `i` holds the little-endian counter `i` at `element_size` bytes. A
/// structure field at offset `i * element_size` therefore reads back as `i`
/// when the structure pointer is aimed at the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerPattern {
    bytes: Vec<u8>,
    element_size: usize,
}

impl TracerPattern {
    pub const DEFAULT_ELEMENT_SIZE: usize = 4;

    pub fn generate(len: usize, element_size: usize) -> Self {
        let element_size = match element_size {
            1 | 2 | 4 | 8 => element_size,
            _ => Self::DEFAULT_ELEMENT_SIZE,
        };

        let mut bytes = Vec::with_capacity(len + element_size);
        let mut counter: u64 = 0;
        while bytes.len() < len {
            bytes.extend_from_slice(&counter.to_le_bytes()[..element_size]);
            counter += 1;
        }
        bytes.truncate(len);

        Self { bytes, element_size }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Byte offset of `needle` in the buffer.
    ///
    /// Element boundaries are tried first. Counters above 255 overlap at byte
    /// granularity (256 also matches at offset 3 with 4-byte elements), and
    /// the aligned hit is the one that names a field.
    pub fn locate(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || needle.len() > self.bytes.len() {
            return None;
        }

        let aligned = (0..=self.bytes.len() - needle.len())
            .step_by(self.element_size)
            .find(|&at| &self.bytes[at..at + needle.len()] == needle);

        aligned.or_else(|| self.bytes.windows(needle.len()).position(|w| w == needle))
    }

    pub fn locate_u32(&self, value: u32) -> Option<usize> {
        self.locate(&value.to_le_bytes())
    }

    pub fn locate_u16(&self, value: u16) -> Option<usize> {
        self.locate(&value.to_le_bytes())
    }
}

impl AsRef<[u8]> for TracerPattern {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
