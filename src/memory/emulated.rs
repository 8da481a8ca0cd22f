// Fri Jan 16 2026 - Alex

use crate::memory::{Address, MemoryError, MemoryReader, MemoryWriter};
use ahash::AHashMap;
use std::sync::Arc;

pub const PAGE_SIZE: u64 = 0x1000;

/// Copy-on-write page overlay over a backing image.
///
/// Reads fall through to the backing reader and then to zero, so code under
/// emulation never faults on memory nobody mapped. Writes only ever touch the
/// overlay.
pub struct EmulatedMemory {
    backing: Arc<dyn MemoryReader>,
    pages: AHashMap<u64, Box<[u8]>>,
    heap_next: u64,
    heap_end: u64,
}

impl EmulatedMemory {
    pub fn new(backing: Arc<dyn MemoryReader>, heap_base: Address, heap_size: u64) -> Self {
        Self {
            backing,
            pages: AHashMap::new(),
            heap_next: heap_base.as_u64(),
            heap_end: heap_base.as_u64() + heap_size,
        }
    }

    pub fn backing(&self) -> &Arc<dyn MemoryReader> {
        &self.backing
    }

    pub fn mapped_pages(&self) -> usize {
        self.pages.len()
    }

    /// Copies `data` into a fresh, page-aligned heap allocation.
    pub fn load_bytes(&mut self, data: &[u8]) -> Result<Address, MemoryError> {
        let size = (data.len() as u64).max(1);
        let start = Address::new(self.heap_next).align_up(PAGE_SIZE as usize);
        let end = start.as_u64() + size;
        if end > self.heap_end {
            return Err(MemoryError::HeapExhausted(data.len()));
        }
        self.write_bytes(start, data)?;
        self.heap_next = end;
        log::trace!("Loaded {} bytes at {}", data.len(), start);
        Ok(start)
    }

    fn backing_byte(&self, addr: u64) -> u8 {
        self.backing.read_u8(Address::new(addr)).unwrap_or(0)
    }

    fn page_mut(&mut self, page: u64) -> &mut [u8] {
        let backing = &self.backing;
        self.pages.entry(page).or_insert_with(|| {
            let mut initial = match backing.read_bytes(Address::new(page), PAGE_SIZE as usize) {
                Ok(bytes) => bytes,
                Err(_) => (0..PAGE_SIZE)
                    .map(|i| backing.read_u8(Address::new(page + i)).unwrap_or(0))
                    .collect(),
            };
            initial.resize(PAGE_SIZE as usize, 0);
            initial.into_boxed_slice()
        })
    }

    pub fn read_byte(&self, addr: u64) -> u8 {
        let page = addr & !(PAGE_SIZE - 1);
        match self.pages.get(&page) {
            Some(bytes) => bytes.get((addr - page) as usize).copied().unwrap_or(0),
            None => self.backing_byte(addr),
        }
    }

    /// Reads `len` bytes, never failing on unmapped memory.
    pub fn read_span(&self, addr: Address, len: usize) -> Vec<u8> {
        let start = addr.as_u64();
        (0..len as u64)
            .map(|i| self.read_byte(start.wrapping_add(i) & 0xffff_ffff))
            .collect()
    }

    pub fn read_value(&self, addr: Address, size: usize) -> u64 {
        let bytes = self.read_span(addr, size);
        bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    pub fn write_value(&mut self, addr: Address, size: usize, value: u64) {
        let bytes = value.to_le_bytes();
        self.write_span(addr, &bytes[..size]);
    }

    fn write_span(&mut self, addr: Address, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            let target = addr.as_u64().wrapping_add(i as u64) & 0xffff_ffff;
            let page = target & !(PAGE_SIZE - 1);
            let slot = (target - page) as usize;
            let bytes = self.page_mut(page);
            if let Some(b) = bytes.get_mut(slot) {
                *b = byte;
            }
        }
    }
}

impl MemoryWriter for EmulatedMemory {
    fn write_bytes(&mut self, addr: Address, data: &[u8]) -> Result<(), MemoryError> {
        self.write_span(addr, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BufferMemory;

    fn memory() -> EmulatedMemory {
        let image = BufferMemory::new(vec![0xaa; 0x20], Address::new(0x401000));
        EmulatedMemory::new(Arc::new(image), Address::new(0x2000_0000), 0x10_0000)
    }

    #[test]
    fn test_unmapped_reads_are_zero() {
        let mem = memory();
        assert_eq!(mem.read_value(Address::new(0x1234_5678), 4), 0);
        assert_eq!(mem.read_byte(0x401000), 0xaa);
        assert_eq!(mem.mapped_pages(), 0);
    }

    #[test]
    fn test_write_is_copy_on_write() {
        let mut mem = memory();
        mem.write_value(Address::new(0x401004), 2, 0x1122);
        assert_eq!(mem.read_value(Address::new(0x401003), 4), 0xaa1122aa);
        // Rest of the page was seeded from the image.
        assert_eq!(mem.read_byte(0x401010), 0xaa);
        assert_eq!(mem.read_byte(0x401020), 0x00);
    }

    #[test]
    fn test_write_across_page_boundary() {
        let mut mem = memory();
        mem.write_value(Address::new(0x7000_0ffe), 4, 0xdeadbeef);
        assert_eq!(mem.read_value(Address::new(0x7000_0ffe), 4), 0xdeadbeef);
        assert_eq!(mem.mapped_pages(), 2);
    }

    #[test]
    fn test_load_bytes_allocates_fresh_pages() {
        let mut mem = memory();
        let first = mem.load_bytes(&[1, 2, 3]).unwrap();
        let second = mem.load_bytes(&[4, 5]).unwrap();
        assert_eq!(first, Address::new(0x2000_0000));
        assert_eq!(second, Address::new(0x2000_1000));
        assert_eq!(mem.read_span(first, 3), vec![1, 2, 3]);
        assert_eq!(mem.read_span(second, 2), vec![4, 5]);
    }

    #[test]
    fn test_heap_exhaustion() {
        let image = BufferMemory::new(Vec::new(), Address::new(0x401000));
        let mut mem = EmulatedMemory::new(Arc::new(image), Address::new(0x2000_0000), 0x10);
        assert!(matches!(mem.load_bytes(&[0; 0x20]), Err(MemoryError::HeapExhausted(0x20))));
    }
}
