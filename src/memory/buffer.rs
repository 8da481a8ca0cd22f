// Wed Jan 15 2026 - Alex

use crate::memory::{Address, MemoryError, MemoryRange, MemoryReader, MemoryRegion, Protection};
use std::sync::Arc;

/// A flat image held in memory at a fixed base, used for raw code dumps.
#[derive(Clone)]
pub struct BufferMemory {
    data: Arc<Vec<u8>>,
    base_address: Address,
    protection: Protection,
}

impl BufferMemory {
    pub fn new(data: Vec<u8>, base_address: Address) -> Self {
        Self {
            data: Arc::new(data),
            base_address,
            protection: Protection::ReadExecute,
        }
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P, base_address: Address) -> Result<Self, MemoryError> {
        let data = std::fs::read(path)?;
        Ok(Self::new(data, base_address))
    }

    pub fn with_protection(mut self, protection: Protection) -> Self {
        self.protection = protection;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn range(&self) -> MemoryRange {
        MemoryRange::from_start_size(self.base_address, self.data.len() as u64)
    }
}

impl MemoryReader for BufferMemory {
    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        if !self.range().contains_span(addr, len as u64) {
            return Err(MemoryError::OutOfBounds(addr.as_u64()));
        }
        let offset = (addr.as_u64() - self.base_address.as_u64()) as usize;
        Ok(self.data[offset..offset + len].to_vec())
    }

    fn get_base_address(&self) -> Address {
        self.base_address
    }

    fn get_regions(&self) -> Result<Vec<MemoryRegion>, MemoryError> {
        Ok(vec![MemoryRegion::new(self.range(), self.protection, "buffer".to_string())])
    }
}
