// Tue Jan 13 2026 - Alex

use crate::memory::Address;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRange {
    start: Address,
    end: Address,
}

impl MemoryRange {
    /// Returns `None` when `end` lies before `start`.
    pub fn new(start: Address, end: Address) -> Option<Self> {
        if end < start {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn from_start_size(start: Address, size: u64) -> Self {
        Self { start, end: start + size }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end
    }

    /// True when `[addr, addr + len)` lies completely inside the range.
    pub fn contains_span(&self, addr: Address, len: u64) -> bool {
        addr >= self.start && addr.as_u64().saturating_add(len) <= self.end.as_u64()
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_bounds() {
        let range = MemoryRange::from_start_size(Address::new(0x1000), 0x100);
        assert!(range.contains(Address::new(0x1000)));
        assert!(!range.contains(Address::new(0x1100)));
        assert!(range.contains_span(Address::new(0x10f0), 0x10));
        assert!(!range.contains_span(Address::new(0x10f0), 0x11));
        assert!(MemoryRange::new(Address::new(2), Address::new(1)).is_none());
    }
}
