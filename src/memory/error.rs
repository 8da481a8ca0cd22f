// Tue Jan 13 2026 - Alex

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Read failed at address 0x{0:x}")]
    ReadFailed(u64),
    #[error("Write failed at address 0x{0:x}")]
    WriteFailed(u64),
    #[error("Binary parse error: {0}")]
    BinaryParseError(String),
    #[error("Invalid memory range")]
    InvalidRange,
    #[error("Out of bounds: address 0x{0:x} not in range")]
    OutOfBounds(u64),
    #[error("Allocation of {0} bytes failed: heap exhausted")]
    HeapExhausted(usize),
    #[error("Not supported: {0}")]
    NotSupported(String),
}
