// Fri Jan 16 2026 - Alex

use crate::memory::MemoryError;
use crate::symbol::SymbolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisasmError {
    #[error("Invalid instruction at 0x{address:x}")]
    InvalidInstruction { address: u64 },
    #[error("Unsupported bitness: {0}")]
    UnsupportedBitness(u32),
    #[error("No call to `{target}` found in `{function}`")]
    CallNotFound { function: String, target: String },
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
    #[error("Symbol error: {0}")]
    Symbol(#[from] SymbolError),
}
