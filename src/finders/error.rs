// Tue Jan 13 2026 - Alex

use crate::analysis::DisasmError;
use crate::emulation::EmulationError;
use crate::memory::MemoryError;
use crate::symbol::SymbolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("{field}: value 0x{value:x} does not occur in the tracer buffer")]
    ValueNotInTracer { field: String, value: u64 },
    #[error("No `{mnemonic}` instruction executed in {function}")]
    NoMatchingInstruction { function: String, mnemonic: String },
    #[error(transparent)]
    Symbol(#[from] SymbolError),
    #[error(transparent)]
    Disasm(#[from] DisasmError),
    #[error(transparent)]
    Emulation(#[from] EmulationError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}
