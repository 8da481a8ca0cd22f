// Fri Jan 16 2026 - Alex

use crate::analysis::DisasmError;
use crate::memory::MemoryError;
use crate::symbol::SymbolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmulationError {
    #[error("Unsupported instruction `{mnemonic}` at 0x{address:x}")]
    Unsupported { address: u64, mnemonic: String },
    #[error("Register {0} is not emulated")]
    InvalidRegister(String),
    #[error("Divide error at 0x{address:x}")]
    DivideError { address: u64 },
    #[error("Instruction limit of {0} reached")]
    InstructionLimit(usize),
    #[error("No path from function 0x{function:x} to 0x{target:x}")]
    NoPath { function: u64, target: u64 },
    #[error("Emulation ended before reaching 0x{0:x}")]
    TargetNotReached(u64),
    #[error("Only 32-bit code can be emulated (image is {0}-bit)")]
    UnsupportedBitness(u32),
    #[error("Hook failed: {0}")]
    Hook(String),
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
    #[error("Disassembly error: {0}")]
    Disasm(#[from] DisasmError),
    #[error("Symbol error: {0}")]
    Symbol(#[from] SymbolError),
}
