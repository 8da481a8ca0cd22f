// Tue Jan 13 2026 - Alex

pub mod callsite;
pub mod cfg;
pub mod disassembler;
pub mod error;

pub use callsite::{CallSite, CallSiteLocator};
pub use cfg::{CfgBlock, ControlFlowGraph};
pub use disassembler::{Bitness, DecodedInstruction, Disassembler, MemoryOperand};
pub use error::DisasmError;
