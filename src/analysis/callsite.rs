// Fri Jan 16 2026 - Alex

use crate::analysis::cfg::ControlFlowGraph;
use crate::analysis::disassembler::{DecodedInstruction, Disassembler};
use crate::analysis::DisasmError;
use crate::memory::Address;
use crate::symbol::{Symbol, SymbolResolver};
use iced_x86::FlowControl;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CallSite {
    pub function: String,
    pub function_start: Address,
    pub call_address: Address,
    pub callee: String,
}

impl CallSite {
    /// Bytes between the function entry and the call instruction.
    pub fn distance(&self) -> u64 {
        self.call_address.as_u64() - self.function_start.as_u64()
    }
}

pub struct CallSiteLocator<'a> {
    symbols: &'a SymbolResolver,
    disasm: &'a Disassembler,
    max_function_size: usize,
}

impl<'a> CallSiteLocator<'a> {
    pub fn new(symbols: &'a SymbolResolver, disasm: &'a Disassembler, max_function_size: usize) -> Self {
        Self {
            symbols,
            disasm,
            max_function_size,
        }
    }

    /// Address and full name of the first symbol containing `fragment`.
    pub fn find_name(&self, fragment: &str) -> Result<(Address, String), DisasmError> {
        let symbol = self.symbols.find_name(fragment)?;
        Ok((symbol.address, symbol.name.clone()))
    }

    /// Every call reachable from `function_start`, in address order, with its resolved callee.
    pub fn find_calls(&self, function_start: Address) -> Result<Vec<(DecodedInstruction, Option<&'a Symbol>)>, DisasmError> {
        let cfg = ControlFlowGraph::build(self.disasm, function_start, self.max_function_size)?;

        Ok(cfg
            .instructions()
            .into_iter()
            .filter(|i| i.is_call())
            .map(|i| (i.clone(), self.resolve_callee(i)))
            .collect())
    }

    /// Finds the call to `target` inside `function`; both are name fragments.
    pub fn locate_call_in_fn(&self, function: &str, target: &str) -> Result<CallSite, DisasmError> {
        let (function_start, function_name) = self.find_name(function)?;

        let calls = self.find_calls(function_start)?;
        let (call, callee) = calls
            .into_iter()
            .find_map(|(insn, callee)| {
                callee
                    .filter(|s| s.name.contains(target))
                    .map(|s| (insn, s.name.clone()))
            })
            .ok_or_else(|| DisasmError::CallNotFound {
                function: function_name.clone(),
                target: target.to_string(),
            })?;

        log::debug!(
            "Located call to {} at {} ({}+0x{:x})",
            callee,
            call.address,
            function,
            call.address.as_u64() - function_start.as_u64()
        );

        Ok(CallSite {
            function: function_name,
            function_start,
            call_address: call.address,
            callee,
        })
    }

    fn resolve_callee(&self, insn: &DecodedInstruction) -> Option<&'a Symbol> {
        if let Some(target) = insn.branch_target() {
            if let Some(symbol) = self.symbols.resolve_address(target) {
                return Some(symbol);
            }
            return self.resolve_thunk(target);
        }

        insn.memory_operand()
            .and_then(|m| m.absolute())
            .and_then(|slot| self.symbols.resolve_address(slot))
    }

    /// Follows a `jmp [slot]` import thunk.
    fn resolve_thunk(&self, target: Address) -> Option<&'a Symbol> {
        let thunk = self.disasm.disassemble(target).ok()?;
        if thunk.flow_control() != FlowControl::IndirectBranch {
            return None;
        }
        thunk
            .memory_operand()
            .and_then(|m| m.absolute())
            .and_then(|slot| self.symbols.resolve_address(slot))
    }
}
