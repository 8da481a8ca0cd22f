// Tue Jan 13 2026 - Alex

use crate::analysis::DisasmError;
use crate::memory::{Address, MemoryReader};
use iced_x86::{
    ConditionCode, Decoder, DecoderOptions, FlowControl, Formatter, Instruction, IntelFormatter,
    Mnemonic, OpKind, Register,
};
use std::fmt;
use std::sync::Arc;

const MAX_INSTRUCTION_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bitness {
    #[default]
    Bit32 = 32,
    Bit64 = 64,
}

pub struct Disassembler {
    reader: Arc<dyn MemoryReader>,
    bitness: Bitness,
}

impl Disassembler {
    pub fn new(reader: Arc<dyn MemoryReader>, bitness: Bitness) -> Self {
        Self { reader, bitness }
    }

    pub fn bitness(&self) -> Bitness {
        self.bitness
    }

    pub fn reader(&self) -> &Arc<dyn MemoryReader> {
        &self.reader
    }

    fn fetch(&self, addr: Address) -> Result<Vec<u8>, DisasmError> {
        if let Ok(bytes) = self.reader.read_bytes(addr, MAX_INSTRUCTION_LEN) {
            return Ok(bytes);
        }

        // Near the end of a mapping, take whatever is readable.
        let mut bytes = Vec::with_capacity(MAX_INSTRUCTION_LEN);
        for i in 0..MAX_INSTRUCTION_LEN as u64 {
            match self.reader.read_u8(addr + i) {
                Ok(b) => bytes.push(b),
                Err(e) if bytes.is_empty() => return Err(e.into()),
                Err(_) => break,
            }
        }
        Ok(bytes)
    }

    pub fn disassemble(&self, addr: Address) -> Result<DecodedInstruction, DisasmError> {
        let bytes = self.fetch(addr)?;
        let mut decoder = Decoder::with_ip(self.bitness as u32, &bytes, addr.as_u64(), DecoderOptions::NONE);
        let instruction = decoder.decode();

        if instruction.is_invalid() {
            return Err(DisasmError::InvalidInstruction { address: addr.as_u64() });
        }

        let mut text = String::new();
        IntelFormatter::new().format(&instruction, &mut text);

        Ok(DecodedInstruction {
            address: addr,
            bytes: bytes[..instruction.len()].to_vec(),
            text,
            instruction,
        })
    }

    /// Linear sweep over `[start, end)`.
    pub fn disassemble_range(&self, start: Address, end: Address) -> Result<Vec<DecodedInstruction>, DisasmError> {
        let mut instructions = Vec::new();
        let mut current = start;

        while current < end {
            let instr = self.disassemble(current)?;
            current = instr.next_address();
            instructions.push(instr);
        }

        Ok(instructions)
    }

    /// Linear sweep from `start` up to and including the first return.
    pub fn disassemble_function(&self, start: Address, max_bytes: usize) -> Result<Vec<DecodedInstruction>, DisasmError> {
        let mut instructions = Vec::new();
        let end = start + max_bytes as u64;
        let mut current = start;

        while current < end {
            let instr = self.disassemble(current)?;
            let is_ret = instr.is_return();
            current = instr.next_address();
            instructions.push(instr);

            if is_ret {
                break;
            }
        }

        Ok(instructions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOperand {
    pub base: Register,
    pub index: Register,
    pub scale: u32,
    pub displacement: u64,
    pub segment: Register,
}

impl MemoryOperand {
    /// Absolute address when neither base nor index is used, e.g. `[__imp__Foo]`.
    pub fn absolute(&self) -> Option<Address> {
        (self.base == Register::None && self.index == Register::None)
            .then(|| Address::new(self.displacement))
    }
}

#[derive(Debug, Clone)]
pub struct DecodedInstruction {
    pub address: Address,
    pub bytes: Vec<u8>,
    pub text: String,
    instruction: Instruction,
}

impl DecodedInstruction {
    pub fn raw(&self) -> &Instruction {
        &self.instruction
    }

    pub fn len(&self) -> usize {
        self.instruction.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn next_address(&self) -> Address {
        self.address + self.instruction.len() as u64
    }

    pub fn mnemonic(&self) -> Mnemonic {
        self.instruction.mnemonic()
    }

    /// Lower-case mnemonic, e.g. `shr`.
    pub fn mnemonic_name(&self) -> String {
        format!("{:?}", self.instruction.mnemonic()).to_lowercase()
    }

    pub fn flow_control(&self) -> FlowControl {
        self.instruction.flow_control()
    }

    pub fn condition_code(&self) -> ConditionCode {
        self.instruction.condition_code()
    }

    pub fn is_call(&self) -> bool {
        matches!(self.flow_control(), FlowControl::Call | FlowControl::IndirectCall)
    }

    pub fn is_return(&self) -> bool {
        self.flow_control() == FlowControl::Return
    }

    pub fn is_conditional_branch(&self) -> bool {
        self.flow_control() == FlowControl::ConditionalBranch
    }

    pub fn is_unconditional_branch(&self) -> bool {
        matches!(self.flow_control(), FlowControl::UnconditionalBranch | FlowControl::IndirectBranch)
    }

    /// Target of a direct `jmp`, `jcc` or `call`.
    pub fn branch_target(&self) -> Option<Address> {
        match self.instruction.op0_kind() {
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
                Some(Address::new(self.instruction.near_branch_target()))
            }
            _ => None,
        }
    }

    pub fn memory_operand(&self) -> Option<MemoryOperand> {
        (0..self.instruction.op_count())
            .any(|i| self.instruction.op_kind(i) == OpKind::Memory)
            .then(|| MemoryOperand {
                base: self.instruction.memory_base(),
                index: self.instruction.memory_index(),
                scale: self.instruction.memory_index_scale(),
                displacement: self.instruction.memory_displacement64(),
                segment: self.instruction.memory_segment(),
            })
    }

    /// Displacement when operand `op` is the memory operand.
    pub fn operand_displacement(&self, op: u32) -> Option<u64> {
        if op < self.instruction.op_count() && self.instruction.op_kind(op) == OpKind::Memory {
            Some(self.instruction.memory_displacement64())
        } else {
            None
        }
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BufferMemory;

    fn disasm(code: Vec<u8>) -> Disassembler {
        Disassembler::new(Arc::new(BufferMemory::new(code, Address::new(0x401000))), Bitness::Bit32)
    }

    #[test]
    fn test_decode_memory_operand() {
        // mov ecx, [ecx+1C0h]
        let d = disasm(vec![0x8b, 0x89, 0xc0, 0x01, 0x00, 0x00]);
        let insn = d.disassemble(Address::new(0x401000)).unwrap();
        assert_eq!(insn.mnemonic(), Mnemonic::Mov);
        assert_eq!(insn.len(), 6);
        assert_eq!(insn.operand_displacement(1), Some(0x1c0));
        assert_eq!(insn.operand_displacement(0), None);
        let mem = insn.memory_operand().unwrap();
        assert_eq!(mem.base, Register::ECX);
        assert!(mem.absolute().is_none());
    }

    #[test]
    fn test_call_targets() {
        // call 401010h ; call dword ptr [402000h]
        let d = disasm(vec![0xe8, 0x0b, 0x00, 0x00, 0x00, 0xff, 0x15, 0x00, 0x20, 0x40, 0x00]);
        let direct = d.disassemble(Address::new(0x401000)).unwrap();
        assert!(direct.is_call());
        assert_eq!(direct.branch_target(), Some(Address::new(0x401010)));

        let indirect = d.disassemble(Address::new(0x401005)).unwrap();
        assert!(indirect.is_call());
        assert_eq!(indirect.branch_target(), None);
        assert_eq!(indirect.memory_operand().unwrap().absolute(), Some(Address::new(0x402000)));
    }

    #[test]
    fn test_disassemble_function_stops_at_ret() {
        // push ebp ; mov ebp, esp ; pop ebp ; ret ; int3
        let d = disasm(vec![0x55, 0x8b, 0xec, 0x5d, 0xc3, 0xcc]);
        let insns = d.disassemble_function(Address::new(0x401000), 0x100).unwrap();
        assert_eq!(insns.len(), 4);
        assert!(insns[3].is_return());
        assert_eq!(insns[1].mnemonic_name(), "mov");
    }

    #[test]
    fn test_truncated_tail_still_decodes() {
        let d = disasm(vec![0x90, 0xc3]);
        let insns = d.disassemble_range(Address::new(0x401000), Address::new(0x401002)).unwrap();
        assert_eq!(insns.len(), 2);
        assert!(d.disassemble(Address::new(0x401002)).is_err());
    }
}
