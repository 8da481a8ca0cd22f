// Fri Jan 16 2026 - Alex

use crate::analysis::DecodedInstruction;
use crate::emulation::flags::{mask, sign_bit, sign_extend, EFlags};
use crate::emulation::machine::Machine;
use crate::emulation::EmulationError;
use iced_x86::{ConditionCode, FlowControl, Instruction, Mnemonic, OpKind, Register};

/// What the instruction asks the driver to do with EIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next,
    Jump(u32),
    /// Calls have no side effects here; the driver decides how to skip them.
    Call { target: Option<u32> },
    Return(u32),
    Halt,
}

pub fn effective_address(m: &Machine, insn: &Instruction) -> Result<u32, EmulationError> {
    let base = match insn.memory_base() {
        Register::None => 0,
        reg => m.reg(reg)?,
    };
    let index = match insn.memory_index() {
        Register::None => 0,
        reg => m.reg(reg)?.wrapping_mul(insn.memory_index_scale()),
    };
    Ok(base.wrapping_add(index).wrapping_add(insn.memory_displacement32()))
}

fn operand_size(insn: &Instruction, op: u32) -> usize {
    match insn.op_kind(op) {
        OpKind::Register => insn.op_register(op).size(),
        OpKind::Memory => insn.memory_size().size(),
        OpKind::Immediate8 => 1,
        OpKind::Immediate16 | OpKind::Immediate8to16 => 2,
        _ => 4,
    }
}

fn read_op(m: &Machine, insn: &Instruction, op: u32, size: usize) -> Result<u32, EmulationError> {
    let value = match insn.op_kind(op) {
        OpKind::Register => m.reg(insn.op_register(op))?,
        OpKind::Memory => m.read(effective_address(m, insn)?, size),
        OpKind::NearBranch16 | OpKind::NearBranch32 => insn.near_branch32(),
        OpKind::Immediate8
        | OpKind::Immediate8_2nd
        | OpKind::Immediate16
        | OpKind::Immediate32
        | OpKind::Immediate8to16
        | OpKind::Immediate8to32 => insn.immediate(op) as u32,
        other => {
            return Err(EmulationError::Unsupported {
                address: insn.ip(),
                mnemonic: format!("{:?} operand {:?}", insn.mnemonic(), other),
            })
        }
    };
    Ok(value & mask(size))
}

fn write_op(m: &mut Machine, insn: &Instruction, op: u32, size: usize, value: u32) -> Result<(), EmulationError> {
    match insn.op_kind(op) {
        OpKind::Register => m.set_reg(insn.op_register(op), value & mask(size)),
        OpKind::Memory => {
            let ea = effective_address(m, insn)?;
            m.write(ea, size, value);
            Ok(())
        }
        other => Err(EmulationError::Unsupported {
            address: insn.ip(),
            mnemonic: format!("{:?} destination {:?}", insn.mnemonic(), other),
        }),
    }
}

fn unsupported(insn: &Instruction) -> EmulationError {
    EmulationError::Unsupported {
        address: insn.ip(),
        mnemonic: format!("{:?}", insn.mnemonic()).to_lowercase(),
    }
}

/// Executes one instruction against the machine, leaving EIP to the caller.
pub fn execute(m: &mut Machine, decoded: &DecodedInstruction) -> Result<Step, EmulationError> {
    let insn = decoded.raw();

    match insn.mnemonic() {
        Mnemonic::Nop | Mnemonic::Pause | Mnemonic::Lfence | Mnemonic::Mfence | Mnemonic::Prefetchw => {}
        Mnemonic::Int3 | Mnemonic::Hlt | Mnemonic::Ud2 => return Ok(Step::Halt),

        Mnemonic::Mov => {
            let size = operand_size(insn, 0);
            let value = read_op(m, insn, 1, size)?;
            write_op(m, insn, 0, size, value)?;
        }
        Mnemonic::Movzx => {
            let value = read_op(m, insn, 1, operand_size(insn, 1))?;
            write_op(m, insn, 0, operand_size(insn, 0), value)?;
        }
        Mnemonic::Movsx => {
            let src_size = operand_size(insn, 1);
            let value = sign_extend(read_op(m, insn, 1, src_size)?, src_size);
            write_op(m, insn, 0, operand_size(insn, 0), value)?;
        }
        Mnemonic::Lea => {
            let ea = effective_address(m, insn)?;
            write_op(m, insn, 0, operand_size(insn, 0), ea)?;
        }
        Mnemonic::Xchg => {
            let size = operand_size(insn, 0);
            let a = read_op(m, insn, 0, size)?;
            let b = read_op(m, insn, 1, size)?;
            write_op(m, insn, 0, size, b)?;
            write_op(m, insn, 1, size, a)?;
        }

        Mnemonic::Push => {
            let size = (-insn.stack_pointer_increment()) as usize;
            let value = read_op(m, insn, 0, size)?;
            m.push(value, size);
        }
        Mnemonic::Pop => {
            let size = insn.stack_pointer_increment() as usize;
            let value = m.pop(size);
            write_op(m, insn, 0, size, value)?;
        }
        Mnemonic::Leave => {
            let ebp = m.reg(Register::EBP)?;
            m.cpu.set_esp(ebp);
            let saved = m.pop(4);
            m.set_reg(Register::EBP, saved)?;
        }

        Mnemonic::Add | Mnemonic::Adc | Mnemonic::Sub | Mnemonic::Sbb | Mnemonic::Cmp => {
            let size = operand_size(insn, 0);
            let a = read_op(m, insn, 0, size)?;
            let b = read_op(m, insn, 1, size)?;
            let carry = m.cpu.eflags.contains(EFlags::CF);
            let result = match insn.mnemonic() {
                Mnemonic::Add => m.cpu.eflags.add(a, b, false, size),
                Mnemonic::Adc => m.cpu.eflags.add(a, b, carry, size),
                Mnemonic::Sbb => m.cpu.eflags.sub(a, b, carry, size),
                _ => m.cpu.eflags.sub(a, b, false, size),
            };
            if insn.mnemonic() != Mnemonic::Cmp {
                write_op(m, insn, 0, size, result)?;
            }
        }
        Mnemonic::And | Mnemonic::Or | Mnemonic::Xor | Mnemonic::Test => {
            let size = operand_size(insn, 0);
            let a = read_op(m, insn, 0, size)?;
            let b = read_op(m, insn, 1, size)?;
            let result = match insn.mnemonic() {
                Mnemonic::Or => a | b,
                Mnemonic::Xor => a ^ b,
                _ => a & b,
            };
            m.cpu.eflags.set_logic(result, size);
            if insn.mnemonic() != Mnemonic::Test {
                write_op(m, insn, 0, size, result)?;
            }
        }
        Mnemonic::Inc | Mnemonic::Dec => {
            let size = operand_size(insn, 0);
            let a = read_op(m, insn, 0, size)?;
            let carry = m.cpu.eflags.contains(EFlags::CF);
            let result = if insn.mnemonic() == Mnemonic::Inc {
                m.cpu.eflags.add(a, 1, false, size)
            } else {
                m.cpu.eflags.sub(a, 1, false, size)
            };
            m.cpu.eflags.set(EFlags::CF, carry);
            write_op(m, insn, 0, size, result)?;
        }
        Mnemonic::Neg => {
            let size = operand_size(insn, 0);
            let a = read_op(m, insn, 0, size)?;
            let result = m.cpu.eflags.sub(0, a, false, size);
            write_op(m, insn, 0, size, result)?;
        }
        Mnemonic::Not => {
            let size = operand_size(insn, 0);
            let a = read_op(m, insn, 0, size)?;
            write_op(m, insn, 0, size, !a)?;
        }

        Mnemonic::Shl | Mnemonic::Sal | Mnemonic::Shr | Mnemonic::Sar | Mnemonic::Rol | Mnemonic::Ror => {
            shift(m, insn)?;
        }
        Mnemonic::Bt => {
            let size = operand_size(insn, 0);
            let a = read_op(m, insn, 0, size)?;
            let bit = read_op(m, insn, 1, operand_size(insn, 1))? % (size as u32 * 8);
            m.cpu.eflags.set(EFlags::CF, (a >> bit) & 1 != 0);
        }

        Mnemonic::Imul | Mnemonic::Mul => multiply(m, insn)?,
        Mnemonic::Div | Mnemonic::Idiv => divide(m, insn)?,

        Mnemonic::Cdq => {
            let eax = m.reg(Register::EAX)?;
            let edx = if eax & 0x8000_0000 != 0 { u32::MAX } else { 0 };
            m.set_reg(Register::EDX, edx)?;
        }
        Mnemonic::Cwde => {
            let ax = m.reg(Register::AX)?;
            m.set_reg(Register::EAX, sign_extend(ax, 2))?;
        }
        Mnemonic::Cbw => {
            let al = m.reg(Register::AL)?;
            m.set_reg(Register::AX, sign_extend(al, 1))?;
        }
        Mnemonic::Clc => m.cpu.eflags.remove(EFlags::CF),
        Mnemonic::Stc => m.cpu.eflags.insert(EFlags::CF),
        Mnemonic::Cmc => m.cpu.eflags.toggle(EFlags::CF),
        Mnemonic::Cld => m.cpu.eflags.remove(EFlags::DF),
        Mnemonic::Std => m.cpu.eflags.insert(EFlags::DF),

        Mnemonic::Seta
        | Mnemonic::Setae
        | Mnemonic::Setb
        | Mnemonic::Setbe
        | Mnemonic::Sete
        | Mnemonic::Setg
        | Mnemonic::Setge
        | Mnemonic::Setl
        | Mnemonic::Setle
        | Mnemonic::Setne
        | Mnemonic::Setno
        | Mnemonic::Setnp
        | Mnemonic::Setns
        | Mnemonic::Seto
        | Mnemonic::Setp
        | Mnemonic::Sets => {
            let value = m.cpu.eflags.condition(insn.condition_code()) as u32;
            write_op(m, insn, 0, 1, value)?;
        }
        Mnemonic::Cmova
        | Mnemonic::Cmovae
        | Mnemonic::Cmovb
        | Mnemonic::Cmovbe
        | Mnemonic::Cmove
        | Mnemonic::Cmovg
        | Mnemonic::Cmovge
        | Mnemonic::Cmovl
        | Mnemonic::Cmovle
        | Mnemonic::Cmovne
        | Mnemonic::Cmovno
        | Mnemonic::Cmovnp
        | Mnemonic::Cmovns
        | Mnemonic::Cmovo
        | Mnemonic::Cmovp
        | Mnemonic::Cmovs => {
            if m.cpu.eflags.condition(insn.condition_code()) {
                let size = operand_size(insn, 0);
                let value = read_op(m, insn, 1, size)?;
                write_op(m, insn, 0, size, value)?;
            }
        }

        Mnemonic::Jecxz => {
            if m.reg(Register::ECX)? == 0 {
                return Ok(Step::Jump(insn.near_branch32()));
            }
        }
        Mnemonic::Loop => {
            let ecx = m.reg(Register::ECX)?.wrapping_sub(1);
            m.set_reg(Register::ECX, ecx)?;
            if ecx != 0 {
                return Ok(Step::Jump(insn.near_branch32()));
            }
        }
        Mnemonic::Jmp => {
            let target = read_op(m, insn, 0, 4)?;
            return Ok(Step::Jump(target));
        }
        Mnemonic::Call => {
            let target = match insn.op0_kind() {
                OpKind::NearBranch32 | OpKind::NearBranch16 => Some(insn.near_branch32()),
                _ => read_op(m, insn, 0, 4).ok(),
            };
            return Ok(Step::Call { target });
        }
        Mnemonic::Ret => {
            let target = m.pop(4);
            if insn.op_count() == 1 {
                let extra = insn.immediate16() as u32;
                m.cpu.set_esp(m.cpu.esp().wrapping_add(extra));
            }
            return Ok(Step::Return(target));
        }

        _ if insn.flow_control() == FlowControl::ConditionalBranch
            && insn.condition_code() != ConditionCode::None =>
        {
            if m.cpu.eflags.condition(insn.condition_code()) {
                return Ok(Step::Jump(insn.near_branch32()));
            }
        }

        _ => return Err(unsupported(insn)),
    }

    Ok(Step::Next)
}

fn shift(m: &mut Machine, insn: &Instruction) -> Result<(), EmulationError> {
    let size = operand_size(insn, 0);
    let bits = size as u32 * 8;
    let a = read_op(m, insn, 0, size)?;
    let count = read_op(m, insn, 1, 1)? & 0x1f;
    if count == 0 {
        return Ok(());
    }

    let msb = |v: u32| v & sign_bit(size) != 0;
    let flags = &mut m.cpu.eflags;

    let result = match insn.mnemonic() {
        Mnemonic::Shl | Mnemonic::Sal => {
            let wide = (a as u64) << count;
            let result = (wide as u32) & mask(size);
            flags.set(EFlags::CF, count <= bits && (wide >> bits) & 1 != 0);
            flags.set(EFlags::OF, msb(result) != flags.contains(EFlags::CF));
            flags.set_result(result, size);
            result
        }
        Mnemonic::Shr => {
            let result = ((a as u64) >> count) as u32 & mask(size);
            flags.set(EFlags::CF, ((a as u64) >> (count - 1)) & 1 != 0);
            flags.set(EFlags::OF, msb(a));
            flags.set_result(result, size);
            result
        }
        Mnemonic::Sar => {
            let signed = sign_extend(a, size) as i32 as i64;
            let result = (signed >> count.min(bits)) as u32 & mask(size);
            flags.set(EFlags::CF, (signed >> (count - 1).min(bits - 1)) & 1 != 0);
            flags.remove(EFlags::OF);
            flags.set_result(result, size);
            result
        }
        Mnemonic::Rol => {
            let n = count % bits;
            let result = if n == 0 { a } else { ((a << n) | (a >> (bits - n))) & mask(size) };
            flags.set(EFlags::CF, result & 1 != 0);
            flags.set(EFlags::OF, msb(result) != (result & 1 != 0));
            result
        }
        _ => {
            let n = count % bits;
            let result = if n == 0 { a } else { ((a >> n) | (a << (bits - n))) & mask(size) };
            flags.set(EFlags::CF, msb(result));
            flags.set(EFlags::OF, msb(result) != msb(result << 1));
            result
        }
    };

    write_op(m, insn, 0, size, result)
}

fn multiply(m: &mut Machine, insn: &Instruction) -> Result<(), EmulationError> {
    let signed = insn.mnemonic() == Mnemonic::Imul;

    if insn.op_count() == 1 {
        let size = operand_size(insn, 0);
        let src = read_op(m, insn, 0, size)?;
        let acc = m.reg(accumulator(size))?;
        let (lo, hi, overflow) = if signed {
            let product = sign_extend(acc, size) as i32 as i64 * sign_extend(src, size) as i32 as i64;
            let bits = size as u32 * 8;
            let lo = product as u32 & mask(size);
            let fits = sign_extend(lo, size) as i32 as i64 == product;
            (lo, (product >> bits) as u32 & mask(size), !fits)
        } else {
            let product = acc as u64 * src as u64;
            let bits = size as u32 * 8;
            let hi = (product >> bits) as u32 & mask(size);
            (product as u32 & mask(size), hi, hi != 0)
        };
        match size {
            1 => m.set_reg(Register::AX, (hi << 8) | lo)?,
            2 => {
                m.set_reg(Register::AX, lo)?;
                m.set_reg(Register::DX, hi)?;
            }
            _ => {
                m.set_reg(Register::EAX, lo)?;
                m.set_reg(Register::EDX, hi)?;
            }
        }
        m.cpu.eflags.set(EFlags::CF | EFlags::OF, overflow);
        return Ok(());
    }

    let size = operand_size(insn, 0);
    let (a, b) = if insn.op_count() == 3 {
        (read_op(m, insn, 1, size)?, read_op(m, insn, 2, size)?)
    } else {
        (read_op(m, insn, 0, size)?, read_op(m, insn, 1, size)?)
    };
    let product = sign_extend(a, size) as i32 as i64 * sign_extend(b, size) as i32 as i64;
    let result = product as u32 & mask(size);
    let overflow = sign_extend(result, size) as i32 as i64 != product;
    m.cpu.eflags.set(EFlags::CF | EFlags::OF, overflow);
    write_op(m, insn, 0, size, result)
}

fn divide(m: &mut Machine, insn: &Instruction) -> Result<(), EmulationError> {
    let size = operand_size(insn, 0);
    let divisor = read_op(m, insn, 0, size)?;
    let fault = || EmulationError::DivideError { address: insn.ip() };
    if divisor == 0 {
        return Err(fault());
    }

    let bits = size as u32 * 8;
    let dividend: u64 = match size {
        1 => m.reg(Register::AX)? as u64,
        2 => ((m.reg(Register::DX)? as u64) << 16) | m.reg(Register::AX)? as u64,
        _ => ((m.reg(Register::EDX)? as u64) << 32) | m.reg(Register::EAX)? as u64,
    };

    let (quotient, remainder) = if insn.mnemonic() == Mnemonic::Idiv {
        let dividend = ((dividend << (64 - 2 * bits)) as i64) >> (64 - 2 * bits);
        let divisor = sign_extend(divisor, size) as i32 as i64;
        let q = dividend.checked_div(divisor).ok_or_else(fault)?;
        let limit = 1i64 << (bits - 1);
        if q >= limit || q < -limit {
            return Err(fault());
        }
        (q as u32 & mask(size), (dividend % divisor) as u32 & mask(size))
    } else {
        let q = dividend / divisor as u64;
        if q > mask(size) as u64 {
            return Err(fault());
        }
        (q as u32, (dividend % divisor as u64) as u32)
    };

    match size {
        1 => m.set_reg(Register::AX, (remainder << 8) | quotient)?,
        2 => {
            m.set_reg(Register::AX, quotient)?;
            m.set_reg(Register::DX, remainder)?;
        }
        _ => {
            m.set_reg(Register::EAX, quotient)?;
            m.set_reg(Register::EDX, remainder)?;
        }
    }
    Ok(())
}

fn accumulator(size: usize) -> Register {
    match size {
        1 => Register::AL,
        2 => Register::AX,
        _ => Register::EAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Bitness, Disassembler};
    use crate::memory::{Address, BufferMemory, EmulatedMemory};
    use std::sync::Arc;

    const BASE: u64 = 0x401000;

    struct Harness {
        disasm: Disassembler,
        machine: Machine,
    }

    impl Harness {
        fn new(code: Vec<u8>) -> Self {
            let image: Arc<dyn crate::memory::MemoryReader> =
                Arc::new(BufferMemory::new(code, Address::new(BASE)));
            let memory = EmulatedMemory::new(image.clone(), Address::new(0x2000_0000), 0x10_0000);
            let mut machine = Machine::new(memory);
            machine.cpu.set_esp(0x0010_0000);
            Self {
                disasm: Disassembler::new(image, Bitness::Bit32),
                machine,
            }
        }

        /// Runs straight-line code, returning the last step.
        fn run(&mut self, count: usize) -> Step {
            let mut addr = Address::new(BASE);
            let mut step = Step::Next;
            for _ in 0..count {
                let insn = self.disasm.disassemble(addr).unwrap();
                step = execute(&mut self.machine, &insn).unwrap();
                addr = insn.next_address();
            }
            step
        }

        fn reg(&self, reg: Register) -> u32 {
            self.machine.reg(reg).unwrap()
        }
    }

    #[test]
    fn test_mov_from_memory_and_lea() {
        // mov ecx, [ecx+1C0h] ; lea eax, [ecx+edx*4+8]
        let mut h = Harness::new(vec![0x8b, 0x89, 0xc0, 0x01, 0x00, 0x00, 0x8d, 0x44, 0x91, 0x08]);
        h.machine.write(0x3000_01c0, 4, 0x70);
        h.machine.set_reg(Register::ECX, 0x3000_0000).unwrap();
        h.machine.set_reg(Register::EDX, 2).unwrap();
        h.run(2);
        assert_eq!(h.reg(Register::ECX), 0x70);
        assert_eq!(h.reg(Register::EAX), 0x70 + 8 + 8);
    }

    #[test]
    fn test_push_pop_and_stack_args() {
        // push 5 ; push ecx ; pop edx
        let mut h = Harness::new(vec![0x6a, 0x05, 0x51, 0x5a]);
        h.machine.set_reg(Register::ECX, 0xcafe).unwrap();
        h.run(2);
        assert_eq!(h.machine.stack_arg(0), 0xcafe);
        assert_eq!(h.machine.stack_arg(1), 5);
        h.run(3);
        // The second run replays from the start, so two more pushes landed before the pop.
        assert_eq!(h.reg(Register::EDX), 0xcafe);
        assert_eq!(h.machine.cpu.esp(), 0x0010_0000 - 12);
    }

    #[test]
    fn test_inc_preserves_carry() {
        // stc ; inc eax
        let mut h = Harness::new(vec![0xf9, 0x40]);
        h.machine.set_reg(Register::EAX, 0xffff_ffff).unwrap();
        h.run(2);
        assert_eq!(h.reg(Register::EAX), 0);
        assert!(h.machine.cpu.eflags.contains(EFlags::CF | EFlags::ZF));
    }

    #[test]
    fn test_shr_by_cl() {
        // shr eax, cl
        let mut h = Harness::new(vec![0xd3, 0xe8]);
        h.machine.set_reg(Register::EAX, 0x1234_5678).unwrap();
        h.machine.set_reg(Register::ECX, 12).unwrap();
        h.run(1);
        assert_eq!(h.reg(Register::EAX), 0x12345);
        assert!(!h.machine.cpu.eflags.contains(EFlags::CF));
    }

    #[test]
    fn test_movzx_word_and_setcc() {
        // movzx eax, word ptr [ecx+3Ah] ; cmp eax, 1Dh ; sete dl
        let mut h = Harness::new(vec![0x0f, 0xb7, 0x41, 0x3a, 0x83, 0xf8, 0x1d, 0x0f, 0x94, 0xc2]);
        h.machine.write(0x3000_003a, 4, 0xffff_001d);
        h.machine.set_reg(Register::ECX, 0x3000_0000).unwrap();
        h.machine.set_reg(Register::EDX, 0xffff_ff00).unwrap();
        h.run(3);
        assert_eq!(h.reg(Register::EAX), 0x1d);
        assert_eq!(h.reg(Register::EDX), 0xffff_ff01);
    }

    #[test]
    fn test_conditional_branch_and_call() {
        // test ecx, ecx ; jz +2
        let mut h = Harness::new(vec![0x85, 0xc9, 0x74, 0x02]);
        assert_eq!(h.run(2), Step::Jump(0x401006));
        h.machine.set_reg(Register::ECX, 1).unwrap();
        assert_eq!(h.run(2), Step::Next);

        // call 401010h
        let mut h = Harness::new(vec![0xe8, 0x0b, 0x00, 0x00, 0x00]);
        assert_eq!(h.run(1), Step::Call { target: Some(0x401010) });
    }

    #[test]
    fn test_ret_with_immediate() {
        // ret 8
        let mut h = Harness::new(vec![0xc2, 0x08, 0x00]);
        h.machine.push(0x11, 4);
        h.machine.push(0x22, 4);
        h.machine.push(0x401234, 4);
        assert_eq!(h.run(1), Step::Return(0x401234));
        assert_eq!(h.machine.cpu.esp(), 0x0010_0000);
    }

    #[test]
    fn test_mul_and_div() {
        // mul ecx ; div ecx
        let mut h = Harness::new(vec![0xf7, 0xe1, 0xf7, 0xf1]);
        h.machine.set_reg(Register::EAX, 0x8000_0000).unwrap();
        h.machine.set_reg(Register::ECX, 4).unwrap();
        h.run(1);
        assert_eq!(h.reg(Register::EAX), 0);
        assert_eq!(h.reg(Register::EDX), 2);
        assert!(h.machine.cpu.eflags.contains(EFlags::CF));

        let insn = h.disasm.disassemble(Address::new(BASE + 2)).unwrap();
        execute(&mut h.machine, &insn).unwrap();
        assert_eq!(h.reg(Register::EAX), 0x8000_0000);
        assert_eq!(h.reg(Register::EDX), 0);

        h.machine.set_reg(Register::ECX, 0).unwrap();
        assert!(matches!(execute(&mut h.machine, &insn), Err(EmulationError::DivideError { .. })));
    }

    #[test]
    fn test_unsupported_instruction() {
        // cpuid
        let mut h = Harness::new(vec![0x0f, 0xa2]);
        let insn = h.disasm.disassemble(Address::new(BASE)).unwrap();
        assert!(matches!(
            execute(&mut h.machine, &insn),
            Err(EmulationError::Unsupported { address: 0x401000, .. })
        ));
    }
}
