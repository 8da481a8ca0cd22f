// Fri Jan 16 2026 - Alex

use crate::analysis::{Bitness, ControlFlowGraph, DecodedInstruction, Disassembler};
use crate::emulation::exec::{self, Step};
use crate::emulation::hooks::Hooks;
use crate::emulation::machine::Machine;
use crate::emulation::EmulationError;
use crate::memory::{Address, EmulatedMemory, MemoryReader};
use crate::symbol::SymbolResolver;
use ahash::AHashMap;
use iced_x86::Register;
use std::sync::Arc;

/// Return address pushed before every run; a `ret` to it ends `emulate_range`.
pub const RETURN_SENTINEL: u32 = 0x0bad_c0de;

const STACK_HEADROOM: u64 = 0x1000;

#[derive(Debug, Clone)]
pub struct EmulationOptions {
    pub stack_base: u64,
    pub stack_size: u64,
    pub heap_base: u64,
    pub heap_size: u64,
    pub max_instructions: usize,
    pub max_function_size: usize,
    pub skip_unsupported: bool,
}

impl Default for EmulationOptions {
    fn default() -> Self {
        Self {
            stack_base: 0x0700_0000,
            stack_size: 0x0010_0000,
            heap_base: 0x0800_0000,
            heap_size: 0x0100_0000,
            max_instructions: 10_000,
            max_function_size: 0x4000,
            skip_unsupported: true,
        }
    }
}

pub struct EmulationDriver {
    machine: Machine,
    disasm: Disassembler,
    symbols: Arc<SymbolResolver>,
    options: EmulationOptions,
    trace: Vec<DecodedInstruction>,
    // callee -> bytes its `ret imm16` releases
    callee_cleanup: AHashMap<u32, u32>,
}

impl EmulationDriver {
    pub fn new(
        reader: Arc<dyn MemoryReader>,
        symbols: Arc<SymbolResolver>,
        bitness: Bitness,
        options: EmulationOptions,
    ) -> Result<Self, EmulationError> {
        if bitness != Bitness::Bit32 {
            return Err(EmulationError::UnsupportedBitness(bitness as u32));
        }

        let memory = EmulatedMemory::new(reader.clone(), Address::new(options.heap_base), options.heap_size);

        Ok(Self {
            machine: Machine::new(memory),
            disasm: Disassembler::new(reader, bitness),
            symbols,
            options,
            trace: Vec::new(),
            callee_cleanup: AHashMap::new(),
        })
    }

    pub fn options(&self) -> &EmulationOptions {
        &self.options
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Copies `data` into emulated memory and returns where it landed.
    pub fn load_bytes(&mut self, data: &[u8]) -> Result<Address, EmulationError> {
        Ok(self.machine.memory.load_bytes(data)?)
    }

    pub fn reg_read(&self, reg: Register) -> Result<u32, EmulationError> {
        self.machine.reg(reg)
    }

    pub fn reg_write(&mut self, reg: Register, value: u32) -> Result<(), EmulationError> {
        self.machine.set_reg(reg, value)
    }

    pub fn read_emu_bytes(&self, addr: Address, len: usize) -> Vec<u8> {
        self.machine.memory.read_span(addr, len)
    }

    pub fn read_u32(&self, addr: Address) -> u32 {
        self.machine.read(addr.as_u32(), 4)
    }

    pub fn trace(&self) -> &[DecodedInstruction] {
        &self.trace
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    fn reset_registers(&mut self) {
        let top = self.options.stack_base + self.options.stack_size - STACK_HEADROOM;
        self.machine.cpu.reset();
        self.machine.cpu.set_esp(top as u32);
        self.machine.push(RETURN_SENTINEL, 4);
        let esp = self.machine.cpu.esp();
        // EBP is always a GPR, this cannot fail.
        let _ = self.machine.set_reg(Register::EBP, esp);
    }

    /// Drives execution along a block path to each target in turn.
    ///
    /// Branches follow the path rather than the flags, calls are skipped with
    /// EAX cleared, and the run stops before the target executes. The target
    /// hook then sees the machine exactly as the target would.
    pub fn iterate(&mut self, targets: &[Address], mut hooks: Hooks<'_>) -> Result<(), EmulationError> {
        for &target in targets {
            self.iterate_one(target, &mut hooks)?;
        }
        Ok(())
    }

    fn iterate_one(&mut self, target: Address, hooks: &mut Hooks<'_>) -> Result<(), EmulationError> {
        let function = self.symbols.function_containing(target)?;
        let (function_name, function_start) = (function.name.clone(), function.address);

        let cfg = ControlFlowGraph::build(&self.disasm, function_start, self.options.max_function_size)?;
        let no_path = || EmulationError::NoPath {
            function: function_start.as_u64(),
            target: target.as_u64(),
        };
        let path = cfg.find_path(target).ok_or_else(no_path)?;

        log::debug!(
            "Emulating {} -> {} through {} block(s)",
            function_name,
            target,
            path.len()
        );

        self.reset_registers();
        hooks.run_pre_emulation(&mut self.machine, target)?;

        let mut executed = 0usize;
        for block_start in &path {
            let block = cfg.block(*block_start).ok_or_else(no_path)?;

            for insn in &block.instructions {
                self.machine.cpu.set_eip(insn.address.as_u32());

                if insn.address == target {
                    hooks.run_target(&self.machine, target);
                    return Ok(());
                }

                self.charge(&mut executed)?;
                hooks.run_instruction(&self.machine, insn);

                match self.execute(insn)? {
                    Step::Call { target: callee } => self.skip_call(insn, callee),
                    Step::Halt => return Err(EmulationError::TargetNotReached(target.as_u64())),
                    Step::Next | Step::Jump(_) | Step::Return(_) => {}
                }
            }
        }

        Err(EmulationError::TargetNotReached(target.as_u64()))
    }

    /// Executes from `start` with real branch evaluation, recording a trace.
    ///
    /// Stops at `end`, on a return to the sentinel or on `hlt`/`int3`.
    pub fn emulate_range(&mut self, start: Address, end: Option<Address>, mut hooks: Hooks<'_>) -> Result<(), EmulationError> {
        self.reset_registers();
        hooks.run_pre_emulation(&mut self.machine, start)?;

        let mut eip = start.as_u32();
        let mut executed = 0usize;

        loop {
            self.machine.cpu.set_eip(eip);

            if end.map_or(false, |e| e.as_u32() == eip) {
                hooks.run_target(&self.machine, Address::new(eip as u64));
                return Ok(());
            }
            if eip == RETURN_SENTINEL {
                log::trace!("Returned to sentinel after {} instructions", executed);
                return Ok(());
            }

            self.charge(&mut executed)?;
            let insn = self.disasm.disassemble(Address::new(eip as u64))?;
            hooks.run_instruction(&self.machine, &insn);

            let next = insn.next_address().as_u32();
            let step = self.execute(&insn)?;
            if let Step::Call { target } = step {
                self.skip_call(&insn, target);
            }
            self.trace.push(insn);

            eip = match step {
                Step::Next | Step::Call { .. } => next,
                Step::Jump(to) | Step::Return(to) => to,
                Step::Halt => return Ok(()),
            };
        }
    }

    fn execute(&mut self, insn: &DecodedInstruction) -> Result<Step, EmulationError> {
        match exec::execute(&mut self.machine, insn) {
            Err(EmulationError::Unsupported { address, mnemonic }) if self.options.skip_unsupported => {
                log::warn!("Skipping unsupported instruction `{}` at 0x{:x}", mnemonic, address);
                Ok(Step::Next)
            }
            other => other,
        }
    }

    /// Clears EAX. Arguments a direct callee releases with `ret imm16` are popped.
    fn skip_call(&mut self, insn: &DecodedInstruction, callee: Option<u32>) {
        let released = insn
            .branch_target()
            .map(|direct| self.callee_cleanup(direct.as_u32()))
            .unwrap_or(0);

        if log::log_enabled!(log::Level::Trace) {
            let name = callee
                .map(|c| self.symbols.format_address(Address::new(c as u64)))
                .unwrap_or_else(|| "<indirect>".to_string());
            log::trace!("Skipping call to {} at {} (releases {} bytes)", name, insn.address, released);
        }

        let _ = self.machine.set_reg(Register::EAX, 0);
        if released != 0 {
            let esp = self.machine.cpu.esp().wrapping_add(released);
            self.machine.cpu.set_esp(esp);
        }
    }

    fn callee_cleanup(&mut self, callee: u32) -> u32 {
        if let Some(&released) = self.callee_cleanup.get(&callee) {
            return released;
        }

        let released = ControlFlowGraph::build(&self.disasm, Address::new(callee as u64), self.options.max_function_size)
            .ok()
            .and_then(|cfg| {
                cfg.exit_blocks()
                    .filter_map(|block| block.last())
                    .find(|last| last.is_return())
                    .map(|ret| if ret.raw().op_count() == 1 { ret.raw().immediate16() as u32 } else { 0 })
            })
            .unwrap_or(0);

        self.callee_cleanup.insert(callee, released);
        released
    }

    fn charge(&self, executed: &mut usize) -> Result<(), EmulationError> {
        *executed += 1;
        if *executed > self.options.max_instructions {
            return Err(EmulationError::InstructionLimit(self.options.max_instructions));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BufferMemory;
    use crate::symbol::SymbolType;

    // 401000: test ecx, ecx
    // 401002: jnz 40100A
    // 401004: xor eax, eax
    // 401006: inc eax
    // 401007: ret
    // 401008: nop ; nop
    // 40100A: mov eax, [ecx+8]
    // 40100D: ret
    fn driver(options: EmulationOptions) -> EmulationDriver {
        let code = vec![
            0x85, 0xc9, 0x75, 0x06, 0x31, 0xc0, 0x40, 0xc3, 0x90, 0x90, 0x8b, 0x41, 0x08, 0xc3,
        ];
        let mut symbols = SymbolResolver::new();
        symbols.add_symbol("?Sample@@Z".to_string(), Address::new(0x401000), None, SymbolType::Function);
        EmulationDriver::new(
            Arc::new(BufferMemory::new(code, Address::new(0x401000))),
            Arc::new(symbols),
            Bitness::Bit32,
            options,
        )
        .unwrap()
    }

    #[test]
    fn test_iterate_forces_branch_along_path() {
        let mut driver = driver(EmulationOptions::default());
        let buffer = driver.load_bytes(&[0u8, 0, 0, 0, 0, 0, 0, 0, 0x44, 0x33, 0x22, 0x11]).unwrap();

        let mut seen = Vec::new();
        let mut hit = None;
        let hooks = Hooks::seed_register(Register::ECX, 0)
            .with_instruction(|_, insn| seen.push(insn.address))
            .with_target(|m, at| hit = Some((at, m.reg(Register::ECX).unwrap())));

        // ECX is zero, so jnz is not taken for real; the path still goes through 40100A.
        driver.iterate(&[Address::new(0x40100d)], hooks).unwrap();
        assert_eq!(seen, vec![Address::new(0x401000), Address::new(0x401002), Address::new(0x40100a)]);
        assert_eq!(hit, Some((Address::new(0x40100d), 0)));
        assert_eq!(driver.reg_read(Register::EIP).unwrap(), 0x40100d);

        driver
            .iterate(&[Address::new(0x40100d)], Hooks::seed_register(Register::ECX, buffer.as_u32()))
            .unwrap();
        assert_eq!(driver.reg_read(Register::EAX).unwrap(), 0x1122_3344);
    }

    #[test]
    fn test_iterate_errors() {
        let mut driver = driver(EmulationOptions::default());
        assert!(matches!(
            driver.iterate(&[Address::new(0x401008)], Hooks::new()),
            Err(EmulationError::NoPath { .. })
        ));
        assert!(matches!(
            driver.iterate(&[Address::new(0x400000)], Hooks::new()),
            Err(EmulationError::Symbol(_))
        ));
    }

    #[test]
    fn test_stack_layout_after_reset() {
        let options = EmulationOptions::default();
        let mut driver = driver(options.clone());
        driver.iterate(&[Address::new(0x401000)], Hooks::new()).unwrap();

        let esp = driver.reg_read(Register::ESP).unwrap() as u64;
        assert_eq!(esp, options.stack_base + options.stack_size - STACK_HEADROOM - 4);
        assert_eq!(driver.reg_read(Register::EBP).unwrap() as u64, esp);
        assert_eq!(driver.read_u32(Address::new(esp)), RETURN_SENTINEL);
    }

    #[test]
    fn test_emulate_range_evaluates_branches_and_traces() {
        let mut driver = driver(EmulationOptions::default());
        driver.emulate_range(Address::new(0x401000), None, Hooks::new()).unwrap();

        let trace: Vec<u64> = driver.trace().iter().map(|i| i.address.as_u64()).collect();
        assert_eq!(trace, vec![0x401000, 0x401002, 0x401004, 0x401006, 0x401007]);
        assert_eq!(driver.reg_read(Register::EAX).unwrap(), 1);

        driver.clear_trace();
        driver
            .emulate_range(Address::new(0x401000), Some(Address::new(0x401006)), Hooks::new())
            .unwrap();
        assert_eq!(driver.trace().len(), 3);
    }

    #[test]
    fn test_skipped_call_releases_callee_arguments() {
        // 401000: push 7 ; push 0 ; call 401010 ; mov eax, [esp] ; ret
        // 401010: ret 4
        let mut code = vec![0xcc; 0x20];
        code[..13].copy_from_slice(&[0x6a, 0x07, 0x6a, 0x00, 0xe8, 0x07, 0x00, 0x00, 0x00, 0x8b, 0x04, 0x24, 0xc3]);
        code[0x10..0x13].copy_from_slice(&[0xc2, 0x04, 0x00]);

        let mut symbols = SymbolResolver::new();
        symbols.add_symbol("?Caller@@Z".to_string(), Address::new(0x401000), None, SymbolType::Function);
        let mut driver = EmulationDriver::new(
            Arc::new(BufferMemory::new(code, Address::new(0x401000))),
            Arc::new(symbols),
            Bitness::Bit32,
            EmulationOptions::default(),
        )
        .unwrap();

        driver.iterate(&[Address::new(0x40100c)], Hooks::new()).unwrap();
        assert_eq!(driver.reg_read(Register::EAX).unwrap(), 7);
    }

    #[test]
    fn test_instruction_limit() {
        let options = EmulationOptions {
            max_instructions: 2,
            ..EmulationOptions::default()
        };
        let mut driver = driver(options);
        assert!(matches!(
            driver.emulate_range(Address::new(0x401000), None, Hooks::new()),
            Err(EmulationError::InstructionLimit(2))
        ));
    }

    #[test]
    fn test_rejects_64bit() {
        let result = EmulationDriver::new(
            Arc::new(BufferMemory::new(vec![0xc3], Address::new(0x1000))),
            Arc::new(SymbolResolver::new()),
            Bitness::Bit64,
            EmulationOptions::default(),
        );
        assert!(matches!(result, Err(EmulationError::UnsupportedBitness(64))));
    }
}
