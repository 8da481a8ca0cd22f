// Fri Jan 16 2026 - Alex

use crate::emulation::cpu::Cpu;
use crate::emulation::EmulationError;
use crate::memory::{Address, EmulatedMemory};
use iced_x86::Register;

/// CPU plus memory; what hooks get to look at and poke.
pub struct Machine {
    pub cpu: Cpu,
    pub memory: EmulatedMemory,
}

impl Machine {
    pub fn new(memory: EmulatedMemory) -> Self {
        Self {
            cpu: Cpu::new(),
            memory,
        }
    }

    pub fn reg(&self, reg: Register) -> Result<u32, EmulationError> {
        self.cpu.read_reg(reg)
    }

    pub fn set_reg(&mut self, reg: Register, value: u32) -> Result<(), EmulationError> {
        self.cpu.write_reg(reg, value)
    }

    pub fn read(&self, addr: u32, size: usize) -> u32 {
        self.memory.read_value(Address::new(addr as u64), size) as u32
    }

    pub fn write(&mut self, addr: u32, size: usize, value: u32) {
        self.memory.write_value(Address::new(addr as u64), size, value as u64);
    }

    pub fn push(&mut self, value: u32, size: usize) {
        let esp = self.cpu.esp().wrapping_sub(size as u32);
        self.cpu.set_esp(esp);
        self.write(esp, size, value);
    }

    pub fn pop(&mut self, size: usize) -> u32 {
        let esp = self.cpu.esp();
        let value = self.read(esp, size);
        self.cpu.set_esp(esp.wrapping_add(size as u32));
        value
    }

    /// Reads the `index`-th dword above ESP.
    pub fn stack_arg(&self, index: u32) -> u32 {
        self.read(self.cpu.esp().wrapping_add(index * 4), 4)
    }
}
