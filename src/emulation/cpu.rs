// Fri Jan 16 2026 - Alex

use crate::emulation::flags::EFlags;
use crate::emulation::EmulationError;
use iced_x86::Register;

/// 32-bit general purpose register file.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    gpr: [u32; 8],
    eip: u32,
    pub eflags: EFlags,
}

impl Cpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn eip(&self) -> u32 {
        self.eip
    }

    pub fn set_eip(&mut self, eip: u32) {
        self.eip = eip;
    }

    pub fn esp(&self) -> u32 {
        self.gpr[4]
    }

    pub fn set_esp(&mut self, value: u32) {
        self.gpr[4] = value;
    }

    pub fn gprs(&self) -> [u32; 8] {
        self.gpr
    }

    pub fn read_reg(&self, reg: Register) -> Result<u32, EmulationError> {
        if reg == Register::EIP {
            return Ok(self.eip);
        }
        let (idx, shift, bits) = gpr_access(reg)
            .ok_or_else(|| EmulationError::InvalidRegister(format!("{:?}", reg)))?;
        let value = self.gpr[idx] >> shift;
        Ok(if bits == 32 { value } else { value & ((1 << bits) - 1) })
    }

    pub fn write_reg(&mut self, reg: Register, value: u32) -> Result<(), EmulationError> {
        if reg == Register::EIP {
            self.eip = value;
            return Ok(());
        }
        let (idx, shift, bits) = gpr_access(reg)
            .ok_or_else(|| EmulationError::InvalidRegister(format!("{:?}", reg)))?;
        if bits == 32 {
            self.gpr[idx] = value;
        } else {
            let field = ((1u32 << bits) - 1) << shift;
            self.gpr[idx] = (self.gpr[idx] & !field) | ((value << shift) & field);
        }
        Ok(())
    }
}

// (gpr index, bit shift, bit width)
fn gpr_access(reg: Register) -> Option<(usize, u32, u32)> {
    use iced_x86::Register::*;
    let access = match reg {
        AL => (0, 0, 8),
        CL => (1, 0, 8),
        DL => (2, 0, 8),
        BL => (3, 0, 8),
        AH => (0, 8, 8),
        CH => (1, 8, 8),
        DH => (2, 8, 8),
        BH => (3, 8, 8),

        AX => (0, 0, 16),
        CX => (1, 0, 16),
        DX => (2, 0, 16),
        BX => (3, 0, 16),
        SP => (4, 0, 16),
        BP => (5, 0, 16),
        SI => (6, 0, 16),
        DI => (7, 0, 16),

        EAX => (0, 0, 32),
        ECX => (1, 0, 32),
        EDX => (2, 0, 32),
        EBX => (3, 0, 32),
        ESP => (4, 0, 32),
        EBP => (5, 0, 32),
        ESI => (6, 0, 32),
        EDI => (7, 0, 32),

        _ => return Option::None,
    };
    Some(access)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_register_writes() {
        let mut cpu = Cpu::new();
        cpu.write_reg(Register::ECX, 0x1122_3344).unwrap();
        cpu.write_reg(Register::CH, 0xaa).unwrap();
        assert_eq!(cpu.read_reg(Register::ECX).unwrap(), 0x1122_aa44);
        cpu.write_reg(Register::CX, 0xbeef).unwrap();
        assert_eq!(cpu.read_reg(Register::ECX).unwrap(), 0x1122_beef);
        assert_eq!(cpu.read_reg(Register::CL).unwrap(), 0xef);
        assert_eq!(cpu.read_reg(Register::CH).unwrap(), 0xbe);
    }

    #[test]
    fn test_non_gpr_rejected() {
        let cpu = Cpu::new();
        assert!(matches!(cpu.read_reg(Register::XMM0), Err(EmulationError::InvalidRegister(_))));
        assert!(cpu.read_reg(Register::RAX).is_err());
    }
}
