// Fri Jan 16 2026 - Alex

use bitflags::bitflags;
use iced_x86::ConditionCode;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EFlags: u32 {
        const CF = 1 << 0;
        const PF = 1 << 2;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const DF = 1 << 10;
        const OF = 1 << 11;
    }
}

pub fn mask(size: usize) -> u32 {
    if size >= 4 {
        u32::MAX
    } else {
        (1u32 << (size * 8)) - 1
    }
}

pub fn sign_bit(size: usize) -> u32 {
    1u32 << (size.clamp(1, 4) * 8 - 1)
}

pub fn sign_extend(value: u32, size: usize) -> u32 {
    match size {
        1 => value as u8 as i8 as i32 as u32,
        2 => value as u16 as i16 as i32 as u32,
        _ => value,
    }
}

impl EFlags {
    /// ZF, SF and PF from a result already truncated to `size` bytes.
    pub fn set_result(&mut self, result: u32, size: usize) {
        self.set(EFlags::ZF, result & mask(size) == 0);
        self.set(EFlags::SF, result & sign_bit(size) != 0);
        self.set(EFlags::PF, (result as u8).count_ones() % 2 == 0);
    }

    pub fn set_logic(&mut self, result: u32, size: usize) {
        self.remove(EFlags::CF | EFlags::OF);
        self.set_result(result, size);
    }

    pub fn add(&mut self, a: u32, b: u32, carry: bool, size: usize) -> u32 {
        let m = mask(size) as u64;
        let wide = (a as u64 & m) + (b as u64 & m) + carry as u64;
        let result = (wide & m) as u32;
        self.set(EFlags::CF, wide > m);
        self.set(EFlags::OF, (a ^ result) & (b ^ result) & sign_bit(size) != 0);
        self.set_result(result, size);
        result
    }

    pub fn sub(&mut self, a: u32, b: u32, borrow: bool, size: usize) -> u32 {
        let m = mask(size);
        let (a, b) = (a & m, b & m);
        let result = a.wrapping_sub(b).wrapping_sub(borrow as u32) & m;
        self.set(EFlags::CF, (a as u64) < b as u64 + borrow as u64);
        self.set(EFlags::OF, (a ^ b) & (a ^ result) & sign_bit(size) != 0);
        self.set_result(result, size);
        result
    }

    pub fn condition(&self, cc: ConditionCode) -> bool {
        let cf = self.contains(EFlags::CF);
        let zf = self.contains(EFlags::ZF);
        let sf = self.contains(EFlags::SF);
        let of = self.contains(EFlags::OF);
        let pf = self.contains(EFlags::PF);

        match cc {
            ConditionCode::None => true,
            ConditionCode::o => of,
            ConditionCode::no => !of,
            ConditionCode::b => cf,
            ConditionCode::ae => !cf,
            ConditionCode::e => zf,
            ConditionCode::ne => !zf,
            ConditionCode::be => cf || zf,
            ConditionCode::a => !cf && !zf,
            ConditionCode::s => sf,
            ConditionCode::ns => !sf,
            ConditionCode::p => pf,
            ConditionCode::np => !pf,
            ConditionCode::l => sf != of,
            ConditionCode::ge => sf == of,
            ConditionCode::le => zf || sf != of,
            ConditionCode::g => !zf && sf == of,
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_carry_and_overflow() {
        let mut flags = EFlags::empty();
        assert_eq!(flags.add(0xffff_ffff, 1, false, 4), 0);
        assert!(flags.contains(EFlags::CF | EFlags::ZF));
        assert!(!flags.contains(EFlags::OF));

        assert_eq!(flags.add(0x7f, 1, false, 1), 0x80);
        assert!(flags.contains(EFlags::OF | EFlags::SF));
        assert!(!flags.contains(EFlags::CF));
    }

    #[test]
    fn test_sub_conditions() {
        let mut flags = EFlags::empty();
        flags.sub(1, 2, false, 4);
        assert!(flags.condition(ConditionCode::b));
        assert!(flags.condition(ConditionCode::l));
        assert!(!flags.condition(ConditionCode::e));

        flags.sub(5, 5, false, 4);
        assert!(flags.condition(ConditionCode::e));
        assert!(flags.condition(ConditionCode::be));
        assert!(flags.condition(ConditionCode::ge));
        assert!(!flags.condition(ConditionCode::g));
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x80, 1), 0xffff_ff80);
        assert_eq!(sign_extend(0x7fff, 2), 0x7fff);
        assert_eq!(sign_extend(0x8000, 2), 0xffff_8000);
    }
}
