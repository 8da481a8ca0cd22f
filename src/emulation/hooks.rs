// Fri Jan 16 2026 - Alex

use crate::analysis::DecodedInstruction;
use crate::emulation::machine::Machine;
use crate::emulation::EmulationError;
use crate::memory::Address;
use iced_x86::Register;

pub type PreEmulationHook<'h> = Box<dyn FnMut(&mut Machine, Address) -> Result<(), EmulationError> + 'h>;
pub type InstructionHook<'h> = Box<dyn FnMut(&Machine, &DecodedInstruction) + 'h>;
pub type TargetHook<'h> = Box<dyn FnMut(&Machine, Address) + 'h>;

/// Callbacks installed for one emulation run.
///
/// Closures may borrow the caller's accumulators for `'h`; the driver consumes
/// the hooks, so the borrows end when the run returns.
#[derive(Default)]
pub struct Hooks<'h> {
    pre_emulation: Option<PreEmulationHook<'h>>,
    instruction: Option<InstructionHook<'h>>,
    target: Option<TargetHook<'h>>,
}

impl<'h> Hooks<'h> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks whose only job is to place `value` in `reg` before the run.
    pub fn seed_register(reg: Register, value: u32) -> Self {
        Self::new().with_pre_emulation(move |m, _| m.set_reg(reg, value))
    }

    pub fn with_pre_emulation<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut Machine, Address) -> Result<(), EmulationError> + 'h,
    {
        self.pre_emulation = Some(Box::new(hook));
        self
    }

    pub fn with_instruction<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&Machine, &DecodedInstruction) + 'h,
    {
        self.instruction = Some(Box::new(hook));
        self
    }

    pub fn with_target<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&Machine, Address) + 'h,
    {
        self.target = Some(Box::new(hook));
        self
    }

    pub(crate) fn run_pre_emulation(&mut self, machine: &mut Machine, target: Address) -> Result<(), EmulationError> {
        match self.pre_emulation.as_mut() {
            Some(hook) => hook(machine, target),
            None => Ok(()),
        }
    }

    pub(crate) fn run_instruction(&mut self, machine: &Machine, insn: &DecodedInstruction) {
        if let Some(hook) = self.instruction.as_mut() {
            hook(machine, insn);
        }
    }

    pub(crate) fn run_target(&mut self, machine: &Machine, target: Address) {
        if let Some(hook) = self.target.as_mut() {
            hook(machine, target);
        }
    }
}

impl std::fmt::Debug for Hooks<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_emulation", &self.pre_emulation.is_some())
            .field("instruction", &self.instruction.is_some())
            .field("target", &self.target.is_some())
            .finish()
    }
}
