// Fri Jan 16 2026 - Alex

use crate::analysis::{Bitness, CallSite, CallSiteLocator, Disassembler};
use crate::config::Config;
use crate::emulation::{EmulationDriver, Hooks};
use crate::finders::error::ProbeError;
use crate::finders::result::{ProbeMethod, StructureOffsetResult};
use crate::memory::{Address, MemoryReader};
use crate::pattern::TracerPattern;
use crate::symbol::SymbolResolver;
use crate::utils::logging::ScopedTimer;
use iced_x86::{Mnemonic, Register};
use std::cell::Cell;
use std::sync::Arc;

/// Fields of the store manager's `_ST_DATA_MGR` that can be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreField {
    Size,
    PagesTree,
    ChunkMetadata,
    StoreFlags,
    SmkmStore,
    RegionSizeMask,
    RegionLsb,
    DataOffsetInCompressedBuf,
    CompressionAlg,
    SmcrIntegrity,
    RegionWrittenSizeArray,
}

impl StoreField {
    pub const ALL: [StoreField; 11] = [
        StoreField::Size,
        StoreField::PagesTree,
        StoreField::ChunkMetadata,
        StoreField::StoreFlags,
        StoreField::SmkmStore,
        StoreField::RegionSizeMask,
        StoreField::RegionLsb,
        StoreField::DataOffsetInCompressedBuf,
        StoreField::CompressionAlg,
        StoreField::SmcrIntegrity,
        StoreField::RegionWrittenSizeArray,
    ];

    /// What `dump` reports, in its order.
    pub const DUMPED: [StoreField; 6] = [
        StoreField::PagesTree,
        StoreField::ChunkMetadata,
        StoreField::SmkmStore,
        StoreField::RegionSizeMask,
        StoreField::RegionLsb,
        StoreField::CompressionAlg,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StoreField::Size => "sizeof",
            StoreField::PagesTree => "sLocalTree",
            StoreField::ChunkMetadata => "ChunkMetadata",
            StoreField::StoreFlags => "StoreFlags",
            StoreField::SmkmStore => "SmkmStore",
            StoreField::RegionSizeMask => "RegionSizeMask",
            StoreField::RegionLsb => "RegionLSB",
            StoreField::DataOffsetInCompressedBuf => "DataOffsetInCompressedBuf",
            StoreField::CompressionAlg => "CompressionAlg",
            StoreField::SmcrIntegrity => "SmcrIntegrity",
            StoreField::RegionWrittenSizeArray => "RegionWrittenSizeArray",
        }
    }

    pub fn method(&self) -> ProbeMethod {
        match self {
            StoreField::PagesTree | StoreField::DataOffsetInCompressedBuf => ProbeMethod::Assumed,
            StoreField::Size | StoreField::SmcrIntegrity | StoreField::RegionWrittenSizeArray => {
                ProbeMethod::Unimplemented
            }
            StoreField::StoreFlags | StoreField::RegionLsb => ProbeMethod::InstructionTrace,
            _ => ProbeMethod::Emulation,
        }
    }

    /// Function whose code the probe runs.
    pub fn source(&self) -> Option<&'static str> {
        match self {
            StoreField::ChunkMetadata => Some(STORE_PAGE_ADD),
            StoreField::StoreFlags => Some(IS_CURRENT_REGION),
            StoreField::SmkmStore => Some(RELEASE_REGION),
            StoreField::RegionSizeMask => Some(REGION_REMOVE),
            StoreField::RegionLsb => Some(WORK_ITEM_CLEANUP),
            StoreField::CompressionAlg => Some(SINGLE_PAGE_COPY),
            _ => None,
        }
    }
}

const STORE_PAGE_ADD: &str = "?StDmpSinglePageAdd";
const IS_CURRENT_REGION: &str = "?StDmIsCurrentRegion";
const RELEASE_REGION: &str = "?StReleaseRegion";
const REGION_REMOVE: &str = "?StDmRegionRemove";
const WORK_ITEM_CLEANUP: &str = "?StDeviceWorkItemCleanup";
const SINGLE_PAGE_COPY: &str = "?StDmSinglePageCopy";

pub struct StDataMgrFinder {
    reader: Arc<dyn MemoryReader>,
    symbols: Arc<SymbolResolver>,
    disasm: Disassembler,
    config: Config,
}

impl StDataMgrFinder {
    pub fn new(reader: Arc<dyn MemoryReader>, symbols: Arc<SymbolResolver>, config: Config) -> Self {
        let disasm = Disassembler::new(reader.clone(), Bitness::Bit32);
        Self {
            reader,
            symbols,
            disasm,
            config,
        }
    }

    pub fn structure_name(&self) -> &str {
        &self.config.structure_name
    }

    fn driver(&self) -> Result<EmulationDriver, ProbeError> {
        Ok(EmulationDriver::new(
            self.reader.clone(),
            self.symbols.clone(),
            self.disasm.bitness(),
            self.config.emulation_options(),
        )?)
    }

    fn locate_call(&self, function: &str, target: &str) -> Result<CallSite, ProbeError> {
        let locator = CallSiteLocator::new(&self.symbols, &self.disasm, self.config.emulation.max_function_size);
        Ok(locator.locate_call_in_fn(function, target)?)
    }

    fn locate_in(tracer: &TracerPattern, field: StoreField, needle: &[u8], value: u64) -> Result<u64, ProbeError> {
        tracer
            .locate(needle)
            .map(|offset| offset as u64)
            .ok_or_else(|| ProbeError::ValueNotInTracer {
                field: field.name().to_string(),
                value,
            })
    }

    pub fn sizeof(&self) -> Option<u64> {
        None
    }

    /// The local page tree appears to always be the first member.
    pub fn pages_tree(&self) -> u64 {
        0
    }

    /// The chunk allocator receives the metadata address in ECX; with a zero
    /// store pointer that address is the offset itself.
    pub fn chunk_metadata(&self) -> Result<u64, ProbeError> {
        let site = self.locate_call(STORE_PAGE_ADD, "SmHpChunkAlloc")?;
        let mut driver = self.driver()?;
        driver.iterate(&[site.call_address], Hooks::new())?;
        Ok(driver.reg_read(Register::ECX)? as u64)
    }

    pub fn store_flags(&self) -> Result<u64, ProbeError> {
        let symbol = self.symbols.find_name(IS_CURRENT_REGION)?;
        let (start, name) = (symbol.address, symbol.name.clone());

        let mut driver = self.driver()?;
        if let Err(e) = driver.emulate_range(start, None, Hooks::new()) {
            // The trace up to the fault is still usable.
            log::debug!("Emulation of {} stopped early: {}", name, e);
        }

        driver
            .trace()
            .iter()
            .find(|insn| insn.mnemonic() == Mnemonic::Cmp)
            .and_then(|insn| {
                log::debug!("First compare in {}: {}", name, insn);
                insn.operand_displacement(0)
            })
            .ok_or_else(|| ProbeError::NoMatchingInstruction {
                function: name.clone(),
                mnemonic: "cmp".to_string(),
            })
    }

    pub fn smkm_store(&self) -> Result<u64, ProbeError> {
        let site = self.locate_call(RELEASE_REGION, "?SmStReleaseVirtualRegion")?;
        let tracer = TracerPattern::generate(self.config.tracer.dword_length, 4);

        let mut driver = self.driver()?;
        let buffer = driver.load_bytes(tracer.as_bytes())?;
        driver.iterate(&[site.call_address], self.seed_ecx(buffer))?;

        let ecx = driver.reg_read(Register::ECX)?;
        Self::locate_in(&tracer, StoreField::SmkmStore, &ecx.to_le_bytes(), ecx as u64)
    }

    /// The evict call takes `mask + 1` as its third stack argument.
    pub fn region_size_mask(&self) -> Result<u64, ProbeError> {
        let tracer = TracerPattern::generate(self.config.tracer.dword_length, 4);
        let site = self.locate_call(REGION_REMOVE, "?StDmRegionEvict")?;

        let mut driver = self.driver()?;
        let buffer = driver.load_bytes(tracer.as_bytes())?;
        driver.iterate(&[site.call_address], self.seed_ecx(buffer))?;

        let esp = driver.reg_read(Register::ESP)?;
        let stack = driver.read_emu_bytes(Address::new(esp as u64), 0xc);
        let third = u32::from_le_bytes([stack[8], stack[9], stack[10], stack[11]]);
        let mask = third.wrapping_sub(1);
        Self::locate_in(&tracer, StoreField::RegionSizeMask, &mask.to_le_bytes(), mask as u64)
    }

    /// The field is only visible as a shift count, so the count of every
    /// right shift (`shr` and `shrd`) is summed.
    pub fn region_lsb(&self) -> Result<u64, ProbeError> {
        let tracer = TracerPattern::generate(self.config.tracer.dword_length, 4);
        let shifted = Cell::new(0u32);

        let site = self.locate_call(WORK_ITEM_CLEANUP, "?StRegionReadDereference")?;
        let mut driver = self.driver()?;
        let buffer = driver.load_bytes(tracer.as_bytes())?;

        let hooks = self.seed_ecx(buffer).with_instruction(|machine, insn| {
            if matches!(insn.mnemonic(), Mnemonic::Shr | Mnemonic::Shrd) {
                if let Ok(ecx) = machine.reg(Register::ECX) {
                    log::trace!("{} with ECX=0x{:x}", insn, ecx);
                    shifted.set(shifted.get().wrapping_add(ecx));
                }
            }
        });
        driver.iterate(&[site.call_address], hooks)?;

        let sum = shifted.get();
        Self::locate_in(&tracer, StoreField::RegionLsb, &sum.to_le_bytes(), sum as u64)
    }

    pub fn data_offset_in_compressed_buf(&self) -> u64 {
        0
    }

    /// The format/engine word is pushed as the first argument of the decompressor.
    pub fn compression_format_and_engine(&self) -> Result<u64, ProbeError> {
        let tracer = TracerPattern::generate(self.config.tracer.word_length, 2);
        let site = self.locate_call(SINGLE_PAGE_COPY, "_RtlDecompressBufferEx@")?;

        let mut driver = self.driver()?;
        let buffer = driver.load_bytes(tracer.as_bytes())?;
        driver.iterate(&[site.call_address], self.seed_ecx(buffer))?;

        let esp = driver.reg_read(Register::ESP)?;
        let word = driver.read_emu_bytes(Address::new(esp as u64), 2);
        let value = u16::from_le_bytes([word[0], word[1]]) as u64;
        Self::locate_in(&tracer, StoreField::CompressionAlg, &word, value)
    }

    pub fn smcr_integrity(&self) -> Option<u64> {
        None
    }

    pub fn region_written_size_array(&self) -> Option<u64> {
        None
    }

    fn seed_ecx<'h>(&self, buffer: Address) -> Hooks<'h> {
        Hooks::new().with_pre_emulation(move |machine, _| {
            log::debug!("Pre-emulation: ECX <- tracer at {}", buffer);
            machine.set_reg(Register::ECX, buffer.as_u32())
        })
    }

    pub fn probe(&self, field: StoreField) -> Result<Option<u64>, ProbeError> {
        match field {
            StoreField::Size => Ok(self.sizeof()),
            StoreField::PagesTree => Ok(Some(self.pages_tree())),
            StoreField::ChunkMetadata => self.chunk_metadata().map(Some),
            StoreField::StoreFlags => self.store_flags().map(Some),
            StoreField::SmkmStore => self.smkm_store().map(Some),
            StoreField::RegionSizeMask => self.region_size_mask().map(Some),
            StoreField::RegionLsb => self.region_lsb().map(Some),
            StoreField::DataOffsetInCompressedBuf => Ok(Some(self.data_offset_in_compressed_buf())),
            StoreField::CompressionAlg => self.compression_format_and_engine().map(Some),
            StoreField::SmcrIntegrity => Ok(self.smcr_integrity()),
            StoreField::RegionWrittenSizeArray => Ok(self.region_written_size_array()),
        }
    }

    /// Runs one probe and packages the outcome; failures become results without an offset.
    pub fn find(&self, field: StoreField) -> StructureOffsetResult {
        let _timer = ScopedTimer::new(field.name());

        let mut result = StructureOffsetResult::new(self.config.structure_name.clone(), field.name().to_string(), None)
            .with_method(field.method());
        if let Some(source) = field.source() {
            result = result.with_source(source);
        }

        match self.probe(field) {
            Ok(offset) => result.offset = offset,
            Err(e) => {
                log::warn!("{} probe failed: {}", result.qualified_name(), e);
                result = result.with_error(e.to_string());
            }
        }
        result
    }

    pub fn find_all(&self) -> Vec<StructureOffsetResult> {
        self.find_all_with(|_| {})
    }

    /// Like `find_all`, reporting each result as soon as its probe finishes.
    pub fn find_all_with<F>(&self, mut on_result: F) -> Vec<StructureOffsetResult>
    where
        F: FnMut(&StructureOffsetResult),
    {
        StoreField::ALL
            .iter()
            .map(|&field| {
                let result = self.find(field);
                on_result(&result);
                result
            })
            .collect()
    }

    /// Probes the reported fields and logs them.
    pub fn dump(&self) -> Vec<StructureOffsetResult> {
        let results: Vec<StructureOffsetResult> = StoreField::DUMPED.iter().map(|&field| self.find(field)).collect();
        Self::log_dump(&results);
        results
    }

    /// Logs the reported fields from results that were already probed.
    pub fn log_dump(results: &[StructureOffsetResult]) {
        for line in Self::dump_lines(results) {
            log::info!("{}", line);
        }
    }

    /// One `STRUCT.Field: 0x..` line per reported field present in `results`, in report order.
    pub fn dump_lines(results: &[StructureOffsetResult]) -> Vec<String> {
        StoreField::DUMPED
            .iter()
            .filter_map(|field| results.iter().find(|r| r.field_name == field.name()))
            .map(|result| match result.offset {
                Some(offset) => format!("{}: 0x{:x}", result.qualified_name(), offset),
                None => format!("{}: not found", result.qualified_name()),
            })
            .collect()
    }
}
