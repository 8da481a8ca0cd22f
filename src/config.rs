// Tue Jan 13 2026 - Alex

use crate::emulation::EmulationOptions;
use crate::memory::{Address, MemoryRange};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target_binary: Option<PathBuf>,
    pub symbol_map: Option<PathBuf>,
    pub symbols_are_rva: bool,
    pub output_file: PathBuf,
    pub text_output_file: Option<PathBuf>,
    pub markdown_output_file: Option<PathBuf>,
    pub structure_name: String,
    pub emulation: EmulationConfig,
    pub tracer: TracerConfig,
    pub verbosity: u8,
    pub enable_progress_bars: bool,
}

/// Layout and limits of the emulated address space.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulationConfig {
    pub stack_base: u64,
    pub stack_size: u64,
    pub heap_base: u64,
    pub heap_size: u64,
    pub max_instructions: usize,
    pub max_function_size: usize,
    pub skip_unsupported_instructions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Buffer length for the dword-sized probes.
    pub dword_length: usize,
    /// Buffer length for the word-sized compression probe.
    pub word_length: usize,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_binary: None,
            symbol_map: None,
            symbols_are_rva: false,
            output_file: PathBuf::from("offsets.json"),
            text_output_file: None,
            markdown_output_file: None,
            structure_name: "ST_DATA_MGR".to_string(),
            emulation: EmulationConfig::default(),
            tracer: TracerConfig::default(),
            verbosity: 0,
            enable_progress_bars: true,
        }
    }
}

impl Default for EmulationConfig {
    fn default() -> Self {
        let options = EmulationOptions::default();
        Self {
            stack_base: options.stack_base,
            stack_size: options.stack_size,
            heap_base: options.heap_base,
            heap_size: options.heap_size,
            max_instructions: options.max_instructions,
            max_function_size: options.max_function_size,
            skip_unsupported_instructions: options.skip_unsupported,
        }
    }
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            dword_length: 8192,
            word_length: 1024,
        }
    }
}

impl EmulationConfig {
    pub fn to_options(&self) -> EmulationOptions {
        EmulationOptions {
            stack_base: self.stack_base,
            stack_size: self.stack_size,
            heap_base: self.heap_base,
            heap_size: self.heap_size,
            max_instructions: self.max_instructions,
            max_function_size: self.max_function_size,
            skip_unsupported: self.skip_unsupported_instructions,
        }
    }

    /// Stack and heap ranges, checked to fit the 32-bit address space.
    pub fn layout(&self) -> Result<(MemoryRange, MemoryRange), String> {
        let limit = u32::MAX as u64 + 1;
        let range = |name: &str, base: u64, size: u64| match base.checked_add(size) {
            Some(end) if end <= limit => Ok(MemoryRange::from_start_size(Address::new(base), size)),
            _ => Err(format!("{} must lie in the 32-bit address space", name)),
        };
        Ok((
            range("stack", self.stack_base, self.stack_size)?,
            range("heap", self.heap_base, self.heap_size)?,
        ))
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn with_target_binary(mut self, binary: PathBuf) -> Self {
        self.target_binary = Some(binary);
        self
    }

    pub fn with_symbol_map(mut self, map: PathBuf, rva: bool) -> Self {
        self.symbol_map = Some(map);
        self.symbols_are_rva = rva;
        self
    }

    pub fn with_output_file(mut self, output: PathBuf) -> Self {
        self.output_file = output;
        self
    }

    pub fn with_max_instructions(mut self, max: usize) -> Self {
        self.emulation.max_instructions = max;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn emulation_options(&self) -> EmulationOptions {
        self.emulation.to_options()
    }

    /// Stack and heap must not shadow the loaded image.
    pub fn validate_against_image(&self, image: &MemoryRange) -> Result<(), String> {
        let (stack, heap) = self.emulation.layout()?;
        for (name, range) in [("stack", stack), ("heap", heap)] {
            if range.overlaps(image) {
                return Err(format!("{} {} overlaps the image at {}", name, range, image));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.target_binary.is_none() {
            return Err("target_binary must be set".to_string());
        }
        if self.emulation.max_instructions == 0 {
            return Err("max_instructions must be greater than 0".to_string());
        }
        if self.emulation.stack_size <= 0x1000 {
            return Err("stack_size must leave room above the initial stack pointer".to_string());
        }
        let (stack, heap) = self.emulation.layout()?;
        if stack.overlaps(&heap) {
            return Err("stack and heap ranges overlap".to_string());
        }
        if self.tracer.dword_length < 4 || self.tracer.word_length < 2 {
            return Err("tracer lengths must hold at least one element".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_once_binary_set() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let config = config.with_target_binary(PathBuf::from("rdyboost.sys"));
        assert!(config.validate().is_ok());
        assert_eq!(config.tracer.dword_length, 8192);
        assert_eq!(config.structure_name, "ST_DATA_MGR");
    }

    #[test]
    fn test_overlapping_layout_rejected() {
        let mut config = Config::default().with_target_binary(PathBuf::from("a.sys"));
        config.emulation.heap_base = config.emulation.stack_base;
        assert_eq!(config.validate(), Err("stack and heap ranges overlap".to_string()));
    }

    #[test]
    fn test_layout_overflow_rejected() {
        let mut config = Config::default().with_target_binary(PathBuf::from("a.sys"));
        config.emulation.heap_base = u64::MAX - 0x10;
        assert_eq!(config.validate(), Err("heap must lie in the 32-bit address space".to_string()));

        let mut config = Config::default().with_target_binary(PathBuf::from("a.sys"));
        config.emulation.stack_size = u64::MAX;
        assert_eq!(config.validate(), Err("stack must lie in the 32-bit address space".to_string()));
    }

    #[test]
    fn test_layout_checked_against_image() {
        let config = Config::default();
        let kernel = MemoryRange::from_start_size(Address::new(0x400000), 0x60_0000);
        assert!(config.validate_against_image(&kernel).is_ok());

        let mut config = config;
        config.emulation.stack_base = 0x60_0000;
        let err = config.validate_against_image(&kernel).unwrap_err();
        assert!(err.starts_with("stack"));

        let rebased = MemoryRange::from_start_size(Address::new(0x0800_0000), 0x1000);
        assert!(config.validate_against_image(&rebased).unwrap_err().starts_with("heap"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"emulation": {"max_instructions": 500}, "symbols_are_rva": true}"#).unwrap();
        assert_eq!(config.emulation.max_instructions, 500);
        assert_eq!(config.emulation.stack_size, EmulationOptions::default().stack_size);
        assert!(config.symbols_are_rva);
        assert_eq!(config.emulation_options().max_instructions, 500);
    }
}
