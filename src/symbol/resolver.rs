// Tue Jan 13 2026 - Alex

use crate::memory::{Address, BinaryMemory};
use crate::symbol::map::{load_symbol_map, MapEntry};
use crate::symbol::SymbolError;
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Default)]
pub struct SymbolResolver {
    symbols: AHashMap<String, Symbol>,
    by_address: BTreeMap<u64, Vec<String>>,
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulls exports and import slots out of a loaded PE image.
    pub fn load_from_binary(&mut self, binary: &BinaryMemory) -> usize {
        let before = self.symbols.len();

        for export in binary.exports() {
            self.add_symbol(
                export.name.clone(),
                Address::new(export.address),
                (export.size > 0).then_some(export.size),
                SymbolType::Function,
            );
        }

        for import in binary.imports() {
            self.add_symbol(
                format!("__imp_{}", import.name),
                Address::new(import.slot),
                Some(4),
                SymbolType::External,
            );
            if !self.symbols.contains_key(&import.name) {
                self.add_symbol(import.name.clone(), Address::new(import.slot), Some(4), SymbolType::External);
            }
        }

        self.symbols.len() - before
    }

    pub fn load_map_file<P: AsRef<Path>>(&mut self, path: P, image_base: Address, rva: bool) -> Result<usize, SymbolError> {
        let entries = load_symbol_map(path)?;
        Ok(self.load_map_entries(&entries, image_base, rva))
    }

    /// Adds map entries; RVAs are rebased onto `image_base` when `rva` is set.
    pub fn load_map_entries(&mut self, entries: &[MapEntry], image_base: Address, rva: bool) -> usize {
        let before = self.symbols.len();

        for entry in entries {
            let address = if rva {
                image_base + entry.address
            } else {
                Address::new(entry.address)
            };
            let symbol_type = if entry.name.starts_with("__imp_") {
                SymbolType::External
            } else {
                SymbolType::Function
            };
            self.add_symbol(entry.name.clone(), address, None, symbol_type);
        }

        self.symbols.len() - before
    }

    pub fn add_symbol(&mut self, name: String, addr: Address, size: Option<u64>, symbol_type: SymbolType) {
        if let Some(previous) = self.symbols.get(&name) {
            let old = previous.address.as_u64();
            if let Some(names) = self.by_address.get_mut(&old) {
                names.retain(|n| n != &name);
                if names.is_empty() {
                    self.by_address.remove(&old);
                }
            }
        }

        let symbol = Symbol {
            name: name.clone(),
            address: addr,
            size,
            symbol_type,
        };

        let names = self.by_address.entry(addr.as_u64()).or_default();
        names.push(name.clone());
        names.sort();
        self.symbols.insert(name, symbol);
    }

    pub fn resolve_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn resolve_address(&self, addr: Address) -> Option<&Symbol> {
        self.by_address
            .get(&addr.as_u64())
            .and_then(|names| names.first())
            .and_then(|name| self.symbols.get(name))
    }

    /// First symbol in address order whose name contains `fragment`.
    ///
    /// Decorated names are matched by fragment so `?StReleaseRegion` finds
    /// `?StReleaseRegion@?$ST_STORE@USM_TRAITS@@@@...`.
    pub fn find_name(&self, fragment: &str) -> Result<&Symbol, SymbolError> {
        self.iter()
            .find(|s| s.name.contains(fragment))
            .ok_or_else(|| SymbolError::NotFound(fragment.to_string()))
    }

    pub fn get_nearest_symbol(&self, addr: Address) -> Option<(&Symbol, u64)> {
        self.by_address
            .range(..=addr.as_u64())
            .next_back()
            .and_then(|(start, names)| {
                names
                    .first()
                    .and_then(|n| self.symbols.get(n))
                    .map(|s| (s, addr.as_u64() - start))
            })
    }

    /// Nearest function symbol at or below `addr`.
    pub fn function_containing(&self, addr: Address) -> Result<&Symbol, SymbolError> {
        self.by_address
            .range(..=addr.as_u64())
            .rev()
            .flat_map(|(_, names)| names.iter())
            .filter_map(|n| self.symbols.get(n))
            .find(|s| s.is_function() && s.size.map_or(true, |_| s.contains(addr)))
            .ok_or(SymbolError::NoContainingFunction(addr.as_u64()))
    }

    pub fn format_address(&self, addr: Address) -> String {
        match self.get_nearest_symbol(addr) {
            Some((symbol, 0)) => symbol.name.clone(),
            Some((symbol, offset)) => format!("{}+0x{:x}", symbol.name, offset),
            None => addr.to_string(),
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.by_address
            .values()
            .flat_map(|names| names.iter())
            .filter_map(|n| self.symbols.get(n))
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub address: Address,
    pub size: Option<u64>,
    pub symbol_type: SymbolType,
}

impl Symbol {
    pub fn new(name: String, address: Address) -> Self {
        Self {
            name,
            address,
            size: None,
            symbol_type: SymbolType::Unknown,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_type(mut self, symbol_type: SymbolType) -> Self {
        self.symbol_type = symbol_type;
        self
    }

    pub fn is_function(&self) -> bool {
        matches!(self.symbol_type, SymbolType::Function)
    }

    pub fn is_import(&self) -> bool {
        matches!(self.symbol_type, SymbolType::External)
    }

    pub fn contains(&self, addr: Address) -> bool {
        match self.size {
            Some(size) => addr >= self.address && addr.as_u64() < self.address.as_u64() + size,
            None => self.address == addr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    Function,
    Data,
    External,
    Unknown,
}

impl SymbolType {
    pub fn name(&self) -> &'static str {
        match self {
            SymbolType::Function => "function",
            SymbolType::Data => "data",
            SymbolType::External => "external",
            SymbolType::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SymbolResolver {
        let mut r = SymbolResolver::new();
        r.add_symbol(
            "?StDmRegionRemove@?$ST_STORE@USM_TRAITS@@@@SGJPAU_ST_DATA_MGR@1@PAK@Z".to_string(),
            Address::new(0x401000),
            None,
            SymbolType::Function,
        );
        r.add_symbol(
            "?StDmRegionEvict@?$ST_STORE@USM_TRAITS@@@@SGJPAU_ST_DATA_MGR@1@@Z".to_string(),
            Address::new(0x401100),
            Some(0x40),
            SymbolType::Function,
        );
        r.add_symbol("__imp__RtlDecompressBufferEx@28".to_string(), Address::new(0x402000), Some(4), SymbolType::External);
        r
    }

    #[test]
    fn test_find_name_by_fragment() {
        let r = resolver();
        let sym = r.find_name("?StDmRegionEvict").unwrap();
        assert_eq!(sym.address, Address::new(0x401100));
        // Fragments match in address order, so the shared prefix finds the remove routine first.
        assert_eq!(r.find_name("?StDmRegion").unwrap().address, Address::new(0x401000));
        assert!(matches!(r.find_name("?StMissing"), Err(SymbolError::NotFound(_))));
    }

    #[test]
    fn test_function_containing_skips_imports() {
        let r = resolver();
        assert_eq!(r.function_containing(Address::new(0x401050)).unwrap().address, Address::new(0x401000));
        assert_eq!(r.function_containing(Address::new(0x401120)).unwrap().address, Address::new(0x401100));
        // Past the sized evict routine, the unsized remove routine is the fallback.
        assert_eq!(r.function_containing(Address::new(0x401200)).unwrap().address, Address::new(0x401000));
        assert!(r.function_containing(Address::new(0x400000)).is_err());
    }

    #[test]
    fn test_format_address() {
        let r = resolver();
        assert_eq!(r.format_address(Address::new(0x402000)), "__imp__RtlDecompressBufferEx@28");
        assert!(r.format_address(Address::new(0x401104)).ends_with("+0x4"));
    }

    #[test]
    fn test_map_entries_rebased() {
        let mut r = SymbolResolver::new();
        let entries = vec![MapEntry { name: "SmHpChunkAlloc".to_string(), address: 0x1200 }];
        assert_eq!(r.load_map_entries(&entries, Address::new(0x400000), true), 1);
        assert_eq!(r.resolve_name("SmHpChunkAlloc").unwrap().address, Address::new(0x401200));
    }

    #[test]
    fn test_re_adding_moves_symbol() {
        let mut r = resolver();
        r.add_symbol("__imp__RtlDecompressBufferEx@28".to_string(), Address::new(0x403000), Some(4), SymbolType::External);
        assert!(r.resolve_address(Address::new(0x402000)).is_none());
        assert_eq!(r.symbol_count(), 3);
    }

    #[test]
    fn test_load_from_binary_names_import_slots() {
        use crate::memory::binary::fixture::{pe_image, write_temp, I386};
        use crate::memory::load_x86_binary;

        let path = write_temp("resolver", &pe_image(I386, false));
        let binary = load_x86_binary(&path).unwrap();

        let mut r = SymbolResolver::new();
        assert_eq!(r.load_from_binary(&binary), 2);

        let slot = Address::new(0x403050);
        let decorated = r.resolve_name("__imp_RtlDecompressBufferEx").unwrap();
        assert_eq!(decorated.address, slot);
        assert!(decorated.is_import());
        assert_eq!(r.resolve_name("RtlDecompressBufferEx").unwrap().address, slot);
        assert!(r.find_name("RtlDecompressBufferEx").unwrap().is_import());

        // A bare name already present is left alone.
        let mut r = SymbolResolver::new();
        r.add_symbol("RtlDecompressBufferEx".to_string(), Address::new(0x401000), None, SymbolType::Function);
        assert_eq!(r.load_from_binary(&binary), 1);
        assert_eq!(r.resolve_name("RtlDecompressBufferEx").unwrap().address, Address::new(0x401000));

        drop(binary);
        std::fs::remove_file(&path).ok();
    }
}
