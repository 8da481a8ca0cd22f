// Tue Jan 13 2026 - Alex

use crate::memory::{Address, MemoryError, MemoryRange, MemoryReader, MemoryRegion, Protection};
use goblin::pe::PE;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;

pub struct BinaryMemory {
    data: Arc<Mmap>,
    path: PathBuf,
    image_base: Address,
    entry_point: Address,
    image_size: u64,
    is_64: bool,
    machine: u16,
    sections: Vec<BinarySection>,
    exports: Vec<BinarySymbol>,
    imports: Vec<BinaryImport>,
}

#[derive(Debug, Clone)]
pub struct BinarySection {
    pub name: String,
    pub virtual_address: u64,
    pub virtual_size: u64,
    pub raw_offset: u64,
    pub raw_size: u64,
    pub protection: Protection,
}

impl BinarySection {
    fn mapped_size(&self) -> u64 {
        self.virtual_size.max(self.raw_size)
    }
}

#[derive(Debug, Clone)]
pub struct BinarySymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct BinaryImport {
    pub name: String,
    pub dll: String,
    /// Virtual address of the import address table slot.
    pub slot: u64,
}

impl BinaryMemory {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MemoryError> {
        let path_buf = path.as_ref().to_path_buf();
        let file = File::open(path.as_ref()).map_err(MemoryError::Io)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(MemoryError::Io)?;
        let data = Arc::new(mmap);

        let pe = PE::parse(&data)
            .map_err(|e| MemoryError::BinaryParseError(format!("Failed to parse PE: {}", e)))?;

        let image_base = pe.image_base as u64;

        let sections: Vec<BinarySection> = pe
            .sections
            .iter()
            .map(|section| BinarySection {
                name: section.name().unwrap_or("").trim_end_matches('\0').to_string(),
                virtual_address: image_base + section.virtual_address as u64,
                virtual_size: section.virtual_size as u64,
                raw_offset: section.pointer_to_raw_data as u64,
                raw_size: section.size_of_raw_data as u64,
                protection: Protection::from_section_characteristics(section.characteristics),
            })
            .collect();

        let exports = pe
            .exports
            .iter()
            .filter_map(|export| {
                export.name.map(|name| BinarySymbol {
                    name: name.to_string(),
                    address: image_base + export.rva as u64,
                    size: export.size as u64,
                })
            })
            .collect();

        let image_size = pe
            .header
            .optional_header
            .map(|header| header.windows_fields.size_of_image as u64)
            .filter(|&size| size > 0)
            .unwrap_or_else(|| {
                sections
                    .iter()
                    .map(|s| s.virtual_address + s.mapped_size() - image_base)
                    .max()
                    .unwrap_or(0)
            });

        let imports = pe
            .imports
            .iter()
            .map(|import| BinaryImport {
                name: import.name.to_string(),
                dll: import.dll.to_string(),
                // `offset` is the slot's RVA inside the IAT; `rva` points at the hint/name entry.
                slot: image_base + import.offset as u64,
            })
            .collect();

        let binary = Self {
            image_base: Address::new(image_base),
            entry_point: Address::new(image_base + pe.entry as u64),
            image_size,
            is_64: pe.is_64,
            machine: pe.header.coff_header.machine,
            sections,
            exports,
            imports,
            path: path_buf,
            data: data.clone(),
        };

        log::debug!(
            "Loaded PE {} (base {}, {} sections, {} exports, {} imports)",
            binary.path.display(),
            binary.image_base,
            binary.sections.len(),
            binary.exports.len(),
            binary.imports.len()
        );

        Ok(binary)
    }

    pub fn image_base(&self) -> Address {
        self.image_base
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// `[image_base, image_base + SizeOfImage)`.
    pub fn image_range(&self) -> MemoryRange {
        MemoryRange::from_start_size(self.image_base, self.image_size)
    }

    pub fn is_64bit(&self) -> bool {
        self.is_64
    }

    pub fn is_x86(&self) -> bool {
        self.machine == IMAGE_FILE_MACHINE_I386
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn sections(&self) -> &[BinarySection] {
        &self.sections
    }

    pub fn exports(&self) -> &[BinarySymbol] {
        &self.exports
    }

    pub fn imports(&self) -> &[BinaryImport] {
        &self.imports
    }

    pub fn find_section(&self, name: &str) -> Option<&BinarySection> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_for(&self, addr: u64) -> Option<&BinarySection> {
        self.sections.iter().find(|s| {
            addr >= s.virtual_address && addr < s.virtual_address + s.mapped_size()
        })
    }

    pub fn virtual_to_file_offset(&self, addr: u64) -> Option<u64> {
        let section = self.section_for(addr)?;
        let delta = addr - section.virtual_address;
        if delta < section.raw_size {
            Some(section.raw_offset + delta)
        } else {
            None
        }
    }

    pub fn file_offset_to_virtual(&self, offset: u64) -> Option<u64> {
        self.sections
            .iter()
            .find(|s| offset >= s.raw_offset && offset < s.raw_offset + s.raw_size)
            .map(|s| s.virtual_address + (offset - s.raw_offset))
    }
}

impl MemoryReader for BinaryMemory {
    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut out = Vec::with_capacity(len);
        let mut current = addr.as_u64();
        let end = current + len as u64;

        while current < end {
            let section = self
                .section_for(current)
                .ok_or(MemoryError::OutOfBounds(current))?;
            let section_end = (section.virtual_address + section.mapped_size()).min(end);
            let delta = current - section.virtual_address;

            // Bytes past the raw data are the zero-filled tail of the section.
            let raw_available = section.raw_size.saturating_sub(delta);
            let chunk = section_end - current;
            let from_file = chunk.min(raw_available) as usize;
            if from_file > 0 {
                let start = (section.raw_offset + delta) as usize;
                let stop = start + from_file;
                if stop > self.data.len() {
                    return Err(MemoryError::OutOfBounds(current));
                }
                out.extend_from_slice(&self.data[start..stop]);
            }
            out.resize(out.len() + (chunk as usize - from_file), 0);
            current = section_end;
        }

        Ok(out)
    }

    fn get_base_address(&self) -> Address {
        self.image_base
    }

    fn get_regions(&self) -> Result<Vec<MemoryRegion>, MemoryError> {
        Ok(self
            .sections
            .iter()
            .map(|s| {
                MemoryRegion::new(
                    MemoryRange::from_start_size(Address::new(s.virtual_address), s.mapped_size()),
                    s.protection,
                    s.name.clone(),
                )
                .with_file_data(s.raw_offset, s.raw_size)
            })
            .collect())
    }
}

pub fn load_x86_binary<P: AsRef<Path>>(path: P) -> Result<BinaryMemory, MemoryError> {
    let binary = BinaryMemory::load(path)?;
    if binary.is_64bit() || !binary.is_x86() {
        return Err(MemoryError::BinaryParseError(
            "Binary is not a 32-bit x86 PE image".to_string(),
        ));
    }
    Ok(binary)
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::IMAGE_FILE_MACHINE_I386;
    use std::fs;
    use std::path::PathBuf;

    pub(crate) const I386: u16 = IMAGE_FILE_MACHINE_I386;
    const IMAGE_BASE: u32 = 0x0040_0000;

    fn put(buf: &mut [u8], at: usize, bytes: &[u8]) {
        buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn put32(buf: &mut [u8], at: usize, value: u32) {
        put(buf, at, &value.to_le_bytes());
    }

    // .text  RVA 0x1000, virtual 0x2000, raw 0x200 at 0x200
    // .idata RVA 0x3000, virtual 0x200,  raw 0x200 at 0x400 (PE32 only)
    pub(crate) fn pe_image(machine: u16, pe32_plus: bool) -> Vec<u8> {
        let mut buf = vec![0u8; 0x600];
        put(&mut buf, 0, b"MZ");
        put32(&mut buf, 0x3c, 0x80);
        put(&mut buf, 0x80, b"PE\0\0");

        let coff = 0x84;
        let optional_size: u16 = if pe32_plus { 0xf0 } else { 0xe0 };
        put(&mut buf, coff, &machine.to_le_bytes());
        put(&mut buf, coff + 2, &2u16.to_le_bytes());
        put(&mut buf, coff + 16, &optional_size.to_le_bytes());
        put(&mut buf, coff + 18, &0x0102u16.to_le_bytes());

        let opt = coff + 20;
        let windows = if pe32_plus {
            put(&mut buf, opt, &0x20bu16.to_le_bytes());
            put32(&mut buf, opt + 16, 0x1000);
            put(&mut buf, opt + 24, &(IMAGE_BASE as u64).to_le_bytes());
            opt + 24
        } else {
            put(&mut buf, opt, &0x10bu16.to_le_bytes());
            put32(&mut buf, opt + 16, 0x1000);
            put32(&mut buf, opt + 28, IMAGE_BASE);
            opt + 28
        };
        // The 64-bit ImageBase shifts everything after it by four bytes.
        let shift = if pe32_plus { 4 } else { 0 };
        put32(&mut buf, windows + shift + 4, 0x1000);
        put32(&mut buf, windows + shift + 8, 0x200);
        put32(&mut buf, windows + shift + 28, 0x4000);
        put32(&mut buf, windows + shift + 32, 0x200);
        let (rva_count, dirs) = if pe32_plus { (windows + 84, windows + 88) } else { (windows + 64, windows + 68) };
        put32(&mut buf, rva_count, 16);

        let table = opt + optional_size as usize;
        for (i, (name, rva, vsize, raw, characteristics)) in [
            (b".text\0\0\0", 0x1000u32, 0x2000u32, 0x200u32, 0x6000_0020u32),
            (b".idata\0\0", 0x3000, 0x200, 0x400, 0xc000_0040),
        ]
        .iter()
        .enumerate()
        {
            let at = table + i * 40;
            put(&mut buf, at, *name);
            put32(&mut buf, at + 8, *vsize);
            put32(&mut buf, at + 12, *rva);
            put32(&mut buf, at + 16, 0x200);
            put32(&mut buf, at + 20, *raw);
            put32(&mut buf, at + 36, *characteristics);
        }

        // push ebp ; mov ebp, esp ... nop ; ret at the end of the raw data
        put(&mut buf, 0x200, &[0x55, 0x8b, 0xec]);
        put(&mut buf, 0x3fe, &[0x90, 0xc3]);

        if !pe32_plus {
            put32(&mut buf, dirs + 8, 0x3000);
            put32(&mut buf, dirs + 12, 0x28);

            let idata = 0x400;
            put32(&mut buf, idata, 0x3040);
            put32(&mut buf, idata + 12, 0x3070);
            put32(&mut buf, idata + 16, 0x3050);
            put32(&mut buf, idata + 0x40, 0x3080);
            put32(&mut buf, idata + 0x50, 0x3080);
            put(&mut buf, idata + 0x70, b"ntoskrnl.exe\0");
            put(&mut buf, idata + 0x82, b"RtlDecompressBufferEx\0");
        }

        buf
    }

    pub(crate) fn write_temp(tag: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("smkm-pe-{}-{}.sys", tag, std::process::id()));
        fs::write(&path, bytes).unwrap();
        path
    }
}
