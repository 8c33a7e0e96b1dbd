use std::{fs::File, io::{self, Read, Seek, SeekFrom}};
use memmap2::Mmap;
use crate::{*, error::*, util::*};

pub const ET_CORE: u16 = 4;
pub const PT_LOAD: u32 = 1;
pub const PT_NOTE: u32 = 4;

const EHDR_SIZE: usize = 0x40;
const PHDR_SIZE: usize = 0x38;

pub struct ElfSegment {
    pub idx: usize,
    pub segment_type: u32,
    pub flags: u32,
    pub offset: usize,
    pub address: usize,
    pub size_in_file: usize,
    pub size_in_memory: usize,
    pub alignment: usize,
}

// Just enough ELF to read memory out of a core dump: the header and the program headers. No sections, no symbols.
pub struct ElfFile {
    pub name: String, // just for logging
    pub segments: Vec<ElfSegment>,

    mmapped: Option<Mmap>,
    owned: Vec<u8>,
}

impl ElfFile {
    pub fn from_file(name: String, file: &File) -> Result<Self> {
        // The file may be modified by someone else while mapped. We accept garbage in that case, same as reading from a live process.
        let m = unsafe {Mmap::map(file)}.map_err(|e| Error::from_io_error(e, format!("mmap {}", name)))?;
        open_elf(name, Some(m), Vec::new())
    }

    pub fn from_contents(name: String, contents: Vec<u8>) -> Result<Self> {
        open_elf(name, None, contents)
    }

    pub fn data(&self) -> &[u8] {
        match &self.mmapped {
            Some(m) => &m[..],
            None => &self.owned,
        }
    }

    pub fn segment_data(&self, idx: usize) -> Result<&[u8]> {
        let s = &self.segments[idx];
        let data = self.data();
        match s.offset.checked_add(s.size_in_file) {
            Some(end) if end <= data.len() => Ok(&data[s.offset..end]),
            _ => err!(MalformedCore, "{}: segment {} out of bounds: 0x{:x} + 0x{:x} > 0x{:x}", self.name, idx, s.offset, s.size_in_file, data.len()),
        }
    }

    pub fn load_segments(&self) -> impl Iterator<Item = &ElfSegment> + '_ {
        self.segments.iter().filter(|s| s.segment_type == PT_LOAD)
    }
}

fn open_elf(name: String, mmapped: Option<Mmap>, owned: Vec<u8>) -> Result<ElfFile> {
    let segments = {
        let data: &[u8] = match &mmapped {
            Some(m) => &m[..],
            None => &owned,
        };
        parse_program_headers(&name, data)?
    };
    Ok(ElfFile {name, segments, mmapped, owned})
}

fn parse_program_headers(name: &str, data: &[u8]) -> Result<Vec<ElfSegment>> {
    if data.len() < EHDR_SIZE { return err!(MalformedCore, "{} is too short for an ELF header: {} bytes", name, data.len()); }
    let mut reader = io::Cursor::new(data);

    let magic = reader.read_u32()?;
    if magic != 0x464c457f { return err!(MalformedCore, "invalid ELF magic bytes: 0x{:x}", magic); }

    let x = reader.read_u8()?;
    if x == 1 { return err!(UnsupportedCore, "32-bit core files are not supported"); }
    if x != 2 { return err!(MalformedCore, "invalid EI_CLASS: {}", x); }

    let x = reader.read_u8()?;
    if x == 2 { return err!(UnsupportedCore, "big-endian core files are not supported"); }
    if x != 1 { return err!(MalformedCore, "invalid EI_DATA: {}", x); }

    let x = reader.read_u8()?;
    if x != 1 { return err!(MalformedCore, "invalid EI_VERSION: {}", x); }

    // OS ABI, ABI version, padding.
    let mut pad = [0u8; 9];
    reader.read_exact(&mut pad)?;

    let x = reader.read_u16()?;
    if x != ET_CORE { return err!(UnsupportedCore, "{} is not a core file (e_type = {})", name, x); }

    let machine = reader.read_u16()?;
    if machine != 0x3e { return err!(UnsupportedCore, "only AMD x86-64 core files are supported (got: e_machine = {})", machine); }

    let _version = reader.read_u32()?;
    let _entry_point = reader.read_u64()?;
    let program_header_table_offset = reader.read_u64()? as usize;
    let _section_header_table_offset = reader.read_u64()?;
    let _flags = reader.read_u32()?;
    let _header_size = reader.read_u16()?;
    let program_header_entry_size = reader.read_u16()? as usize;
    let program_header_entry_count = reader.read_u16()? as usize;

    if program_header_entry_count > 0 && program_header_entry_size < PHDR_SIZE {
        return err!(MalformedCore, "invalid program header entry size: {}", program_header_entry_size);
    }

    match program_header_entry_count.checked_mul(program_header_entry_size).and_then(|n| n.checked_add(program_header_table_offset)) {
        Some(end) if end <= data.len() => (),
        _ => return err!(MalformedCore, "{}: program header table out of bounds: {} x {} at 0x{:x}, file size 0x{:x}", name, program_header_entry_count, program_header_entry_size, program_header_table_offset, data.len()),
    }

    let mut segments: Vec<ElfSegment> = Vec::with_capacity(program_header_entry_count);
    for idx in 0..program_header_entry_count {
        reader.seek(SeekFrom::Start((program_header_table_offset + idx * program_header_entry_size) as u64))?;

        let segment_type = reader.read_u32()?;
        let flags = reader.read_u32()?;
        let offset = reader.read_u64()? as usize;
        let address = reader.read_u64()? as usize;
        let _physical_address = reader.read_u64()?;
        let size_in_file = reader.read_u64()? as usize;
        let size_in_memory = reader.read_u64()? as usize;
        let alignment = reader.read_u64()? as usize;

        if segment_type == PT_LOAD && size_in_file > size_in_memory {
            return err!(MalformedCore, "segment {} has file size 0x{:x} > memory size 0x{:x}", idx, size_in_file, size_in_memory);
        }

        segments.push(ElfSegment {idx, segment_type, flags, offset, address, size_in_file, size_in_memory, alignment});
    }

    Ok(segments)
}

// Produces a minimal core file: ELF header, program headers, then the file-backed part of each segment.
#[cfg(test)]
pub fn build_core_file(segments: &[(/*address*/ usize, /*contents*/ &[u8], /*size_in_memory*/ usize)]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&ET_CORE.to_le_bytes());
    out.extend_from_slice(&0x3eu16.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0u8; 6]);
    assert_eq!(out.len(), EHDR_SIZE);

    let mut offset = EHDR_SIZE + PHDR_SIZE * segments.len();
    for &(address, contents, size_in_memory) in segments {
        out.extend_from_slice(&PT_LOAD.to_le_bytes());
        out.extend_from_slice(&6u32.to_le_bytes());
        for x in [offset, address, 0, contents.len(), size_in_memory, 4096] {
            out.extend_from_slice(&(x as u64).to_le_bytes());
        }
        offset += contents.len();
    }
    for &(_, contents, _) in segments {
        out.extend_from_slice(contents);
    }
    out
}
