use std::{fs::File, mem, sync::Arc};
use libc::{pid_t, c_void};
use crate::{*, elf::*, error::*};

// Thing for reading the inspected program's memory, either from a running process or from a core dump.
// Copyable for convenience, even though it adds extra Arc dereference when reading from core dump.
#[derive(Clone)]
pub enum MemReader {
    Invalid,
    Pid(PidMemReader),
    CoreDump(Arc<CoreDumpMemReader>),
}
impl MemReader {
    pub fn check_valid(&self) -> Result<()> { match &self {Self::Invalid => err!(ProcessState, "no process"), _ => Ok(())} }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        match self {
            Self::Invalid => err!(ProcessState, "no process"),
            Self::Pid(r) => r.read(offset, buf),
            Self::CoreDump(r) => r.read(offset, buf),
        }
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

#[derive(Clone)]
pub struct PidMemReader {
    pid: pid_t,
}
impl PidMemReader {
    pub fn new(pid: pid_t) -> Self { PidMemReader {pid: pid} }

    pub fn pid(&self) -> pid_t { self.pid }

    pub fn read(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        unsafe {
            let local_iov = libc::iovec {iov_base: buf.as_mut_ptr() as *mut c_void, iov_len: buf.len()};
            let mut remote_iov = libc::iovec {iov_base: addr as *mut c_void, iov_len: buf.len()};
            let r = libc::process_vm_readv(self.pid, &local_iov as *const libc::iovec, 1, &mut remote_iov as *mut libc::iovec, 1, 0);
            if r < 0 {
                if *libc::__errno_location() == libc::EFAULT {
                    return err!(ProcessState, "bad address"); // the common case: freed or garbage pointer
                } else {
                    return errno_err!("process_vm_readv failed");
                }
            }
            if r != buf.len() as isize {
                return err!(ProcessState, "unexpected EOF in mem @{:x}:0x{:x}", addr, buf.len());
            }
        }
        Ok(())
    }
}

struct CoreRange {
    start: usize,
    size_in_file: usize,
    size_in_memory: usize,
    // Index in ElfFile.segments, or in CoreDumpMemReader.owned if there's no ElfFile.
    segment: usize,
}

// Memory image of a dead process: PT_LOAD segments of a core file. Bytes past a segment's file size read as zeros
// (that's how the kernel dumps untouched anonymous memory). Addresses outside all segments fault.
pub struct CoreDumpMemReader {
    pub name: String,
    elf: Option<ElfFile>,
    owned: Vec<Vec<u8>>,
    ranges: Vec<CoreRange>, // sorted by start, non-overlapping
}

impl CoreDumpMemReader {
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::from_io_error(e, format!("open {}", path)))?;
        let elf = ElfFile::from_file(path.to_string(), &file)?;
        Self::from_elf(elf)
    }

    pub fn from_elf(elf: ElfFile) -> Result<Self> {
        let mut ranges: Vec<CoreRange> = Vec::new();
        for s in elf.load_segments() {
            if s.size_in_memory == 0 {
                continue;
            }
            if s.address.checked_add(s.size_in_memory).is_none() {
                return err!(MalformedCore, "{}: segment {} wraps around the address space: 0x{:x} + 0x{:x}", elf.name, s.idx, s.address, s.size_in_memory);
            }
            elf.segment_data(s.idx)?;
            ranges.push(CoreRange {start: s.address, size_in_file: s.size_in_file, size_in_memory: s.size_in_memory, segment: s.idx});
        }
        if ranges.is_empty() {
            return err!(MalformedCore, "{} has no PT_LOAD segments", elf.name);
        }
        let name = elf.name.clone();
        Ok(Self::with_ranges(name, Some(elf), Vec::new(), ranges))
    }

    // Image from (address, bytes) pairs, no zero-filled tails.
    pub fn from_segments(name: String, segments: Vec<(usize, Vec<u8>)>) -> Self {
        let mut ranges: Vec<CoreRange> = Vec::new();
        let mut owned: Vec<Vec<u8>> = Vec::new();
        for (address, bytes) in segments {
            if bytes.is_empty() {
                continue;
            }
            ranges.push(CoreRange {start: address, size_in_file: bytes.len(), size_in_memory: bytes.len(), segment: owned.len()});
            owned.push(bytes);
        }
        Self::with_ranges(name, None, owned, ranges)
    }

    fn with_ranges(name: String, elf: Option<ElfFile>, owned: Vec<Vec<u8>>, mut ranges: Vec<CoreRange>) -> Self {
        ranges.sort_by_key(|r| r.start);
        let mut res: Vec<CoreRange> = Vec::with_capacity(ranges.len());
        for r in ranges {
            if let Some(prev) = res.last() {
                if prev.start + prev.size_in_memory > r.start {
                    eprintln!("warning: {}: segment at 0x{:x} overlaps segment at 0x{:x}, ignoring it", name, r.start, prev.start);
                    continue;
                }
            }
            res.push(r);
        }
        CoreDumpMemReader {name, elf, owned, ranges: res}
    }

    fn range_data(&self, r: &CoreRange) -> &[u8] {
        match &self.elf {
            // Validated in from_elf().
            Some(elf) => elf.segment_data(r.segment).unwrap_or(&[]),
            None => &self.owned[r.segment],
        }
    }

    pub fn read(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        let idx = self.ranges.partition_point(|r| r.start + r.size_in_memory <= addr);
        if idx == self.ranges.len() || self.ranges[idx].start > addr {
            return err!(ProcessState, "bad address");
        }
        let r = &self.ranges[idx];
        let offset = addr - r.start;
        if buf.len() > r.size_in_memory - offset {
            return err!(ProcessState, "bad address");
        }
        let data = self.range_data(r);
        // Past p_filesz the segment reads as zeros.
        let in_file = r.size_in_file.min(data.len()).saturating_sub(offset).min(buf.len());
        if let Some(src) = data.get(offset..offset + in_file) {
            buf[..in_file].copy_from_slice(src);
        }
        buf[in_file..].fill(0);
        Ok(())
    }

    pub fn address_ranges(&self) -> Vec<(usize, usize)> { self.ranges.iter().map(|r| (r.start, r.start + r.size_in_memory)).collect() }
}

pub trait Primitive: Copy {
    const SIZE: usize;
    fn from_le(bytes: &[u8]) -> Self;
}
macro_rules! impl_primitive {
    ($($t:ty),*) => {$(
        impl Primitive for $t {
            const SIZE: usize = mem::size_of::<$t>();
            fn from_le(bytes: &[u8]) -> Self {
                let mut a = [0u8; mem::size_of::<$t>()];
                a.copy_from_slice(bytes);
                <$t>::from_le_bytes(a)
            }
        }
    )*}
}
impl_primitive!(u8, u16, u32, u64, usize, i32, i64, isize);

const PAGE_SIZE: usize = 4096;

// Reads the inspected program's memory, caches last read page. Good for the many small reads of a render: headers, lengths, items.
// Must be invalidated whenever the process may have run.
pub struct CachedMemReader {
    pub mem: MemReader,
    addr: Option<usize>,
    page: Vec<u8>,
}
impl CachedMemReader {
    pub fn new(mem: MemReader) -> Self { Self {mem, addr: None, page: vec![0u8; PAGE_SIZE]} }

    pub fn invalidate(&mut self) { self.addr = None; }

    pub fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if buf.len() > usize::MAX - offset {
            return err!(Runtime, "bad memory range: 0x{:x} + 0x{:x}", offset, buf.len());
        }
        let page = offset & !(PAGE_SIZE - 1);
        let last_page = (offset + buf.len() - 1) & !(PAGE_SIZE - 1);
        if page != last_page {
            // Spans pages, e.g. string contents. Not worth caching.
            return self.mem.read(offset, buf);
        }
        if self.addr != Some(page) {
            self.addr = None;
            if self.mem.read(page, &mut self.page).is_err() {
                // Page is only partially readable (e.g. the end of a core segment), or not at all. Read just the requested bytes.
                return self.mem.read(offset, buf);
            }
            self.addr = Some(page);
        }
        let start = offset - page;
        buf.copy_from_slice(&self.page[start..start + buf.len()]);
        Ok(())
    }

    pub fn read_value<T: Primitive>(&mut self, offset: usize) -> Result<T> {
        let mut buf = [0u8; 16];
        self.read(offset, &mut buf[..T::SIZE])?;
        Ok(T::from_le(&buf[..T::SIZE]))
    }

    // Fail-soft typed read. All heap dereferences of the decoder go through this.
    pub fn peek<T: Primitive>(&mut self, offset: usize) -> Option<T> { self.read_value(offset).ok() }

    pub fn probe(&mut self, offset: usize) -> bool { self.peek::<u8>(offset).is_some() }

    pub fn read_u8(&mut self, offset: usize) -> Result<u8> {
        if self.addr == Some(offset & !(PAGE_SIZE - 1)) {
            // Fast path.
            return Ok(self.page[offset & (PAGE_SIZE - 1)]);
        }
        self.read_value(offset)
    }
    pub fn read_u32(&mut self, offset: usize) -> Result<u32> { self.read_value(offset) }
    pub fn read_u64(&mut self, offset: usize) -> Result<u64> { self.read_value(offset) }
    pub fn read_usize(&mut self, offset: usize) -> Result<usize> { self.read_value(offset) }

    // UTF-16 code units.
    pub fn read_u16_units(&mut self, offset: usize, count: usize) -> Result<Vec<u16>> {
        let len = match count.checked_mul(2) {
            Some(x) => x,
            None => return err!(Sanity, "too many code units: {}", count),
        };
        let mut bytes = vec![0u8; len];
        self.read(offset, &mut bytes)?;
        Ok(bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect())
    }
}
