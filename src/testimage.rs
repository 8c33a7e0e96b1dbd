// Builds fake runtime heaps in memory for tests: objects are laid out with the default ObjectLayout in a single segment,
// read back through a CoreDumpMemReader.

use std::sync::Arc;
use crate::{layout::*, procfs::*, value::*};

pub struct TestImage {
    pub base: usize,
    pub bytes: Vec<u8>,
    pub layout: ObjectLayout,
}

impl TestImage {
    pub fn new() -> Self { Self {base: 0x10000, bytes: Vec::new(), layout: ObjectLayout::default()} }

    pub fn alloc(&mut self, size: usize) -> usize {
        let start = (self.bytes.len() + 15) & !15;
        self.bytes.resize(start + size.max(1), 0);
        self.base + start
    }

    fn slice(&mut self, addr: usize, len: usize) -> &mut [u8] {
        let off = addr - self.base;
        &mut self.bytes[off..off + len]
    }

    pub fn put_u8(&mut self, addr: usize, x: u8) { self.slice(addr, 1)[0] = x; }
    pub fn put_u16(&mut self, addr: usize, x: u16) { self.slice(addr, 2).copy_from_slice(&x.to_le_bytes()); }
    pub fn put_u32(&mut self, addr: usize, x: u32) { self.slice(addr, 4).copy_from_slice(&x.to_le_bytes()); }
    pub fn put_i32(&mut self, addr: usize, x: i32) { self.slice(addr, 4).copy_from_slice(&x.to_le_bytes()); }
    pub fn put_u64(&mut self, addr: usize, x: u64) { self.slice(addr, 8).copy_from_slice(&x.to_le_bytes()); }
    pub fn get_u64(&mut self, addr: usize) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.slice(addr, 8));
        u64::from_le_bytes(b)
    }

    pub fn object(&mut self, shift: u8, size: usize) -> usize {
        let addr = self.alloc(size.max(self.layout.header_size));
        self.put_u8(addr + self.layout.header_type_shift, shift);
        self.put_u64(addr + self.layout.header_refcount, 1);
        addr
    }

    pub fn set_refcount(&mut self, addr: usize, refcount: i64) { let off = self.layout.header_refcount; self.put_u64(addr + off, refcount as u64); }

    pub fn raw_object(&mut self, shift: u8) -> u64 { tagged_pointer(self.object(shift, 32)) }

    // Big string with inline characters, even if short enough for a ministring.
    pub fn string(&mut self, s: &str) -> u64 {
        let units: Vec<u16> = s.encode_utf16().collect();
        let header = self.layout.string_header_size();
        let addr = self.object(TypeShift::BigString as u8, header + units.len() * 2);
        let l = self.layout.clone();
        self.put_u64(addr + l.string_buffer, 0);
        self.put_i32(addr + l.string_length, units.len() as i32);
        self.put_i32(addr + l.string_capacity_or_start, units.len() as i32);
        for (i, u) in units.iter().enumerate() {
            self.put_u16(addr + header + i * 2, *u);
        }
        tagged_pointer(addr)
    }

    // Substring of another big string's characters.
    pub fn shared_string(&mut self, buffer: usize, start: usize, len: usize) -> u64 {
        let addr = self.object(TypeShift::BigString as u8, self.layout.string_header_size());
        let l = self.layout.clone();
        self.put_u64(addr + l.string_buffer, buffer as u64);
        self.put_i32(addr + l.string_length, len as i32);
        self.put_i32(addr + l.string_capacity_or_start, start as i32);
        tagged_pointer(addr)
    }

    pub fn symbol(&mut self, name: &str) -> u64 {
        let name = self.string(name);
        let addr = self.object(TypeShift::Symbol as u8, self.layout.symbol_name + 8);
        let off = self.layout.symbol_name;
        self.put_u64(addr + off, name);
        tagged_pointer(addr)
    }

    pub fn expr(&mut self, head: u64, items: &[u64]) -> u64 {
        let l = self.layout.clone();
        let addr = self.object(TypeShift::ExpressionGeneral as u8, l.expr_items + 8 * (items.len() + 1));
        self.put_u64(addr + l.expr_length, items.len() as u64);
        self.put_u64(addr + l.expr_items, head);
        self.set_debug_metadata(tagged_pointer(addr), tagged_pointer(0));
        for (i, x) in items.iter().enumerate() {
            self.put_u64(addr + l.expr_items + 8 * (i + 1), *x);
        }
        tagged_pointer(addr)
    }

    pub fn expr_part(&mut self, head: u64, buffer: u64, start: usize, length: usize) -> u64 {
        let l = self.layout.clone();
        let addr = self.object(TypeShift::ExpressionPart as u8, l.expr_part_buffer + 8);
        self.put_u64(addr + l.expr_length, length as u64);
        self.put_u64(addr + l.expr_items, head);
        self.set_debug_metadata(tagged_pointer(addr), tagged_pointer(0));
        self.put_u64(addr + l.expr_part_start, start as u64);
        self.put_u64(addr + l.expr_part_buffer, address_of(buffer) as u64);
        tagged_pointer(addr)
    }

    pub fn set_debug_metadata(&mut self, expr: u64, meta: u64) {
        match self.layout.expr_debug_metadata {
            DebugMetadataField::Tagged(off) => self.put_u64(address_of(expr) + off, meta),
            DebugMetadataField::Pointer(off) => self.put_u64(address_of(expr) + off, address_of(meta) as u64),
            DebugMetadataField::Absent => (),
        }
    }

    pub fn quotient(&mut self, numerator: u64, denominator: u64) -> u64 {
        let l = self.layout.clone();
        let addr = self.object(TypeShift::Quotient as u8, l.quotient_denominator + 8);
        self.put_u64(addr + l.quotient_numerator, numerator);
        self.put_u64(addr + l.quotient_denominator, denominator);
        tagged_pointer(addr)
    }

    pub fn multirule(&mut self, pattern: u64, body: u64, next: u64) -> u64 {
        let l = self.layout.clone();
        let addr = self.object(TypeShift::Multirule as u8, l.multirule_next + 8);
        self.put_u64(addr + l.multirule_pattern, pattern);
        self.put_u64(addr + l.multirule_body, body);
        self.put_u64(addr + l.multirule_next, next);
        tagged_pointer(addr)
    }

    pub fn custom(&mut self, data: usize, destructor: usize) -> u64 {
        let l = self.layout.clone();
        let addr = self.object(TypeShift::Custom as u8, l.custom_destructor + 8);
        self.put_u64(addr + l.custom_data, data as u64);
        self.put_u64(addr + l.custom_destructor, destructor as u64);
        tagged_pointer(addr)
    }

    pub fn packed_array(&mut self, element_type: u8, sizes: &[usize]) -> u64 {
        let l = self.layout.clone();
        let addr = self.object(TypeShift::PackedArray as u8, l.packed_sizes + 16 * sizes.len());
        self.put_u8(addr + l.packed_element_type, element_type);
        self.put_u8(addr + l.packed_dimensions, sizes.len() as u8);
        for (i, s) in sizes.iter().enumerate() {
            self.put_u64(addr + l.packed_sizes + 8 * i, *s as u64);
        }
        tagged_pointer(addr)
    }

    // Interpreter thread record with an empty stack.
    pub fn thread(&mut self, parent: usize) -> usize {
        let l = self.layout.clone();
        let addr = self.alloc(l.thread_stack_info + 8);
        self.put_u64(addr + l.thread_parent, parent as u64);
        self.put_u64(addr + l.thread_stack_info, 0);
        addr
    }

    // Pushes a frame record onto the thread's stack, the way the evaluator does on entry. Returns the record's address.
    pub fn push_frame(&mut self, thread: usize, head: u64, debug_metadata: u64) -> usize {
        let l = self.layout.clone();
        let addr = self.alloc(l.stack_info_debug_metadata + 8);
        let top = self.get_u64(thread + l.thread_stack_info);
        self.put_u64(addr + l.stack_info_next, top);
        self.put_u64(addr + l.stack_info_head, head);
        self.put_u64(addr + l.stack_info_debug_metadata, debug_metadata);
        self.put_u64(thread + l.thread_stack_info, addr as u64);
        addr
    }

    pub fn reader(&self) -> MemReader {
        MemReader::CoreDump(Arc::new(CoreDumpMemReader::from_segments("test image".to_string(), vec![(self.base, self.bytes.clone())])))
    }

    // Snapshot of the image as it is now.
    pub fn context(&self) -> DecodeContext { DecodeContext::new(self.reader(), self.layout.clone()) }
}
