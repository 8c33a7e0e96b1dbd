// How the pMath runtime lays out its values in memory.
//
// A pmath_t is a 64-bit union. If the upper 32 bits ("tag") don't have all of TAGMASK_NONDOUBLE set, the whole thing is an IEEE double.
// Otherwise the tag says what's in the lower 32 bits (int32, magic number, up to two UTF-16 code units), or, if all of TAGMASK_POINTER
// is set, the low 52 bits are the address of a reference-counted heap object. Heap objects start with a common header holding a
// "type shift": an index into the TypeMask bitset below.
//
// The struct offsets are for x86-64 builds. A host that can read the runtime's DWARF can overwrite them in ObjectLayout.

use bitflags::bitflags;
use std::{cell::Cell, mem};

pub const TAGMASK_NONDOUBLE: u32 = 0x7FF0_0000;
pub const TAGMASK_POINTER: u32   = 0xFFF0_0000;
pub const TAGMASK_BITCOUNT: u32  = 12;

pub const TAG_MAGIC: u32 = TAGMASK_NONDOUBLE | 0x1_0000;
pub const TAG_INT32: u32 = TAGMASK_NONDOUBLE | 0x2_0000;
pub const TAG_STR0: u32  = TAGMASK_NONDOUBLE | 0x3_0000;
pub const TAG_STR1: u32  = TAGMASK_NONDOUBLE | 0x4_0000;
pub const TAG_STR2: u32  = TAGMASK_NONDOUBLE | 0x5_0000;

pub const PACKED_DOUBLE: u8 = 1;
pub const PACKED_INT32: u8  = 2;

// Anything longer than this is assumed to be a garbage length field.
pub const MAX_STRING_UNITS: usize = 1 << 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeShift {
    MpFloat = 0,
    MpInt = 1,
    Quotient = 2,
    BigString = 3,
    Symbol = 4,
    ExpressionGeneral = 5,
    ExpressionPart = 6,
    Multirule = 7,
    Custom = 8,
    Blob = 9,
    PackedArray = 10,
    Interval = 11,
}

impl TypeShift {
    pub fn from_u8(x: u8) -> Option<Self> {
        Some(match x {
            0 => Self::MpFloat,
            1 => Self::MpInt,
            2 => Self::Quotient,
            3 => Self::BigString,
            4 => Self::Symbol,
            5 => Self::ExpressionGeneral,
            6 => Self::ExpressionPart,
            7 => Self::Multirule,
            8 => Self::Custom,
            9 => Self::Blob,
            10 => Self::PackedArray,
            11 => Self::Interval,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::MpFloat => "mp float",
            Self::MpInt => "mp int",
            Self::Quotient => "quotient",
            Self::BigString => "string",
            Self::Symbol => "symbol",
            Self::ExpressionGeneral => "expression",
            Self::ExpressionPart => "expression part",
            Self::Multirule => "multirule",
            Self::Custom => "custom",
            Self::Blob => "blob",
            Self::PackedArray => "packed array",
            Self::Interval => "interval",
        }
    }

    pub fn mask(self) -> TypeMask { TypeMask::from_bits_truncate(1 << self as u32) }
}

bitflags! { pub struct TypeMask: u32 {
    const MP_FLOAT = 1 << 0;
    const MP_INT = 1 << 1;
    const QUOTIENT = 1 << 2;
    const BIGSTRING = 1 << 3;
    const SYMBOL = 1 << 4;
    const EXPRESSION_GENERAL = 1 << 5;
    const EXPRESSION_GENERAL_PART = 1 << 6;
    const MULTIRULE = 1 << 7;
    const CUSTOM = 1 << 8;
    const BLOB = 1 << 9;
    const PACKED_ARRAY = 1 << 10;
    const INTERVAL = 1 << 11;

    // Packed arrays are expressions too, as far as the runtime's type checks go.
    const EXPRESSION = Self::EXPRESSION_GENERAL.bits | Self::EXPRESSION_GENERAL_PART.bits | Self::PACKED_ARRAY.bits;
    const RATIONAL = Self::MP_INT.bits | Self::QUOTIENT.bits;
    const NUMBER = Self::RATIONAL.bits | Self::MP_FLOAT.bits;
}}

pub fn tag_name(tag: u32) -> Option<&'static str> {
    match tag {
        TAG_MAGIC => Some("magic"),
        TAG_INT32 => Some("int32"),
        TAG_STR0 => Some("str0"),
        TAG_STR1 => Some("str1"),
        TAG_STR2 => Some("str2"),
        _ => None,
    }
}

pub fn packed_element_type_name(t: u8) -> &'static str {
    match t {
        PACKED_DOUBLE => "Real",
        PACKED_INT32 => "Integer",
        _ => "Undefined",
    }
}

pub fn tag_of(bits: u64) -> u32 { (bits >> 32) as u32 }
pub fn payload_of(bits: u64) -> u32 { bits as u32 }
pub fn address_of(bits: u64) -> usize { ((bits << TAGMASK_BITCOUNT) >> TAGMASK_BITCOUNT) as usize }

pub fn make_tagged(tag: u32, payload: u32) -> u64 { (tag as u64) << 32 | payload as u64 }
pub fn tagged_int32(x: i32) -> u64 { make_tagged(TAG_INT32, x as u32) }
pub fn tagged_magic(x: u32) -> u64 { make_tagged(TAG_MAGIC, x) }
pub fn tagged_double(x: f64) -> u64 { x.to_bits() }
pub fn tagged_pointer(addr: usize) -> u64 { make_tagged(TAGMASK_POINTER, 0) | ((addr as u64) << TAGMASK_BITCOUNT >> TAGMASK_BITCOUNT) }

pub fn tagged_ministr(units: &[u16]) -> Option<u64> {
    Some(match units {
        [] => make_tagged(TAG_STR0, 0),
        [a] => make_tagged(TAG_STR1, *a as u32),
        [a, b] => make_tagged(TAG_STR2, *a as u32 | (*b as u32) << 16),
        _ => return None,
    })
}

// Where the metadata link of an expression lives. Older runtime builds stored a raw `struct _pmath_t*`, newer ones a full pmath_t.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugMetadataField {
    Absent,
    Pointer(usize),
    Tagged(usize),
}

// Byte offsets of the fields the decoder reads, relative to the start of the respective struct.
#[derive(Clone, Debug)]
pub struct ObjectLayout {
    // struct _pmath_t
    pub header_type_shift: usize, // u8
    pub header_refcount: usize,   // intptr_t
    pub header_size: usize,

    // struct _pmath_expr_t, followed by pmath_t items[length + 1], items[0] being the head
    pub expr_length: usize,
    pub expr_debug_metadata: DebugMetadataField,
    pub expr_items: usize,
    // struct _pmath_expr_part_t: a general expression with only the head inline, plus a window into another expression's items
    pub expr_part_start: usize,
    pub expr_part_buffer: usize,

    // struct _pmath_string_t; characters (uint16_t) follow the struct, rounded up to size_t alignment
    pub string_buffer: usize,
    pub string_length: usize,            // int
    pub string_capacity_or_start: usize, // int
    pub string_struct_size: usize,

    pub symbol_name: usize,
    pub quotient_numerator: usize,
    pub quotient_denominator: usize,
    pub multirule_pattern: usize,
    pub multirule_body: usize,
    pub multirule_next: usize,
    pub custom_data: usize,
    pub custom_destructor: usize,

    pub packed_element_type: usize, // u8
    pub packed_dimensions: usize,   // u8
    pub packed_sizes: usize,        // size_t sizes[dimensions], then steps

    // struct _pmath_thread_t and the intrusive struct _pmath_stack_info_t list hanging off it
    pub thread_parent: usize,
    pub thread_stack_info: usize,
    pub stack_info_next: usize,
    pub stack_info_head: usize,
    pub stack_info_debug_metadata: usize,

    // C++ side: pmath::Expr/pmath::String hold a single pmath_t; richmath::Hashtable and richmath::Array.
    pub wrapper_obj: usize,
    pub hashtable_used_count: usize, // unsigned
    pub hashtable_capacity: usize,   // unsigned
    pub hashtable_large_table: usize,
    pub hashtable_small_table: usize,
    pub array_items: usize,

    string_header_size: Cell<Option<usize>>,
}

impl Default for ObjectLayout {
    fn default() -> Self { ObjectLayout {
        header_type_shift: 0,
        header_refcount: 8,
        header_size: 16,

        expr_length: 16,
        expr_debug_metadata: DebugMetadataField::Tagged(24),
        expr_items: 32,
        expr_part_start: 40,
        expr_part_buffer: 48,

        string_buffer: 16,
        string_length: 24,
        string_capacity_or_start: 28,
        string_struct_size: 32,

        symbol_name: 24,
        quotient_numerator: 16,
        quotient_denominator: 24,
        multirule_pattern: 16,
        multirule_body: 24,
        multirule_next: 32,
        custom_data: 16,
        custom_destructor: 24,

        packed_element_type: 40,
        packed_dimensions: 41,
        packed_sizes: 48,

        thread_parent: 0,
        thread_stack_info: 48,
        stack_info_next: 0,
        stack_info_head: 8,
        stack_info_debug_metadata: 16,

        wrapper_obj: 0,
        hashtable_used_count: 4,
        hashtable_capacity: 8,
        hashtable_large_table: 16,
        hashtable_small_table: 24,
        array_items: 0,

        string_header_size: Cell::new(None),
    } }
}

impl ObjectLayout {
    // Offset of the first character after a string header. Computed once; type layout doesn't change during a session.
    pub fn string_header_size(&self) -> usize {
        if let Some(s) = self.string_header_size.get() {
            return s;
        }
        let word = mem::size_of::<usize>();
        let s = (self.string_struct_size + word - 1) / word * word;
        self.string_header_size.set(Some(s));
        s
    }

    pub fn set_string_struct_size(&mut self, size: usize) {
        self.string_struct_size = size;
        self.string_header_size.set(None);
    }
}
