// Decoding of pmath_t values read out of the inspected process.
//
// Everything here fails soft: a fault or an inconsistent field turns into an absent value (or the caller's fallback),
// never into an error. The process may be in the middle of freeing the very object we're looking at.

use std::sync::OnceLock;
use regex::Regex;
use crate::{*, layout::*, procfs::*, util::*};

// Memory + layout + warning limiter, passed to everything that dereferences values.
pub struct DecodeContext {
    pub memory: CachedMemReader,
    pub layout: ObjectLayout,
    pub limiter: Limiter,
}

impl DecodeContext {
    pub fn new(memory: MemReader, layout: ObjectLayout) -> Self { Self {memory: CachedMemReader::new(memory), layout, limiter: Limiter::new()} }

    // Call whenever the process may have run since the last read.
    pub fn invalidate(&mut self) { self.memory.invalidate(); }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagClass {
    Double,
    Magic,
    Int32,
    MiniString(u8),
    Pointer,
    // Non-double tag that's neither a pointer nor one of the known immediates. Some future runtime version's new immediate type.
    Reserved,
}

pub fn classify_bits(bits: u64) -> TagClass {
    let tag = tag_of(bits);
    if tag & TAGMASK_NONDOUBLE != TAGMASK_NONDOUBLE {
        return TagClass::Double;
    }
    match tag {
        TAG_MAGIC => TagClass::Magic,
        TAG_INT32 => TagClass::Int32,
        TAG_STR0 => TagClass::MiniString(0),
        TAG_STR1 => TagClass::MiniString(1),
        TAG_STR2 => TagClass::MiniString(2),
        _ if tag & TAGMASK_POINTER == TAGMASK_POINTER => TagClass::Pointer,
        _ => TagClass::Reserved,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectType {
    Known(TypeShift),
    Unknown(u8),
}

impl ObjectType {
    pub fn from_u8(x: u8) -> Self { match TypeShift::from_u8(x) { Some(t) => Self::Known(t), None => Self::Unknown(x) } }

    pub fn shift(self) -> u8 { match self { Self::Known(t) => t as u8, Self::Unknown(x) => x } }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValueKind {
    // No value at all: out-of-bounds child, freed object, missing field.
    Absent,
    Double(f64),
    Magic(u32),
    Int32(i32),
    MiniString {len: u8, units: [u16; 2]},
    // Pointer tag with zero address.
    Null,
    Object {addr: usize, type_: ObjectType},
    // Pointer whose header can't be read.
    Unreadable(usize),
    Reserved {tag: u32, payload: u32},
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExprVal {
    bits: Option<u64>,
    kind: ValueKind,
}

// Sanity bound on packed array rank.
const MAX_PACKED_DIMENSIONS: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedArrayInfo {
    pub element_type: u8,
    pub sizes: Vec<usize>,
}

impl ExprVal {
    pub fn absent() -> Self { Self {bits: None, kind: ValueKind::Absent} }

    pub fn decode(bits: u64, cx: &mut DecodeContext) -> Self {
        let kind = match classify_bits(bits) {
            TagClass::Double => ValueKind::Double(f64::from_bits(bits)),
            TagClass::Magic => ValueKind::Magic(payload_of(bits)),
            TagClass::Int32 => ValueKind::Int32(payload_of(bits) as i32),
            TagClass::MiniString(len) => {
                let p = payload_of(bits);
                ValueKind::MiniString {len, units: [p as u16, (p >> 16) as u16]}
            }
            TagClass::Pointer => match address_of(bits) {
                0 => ValueKind::Null,
                addr => match cx.memory.peek::<u8>(addr + cx.layout.header_type_shift) {
                    Some(shift) => ValueKind::Object {addr, type_: ObjectType::from_u8(shift)},
                    None => ValueKind::Unreadable(addr),
                }
            }
            TagClass::Reserved => ValueKind::Reserved {tag: tag_of(bits), payload: payload_of(bits)},
        };
        Self {bits: Some(bits), kind}
    }

    // For a raw `struct _pmath_t*`.
    pub fn from_pointer(addr: usize, cx: &mut DecodeContext) -> Self { Self::decode(tagged_pointer(addr), cx) }

    // Reads a pmath_t stored at the given address. Absent if unreadable.
    pub fn read_at(addr: usize, cx: &mut DecodeContext) -> Self {
        match cx.memory.peek::<u64>(addr) {
            Some(bits) => Self::decode(bits, cx),
            None => Self::absent(),
        }
    }

    pub fn bits(&self) -> Option<u64> { self.bits }
    pub fn kind(&self) -> ValueKind { self.kind }
    pub fn tag(&self) -> Option<u32> { self.bits.map(tag_of) }

    pub fn is_absent(&self) -> bool { self.kind == ValueKind::Absent }
    pub fn is_double(&self) -> bool { matches!(self.kind, ValueKind::Double(_)) }
    pub fn is_magic(&self) -> bool { matches!(self.kind, ValueKind::Magic(_)) }
    pub fn is_int32(&self) -> bool { matches!(self.kind, ValueKind::Int32(_)) }
    pub fn is_inline_string(&self) -> bool { matches!(self.kind, ValueKind::MiniString {..}) }
    pub fn is_pointer(&self) -> bool { matches!(self.kind, ValueKind::Null | ValueKind::Object {..} | ValueKind::Unreadable(_)) }
    pub fn is_null(&self) -> bool { self.kind == ValueKind::Null }
    pub fn is_absent_or_null(&self) -> bool { self.is_absent() || self.is_null() }

    pub fn object_type(&self) -> Option<ObjectType> { match self.kind { ValueKind::Object {type_, ..} => Some(type_), _ => None } }
    pub fn type_shift(&self) -> Option<TypeShift> { match self.object_type() { Some(ObjectType::Known(t)) => Some(t), _ => None } }

    pub fn is_pointer_of(&self, mask: TypeMask) -> bool {
        match self.type_shift() {
            Some(t) => mask.intersects(t.mask()),
            None => false,
        }
    }

    pub fn is_mp_int(&self) -> bool { self.is_pointer_of(TypeMask::MP_INT) }
    pub fn is_mp_float(&self) -> bool { self.is_pointer_of(TypeMask::MP_FLOAT) }
    pub fn is_quotient(&self) -> bool { self.is_pointer_of(TypeMask::QUOTIENT) }
    pub fn is_big_string(&self) -> bool { self.is_pointer_of(TypeMask::BIGSTRING) }
    pub fn is_symbol(&self) -> bool { self.is_pointer_of(TypeMask::SYMBOL) }
    pub fn is_expression(&self) -> bool { self.is_pointer_of(TypeMask::EXPRESSION) }
    pub fn is_multirule(&self) -> bool { self.is_pointer_of(TypeMask::MULTIRULE) }
    pub fn is_custom(&self) -> bool { self.is_pointer_of(TypeMask::CUSTOM) }
    pub fn is_blob(&self) -> bool { self.is_pointer_of(TypeMask::BLOB) }
    pub fn is_packed_array(&self) -> bool { self.is_pointer_of(TypeMask::PACKED_ARRAY) }
    pub fn is_interval(&self) -> bool { self.is_pointer_of(TypeMask::INTERVAL) }

    pub fn is_string(&self) -> bool { self.is_inline_string() || self.is_big_string() }
    pub fn is_float(&self) -> bool { self.is_double() || self.is_mp_float() }
    pub fn is_integer(&self) -> bool { self.is_int32() || self.is_mp_int() }
    pub fn is_rational(&self) -> bool { self.is_int32() || self.is_pointer_of(TypeMask::RATIONAL) }
    pub fn is_number(&self) -> bool { self.is_int32() || self.is_double() || self.is_pointer_of(TypeMask::NUMBER) }

    pub fn numeric_value(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Double(x) => Some(x),
            ValueKind::Int32(x) => Some(x as f64),
            _ => None,
        }
    }

    pub fn integer_value(&self) -> Option<i32> { match self.kind { ValueKind::Int32(x) => Some(x), _ => None } }

    pub fn inline_string_value(&self) -> Option<Vec<u16>> {
        match self.kind {
            ValueKind::MiniString {len, units} => Some(units[..len as usize].to_vec()),
            _ => None,
        }
    }

    // Address of the heap object, for any pointer-tagged value. Zero for null.
    pub fn pointer_target(&self) -> Option<usize> {
        match self.kind {
            ValueKind::Null => Some(0),
            ValueKind::Object {addr, ..} | ValueKind::Unreadable(addr) => Some(addr),
            _ => None,
        }
    }

    // Zero if not a pointer or unreadable.
    pub fn reference_count(&self, cx: &mut DecodeContext) -> isize {
        match self.kind {
            ValueKind::Object {addr, ..} => cx.memory.peek::<isize>(addr + cx.layout.header_refcount).unwrap_or(0),
            _ => 0,
        }
    }

    // Address of the object if it's of one of the given types and (still) has a positive reference count.
    fn live_object(&self, mask: TypeMask, cx: &mut DecodeContext) -> Option<(usize, TypeShift)> {
        let (addr, t) = match self.kind {
            ValueKind::Object {addr, type_: ObjectType::Known(t)} if mask.intersects(t.mask()) => (addr, t),
            _ => return None,
        };
        if self.reference_count(cx) <= 0 {
            return None;
        }
        Some((addr, t))
    }

    // Number of children, not counting the head. Zero for non-expressions and freed expressions.
    pub fn child_count(&self, cx: &mut DecodeContext) -> usize {
        let (addr, t) = match self.live_object(TypeMask::EXPRESSION, cx) {
            Some(x) => x,
            None => return 0,
        };
        match t {
            TypeShift::PackedArray => self.packed_array_info(cx).and_then(|i| i.sizes.first().copied()).unwrap_or(0),
            _ => cx.memory.peek::<usize>(addr + cx.layout.expr_length).unwrap_or(0),
        }
    }

    // Index 0 is the head. Elements of packed arrays are not decoded.
    pub fn child_at(&self, index: usize, cx: &mut DecodeContext) -> Self {
        self.child_at_impl(index, cx).unwrap_or_else(Self::absent)
    }

    fn child_at_impl(&self, index: usize, cx: &mut DecodeContext) -> Option<Self> {
        let (addr, t) = self.live_object(TypeMask::EXPRESSION_GENERAL | TypeMask::EXPRESSION_GENERAL_PART, cx)?;
        let item_size = 8usize;
        match t {
            TypeShift::ExpressionGeneral => {
                let length = cx.memory.peek::<usize>(addr + cx.layout.expr_length)?;
                if index > length {
                    return None;
                }
                let item = addr.checked_add(cx.layout.expr_items)?.checked_add(index.checked_mul(item_size)?)?;
                Some(Self::read_at(item, cx))
            }
            _ => {
                // Parts store only the head inline. Item i (1-based) is buffer item start + i - 1; the buffer's own items are 1-based
                // too, so start is 1 for a window beginning at the buffer's first child.
                if index == 0 {
                    return Some(Self::read_at(addr + cx.layout.expr_items, cx));
                }
                let length = cx.memory.peek::<usize>(addr + cx.layout.expr_length)?;
                if index > length {
                    return None;
                }
                let buffer = cx.memory.peek::<usize>(addr + cx.layout.expr_part_buffer)?;
                if buffer == 0 {
                    return None;
                }
                let buffer_length = cx.memory.peek::<usize>(buffer.checked_add(cx.layout.expr_length)?)?;
                let start = cx.memory.peek::<usize>(addr + cx.layout.expr_part_start)?;
                let i = start.checked_add(index - 1)?;
                if i > buffer_length {
                    return None;
                }
                let item = buffer.checked_add(cx.layout.expr_items)?.checked_add(i.checked_mul(item_size)?)?;
                Some(Self::read_at(item, cx))
            }
        }
    }

    // Source location or similar attached to an expression. Absent if the runtime build doesn't have the field.
    pub fn debug_metadata(&self, cx: &mut DecodeContext) -> Self {
        let (addr, _) = match self.live_object(TypeMask::EXPRESSION_GENERAL | TypeMask::EXPRESSION_GENERAL_PART, cx) {
            Some(x) => x,
            None => return Self::absent(),
        };
        match cx.layout.expr_debug_metadata {
            DebugMetadataField::Absent => Self::absent(),
            DebugMetadataField::Tagged(off) => Self::read_at(addr + off, cx),
            DebugMetadataField::Pointer(off) => match cx.memory.peek::<usize>(addr + off) {
                Some(ptr) => Self::from_pointer(ptr, cx),
                None => Self::absent(),
            }
        }
    }

    // UTF-16 contents of an inline or heap string. None if not a string, freed or inconsistent.
    pub fn string_data(&self, cx: &mut DecodeContext) -> Option<Vec<u16>> {
        if let Some(units) = self.inline_string_value() {
            return Some(units);
        }
        let (addr, _) = self.live_object(TypeMask::BIGSTRING, cx)?;
        let l = &cx.layout;
        let (length_off, cap_off, buffer_off, header) = (l.string_length, l.string_capacity_or_start, l.string_buffer, l.string_header_size());

        let length = cx.memory.peek::<i32>(addr + length_off)?;
        if length < 0 {
            return None;
        }
        if length == 0 {
            return Some(Vec::new());
        }
        let cap_or_start = cx.memory.peek::<i32>(addr + cap_off)?;
        if cap_or_start < 0 {
            return None;
        }
        let (length, cap_or_start) = (length as usize, cap_or_start as usize);
        if length > MAX_STRING_UNITS {
            if cx.limiter.check(line!()) { eprintln!("warning: string at 0x{:x} has implausible length {}", addr, length); }
            return None;
        }

        // With a readable buffer, capacity_or_start is an offset into the buffer's characters. Otherwise characters are inline and it's the capacity.
        let buffer = cx.memory.peek::<usize>(addr + buffer_off).unwrap_or(0);
        let chars = if buffer == 0 || !cx.memory.probe(buffer) {
            if length > cap_or_start {
                if cx.limiter.check(line!()) { eprintln!("warning: corrupt string at 0x{:x}: length {} > capacity {}", addr, length, cap_or_start); }
                return None;
            }
            addr + header
        } else {
            let buffer_length = cx.memory.peek::<i32>(buffer + length_off)?;
            if (buffer_length as i64) < (cap_or_start + length) as i64 {
                if cx.limiter.check(line!()) { eprintln!("warning: corrupt string at 0x{:x}: start {} + length {} > buffer length {}", addr, cap_or_start, length, buffer_length); }
                return None;
            }
            buffer + header + cap_or_start * 2
        };
        cx.memory.read_u16_units(chars, length).ok()
    }

    pub fn string_or(&self, cx: &mut DecodeContext, fallback: &str) -> String {
        match self.string_data(cx) {
            Some(units) => String::from_utf16_lossy(&units),
            None => fallback.to_string(),
        }
    }

    // Fully qualified. Empty if not a symbol.
    pub fn symbol_name(&self, cx: &mut DecodeContext) -> String {
        let (addr, _) = match self.live_object(TypeMask::SYMBOL, cx) {
            Some(x) => x,
            None => return String::new(),
        };
        let name = Self::read_at(addr + cx.layout.symbol_name, cx);
        name.string_or(cx, "")
    }

    pub fn multirule_pattern(&self, cx: &mut DecodeContext) -> Self { self.field(TypeMask::MULTIRULE, |l| l.multirule_pattern, cx) }
    pub fn multirule_body(&self, cx: &mut DecodeContext) -> Self { self.field(TypeMask::MULTIRULE, |l| l.multirule_body, cx) }
    pub fn multirule_next(&self, cx: &mut DecodeContext) -> Self { self.field(TypeMask::MULTIRULE, |l| l.multirule_next, cx) }

    pub fn quotient_parts(&self, cx: &mut DecodeContext) -> Option<(Self, Self)> {
        self.live_object(TypeMask::QUOTIENT, cx)?;
        Some((self.field(TypeMask::QUOTIENT, |l| l.quotient_numerator, cx), self.field(TypeMask::QUOTIENT, |l| l.quotient_denominator, cx)))
    }

    fn field(&self, mask: TypeMask, offset: impl Fn(&ObjectLayout) -> usize, cx: &mut DecodeContext) -> Self {
        match self.live_object(mask, cx) {
            Some((addr, _)) => Self::read_at(addr + offset(&cx.layout), cx),
            None => Self::absent(),
        }
    }

    // (data pointer, destructor function pointer).
    pub fn custom_data_and_destructor(&self, cx: &mut DecodeContext) -> Option<(usize, usize)> {
        let (addr, _) = self.live_object(TypeMask::CUSTOM, cx)?;
        let data = cx.memory.peek::<usize>(addr + cx.layout.custom_data)?;
        let destructor = cx.memory.peek::<usize>(addr + cx.layout.custom_destructor)?;
        Some((data, destructor))
    }

    pub fn packed_array_info(&self, cx: &mut DecodeContext) -> Option<PackedArrayInfo> {
        let (addr, _) = self.live_object(TypeMask::PACKED_ARRAY, cx)?;
        let element_type = cx.memory.peek::<u8>(addr + cx.layout.packed_element_type)?;
        let dimensions = cx.memory.peek::<u8>(addr + cx.layout.packed_dimensions)? as usize;
        if dimensions == 0 || dimensions > MAX_PACKED_DIMENSIONS {
            return None;
        }
        let mut sizes: Vec<usize> = Vec::with_capacity(dimensions);
        for i in 0..dimensions {
            sizes.push(cx.memory.peek::<usize>(addr + cx.layout.packed_sizes + i * 8)?);
        }
        Some(PackedArrayInfo {element_type, sizes})
    }
}

fn system_symbol_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^System`([^`]+)$").unwrap())
}

// "System`Plus" -> Some("Plus"). Other namespaces (and nested System` contexts) are shown in full.
pub fn system_short_name(name: &str) -> Option<&str> {
    system_symbol_regex().captures(name).and_then(|c| c.get(1)).map(|m| m.as_str())
}
