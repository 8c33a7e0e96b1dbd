// Pretty-printers, keyed by the static type name of a variable as the host debugger sees it.
// Each gives a one-line summary, a display hint, and labeled children for structured display.

use std::{fmt::Write, sync::OnceLock};
use regex::Regex;
use crate::{render::*, settings::*, value::*};

// Hashtable capacity beyond this is assumed to be garbage.
const MAX_TABLE_CAPACITY: usize = 1 << 24;
// Don't enumerate more container children than this.
const MAX_CONTAINER_CHILDREN: usize = 1 << 16;

// Where the host found the variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueLoc {
    // Contents known directly, e.g. a register or an evaluated expression.
    Bits(u64),
    Addr(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostValue {
    pub type_name: String,
    pub loc: ValueLoc,
}

impl HostValue {
    pub fn new(type_name: &str, loc: ValueLoc) -> Self { Self {type_name: type_name.to_string(), loc} }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrinterKind {
    // The pmath_t union itself, or a raw `struct _pmath_t*`.
    Tagged,
    RawPointer,
    // pmath::Expr, pmath::String: a single pmath_t field.
    Wrapper,
    Hashtable,
    Array,
    Void,
}

// Layout of one element of a container template instantiation. Only the host knows it, from the instantiation's DWARF.
#[derive(Clone, Copy, Debug)]
pub struct ElementLayout {
    pub key_offset: usize,
    pub value_offset: usize,
    pub size: usize,
}
impl Default for ElementLayout { fn default() -> Self { ElementLayout {key_offset: 0, value_offset: 8, size: 8} } }

#[derive(Clone, Debug, PartialEq)]
pub enum ChildValue {
    Text(String),
    Int(i64),
    Pointer(usize),
    Expr(ExprVal),
    // Host-typed value at this address, for the host to print itself (container elements).
    Addr(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Child {
    pub label: String,
    pub value: ChildValue,
}

impl Child {
    fn new(label: &str, value: ChildValue) -> Self { Child {label: label.to_string(), value} }
}

fn wrapper_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^pmath::(Expr|String)$").unwrap())
}
fn hashtable_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^richmath::Hashtable<.*>$").unwrap())
}
fn array_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^richmath::Array<.*>$").unwrap())
}

// "const volatile pmath_t" -> "pmath_t".
fn unqualified(type_name: &str) -> &str {
    let mut s = type_name.trim();
    loop {
        if let Some(rest) = s.strip_prefix("const ") {
            s = rest.trim_start();
        } else if let Some(rest) = s.strip_prefix("volatile ") {
            s = rest.trim_start();
        } else {
            return s;
        }
    }
}

pub fn lookup_printer(type_name: &str) -> Option<PrinterKind> {
    let t = unqualified(type_name);
    let t = t.strip_prefix("union ").unwrap_or(t);
    match t {
        "pmath_t" => return Some(PrinterKind::Tagged),
        "struct _pmath_t *" | "struct _pmath_t*" | "_pmath_t *" | "_pmath_t*" => return Some(PrinterKind::RawPointer),
        "richmath::Void" => return Some(PrinterKind::Void),
        _ => (),
    }
    if wrapper_regex().is_match(t) {
        Some(PrinterKind::Wrapper)
    } else if hashtable_regex().is_match(t) {
        Some(PrinterKind::Hashtable)
    } else if array_regex().is_match(t) {
        Some(PrinterKind::Array)
    } else {
        None
    }
}

// The tagged value a host value stands for, for the printers and commands that show one.
pub fn expr_of(value: &HostValue, kind: PrinterKind, cx: &mut DecodeContext) -> ExprVal {
    match (kind, value.loc) {
        (PrinterKind::Tagged, ValueLoc::Bits(bits)) => ExprVal::decode(bits, cx),
        (PrinterKind::Tagged, ValueLoc::Addr(addr)) => ExprVal::read_at(addr, cx),
        (PrinterKind::RawPointer, ValueLoc::Bits(ptr)) => ExprVal::from_pointer(ptr as usize, cx),
        (PrinterKind::RawPointer, ValueLoc::Addr(addr)) => match cx.memory.peek::<usize>(addr) {
            Some(ptr) => ExprVal::from_pointer(ptr, cx),
            None => ExprVal::absent(),
        }
        // A wrapper is exactly one pmath_t, so its bits are the field's bits.
        (PrinterKind::Wrapper, ValueLoc::Bits(bits)) => ExprVal::decode(bits, cx),
        (PrinterKind::Wrapper, ValueLoc::Addr(addr)) => ExprVal::read_at(addr + cx.layout.wrapper_obj, cx),
        _ => ExprVal::absent(),
    }
}

pub struct Printer {
    pub kind: PrinterKind,
    pub value: HostValue,
}

impl Printer {
    pub fn new(value: HostValue) -> Option<Self> {
        let kind = lookup_printer(&value.type_name)?;
        Some(Printer {kind, value})
    }

    pub fn display_hint(&self) -> Option<&'static str> {
        match self.kind {
            PrinterKind::Tagged | PrinterKind::RawPointer | PrinterKind::Wrapper => Some("expression"),
            PrinterKind::Hashtable => Some("map"),
            PrinterKind::Array => Some("array"),
            PrinterKind::Void => None,
        }
    }

    pub fn summary(&self, cx: &mut DecodeContext, settings: &Settings) -> String {
        match self.kind {
            PrinterKind::Tagged | PrinterKind::RawPointer | PrinterKind::Wrapper => {
                let val = expr_of(&self.value, self.kind, cx);
                let opts = RenderOptions {max_depth: settings.max_depth, max_children: settings.max_children, debug_marker: settings.debug_marker};
                escape_for_display(&render_with(&val, cx, &opts))
            }
            PrinterKind::Hashtable => match self.addr() {
                Some(addr) => format!("Hashtable with {} elements", cx.memory.peek::<u32>(addr + cx.layout.hashtable_used_count).unwrap_or(0)),
                None => "Hashtable".to_string(),
            }
            PrinterKind::Array => format!("Array of {} elements", self.array(cx).map_or(0, |(_, n)| n)),
            PrinterKind::Void => "Void()".to_string(),
        }
    }

    pub fn children(&self, cx: &mut DecodeContext, element: &ElementLayout) -> Vec<Child> {
        match self.kind {
            PrinterKind::Tagged | PrinterKind::RawPointer | PrinterKind::Wrapper => expr_children(&expr_of(&self.value, self.kind, cx), cx),
            PrinterKind::Hashtable => self.hashtable_children(cx, element),
            PrinterKind::Array => match self.array(cx) {
                Some((items, n)) => (0..n.min(MAX_CONTAINER_CHILDREN)).map(|i| Child {label: format!("{}", i + 1), value: ChildValue::Addr(items + i * element.size)}).collect(),
                None => Vec::new(),
            }
            PrinterKind::Void => Vec::new(),
        }
    }

    fn addr(&self) -> Option<usize> { match self.value.loc { ValueLoc::Addr(a) => Some(a), ValueLoc::Bits(_) => None } }

    // (items address, length). The length is an int stored just before the first item.
    fn array(&self, cx: &mut DecodeContext) -> Option<(usize, usize)> {
        let addr = self.addr()?;
        let items = cx.memory.peek::<usize>(addr + cx.layout.array_items)?;
        if items == 0 {
            return Some((0, 0));
        }
        let n = cx.memory.peek::<i32>(items.checked_sub(4)?)?;
        Some((items, n.max(0) as usize))
    }

    fn hashtable_children(&self, cx: &mut DecodeContext, element: &ElementLayout) -> Vec<Child> {
        let mut res: Vec<Child> = Vec::new();
        let addr = match self.addr() {
            Some(a) => a,
            None => return res,
        };
        let l = &cx.layout;
        let (used_off, cap_off, large_off, small_off) = (l.hashtable_used_count, l.hashtable_capacity, l.hashtable_large_table, l.hashtable_small_table);
        let used_count = cx.memory.peek::<u32>(addr + used_off).unwrap_or(0) as usize;
        let capacity = cx.memory.peek::<u32>(addr + cap_off).unwrap_or(0) as usize;
        if capacity > MAX_TABLE_CAPACITY {
            if cx.limiter.check(line!()) { eprintln!("warning: hashtable at 0x{:x} has implausible capacity {}", addr, capacity); }
            return res;
        }
        let table = match cx.memory.peek::<usize>(addr + large_off) {
            Some(0) => addr + small_off,
            Some(t) => t,
            None => return res,
        };
        let mut used = 0usize;
        for i in 0..capacity {
            if used >= used_count || used >= MAX_CONTAINER_CHILDREN {
                break;
            }
            let entry = match cx.memory.peek::<usize>(table + i * 8) {
                Some(e) => e,
                None => break,
            };
            // Empty slots are null, deleted ones all-ones.
            if entry == 0 || entry == usize::MAX {
                continue;
            }
            used += 1;
            res.push(Child {label: format!("[{} key]", i), value: ChildValue::Addr(entry + element.key_offset)});
            res.push(Child {label: format!("[{} value]", i), value: ChildValue::Addr(entry + element.value_offset)});
        }
        res
    }
}

pub fn expr_children(val: &ExprVal, cx: &mut DecodeContext) -> Vec<Child> {
    let mut res: Vec<Child> = Vec::new();
    let metadata = val.debug_metadata(cx);
    if !metadata.is_absent_or_null() {
        res.push(Child::new("debug info", ChildValue::Text(format_debug_metadata(&metadata, cx))));
    }
    if let Some(ptr) = val.pointer_target() {
        res.push(Child::new("pointer", ChildValue::Pointer(ptr)));
        res.push(Child::new("refcount", ChildValue::Int(val.reference_count(cx) as i64)));
    }
    if let Some((n, d)) = val.quotient_parts(cx) {
        res.push(Child::new("numerator", ChildValue::Expr(n)));
        res.push(Child::new("denominator", ChildValue::Expr(d)));
    }
    if val.is_multirule() {
        res.push(Child::new("pattern", ChildValue::Expr(val.multirule_pattern(cx))));
        res.push(Child::new("body", ChildValue::Expr(val.multirule_body(cx))));
        res.push(Child::new("next", ChildValue::Expr(val.multirule_next(cx))));
    }
    res
}

// Host displays are ASCII-safe: escape control and non-ASCII characters (\n, \xXX, \uXXXX, \UXXXXXXXX),
// but leave backslashes alone (the renderer already escaped the ones inside strings).
pub fn escape_for_display(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let _ = match c {
            '\n' => out.write_str("\\n"),
            '\t' => out.write_str("\\t"),
            '\r' => out.write_str("\\r"),
            ' '..='~' => out.write_char(c),
            '\0'..='\u{ff}' => write!(out, "\\x{:02x}", c as u32),
            '\u{100}'..='\u{ffff}' => write!(out, "\\u{:04x}", c as u32),
            _ => write!(out, "\\U{:08x}", c as u32),
        };
    }
    out
}
