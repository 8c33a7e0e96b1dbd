use std::fmt::{self, Write};
use crate::{layout::*, value::*};

pub const NULL_TEXT: &str = "/\\/";
pub const DEBUG_INFO_MARKER: &str = "`dbg`";
// Recursion is bounded by depth, so depth is bounded by this to keep cyclic heaps from overflowing the native stack.
pub const MAX_RENDER_DEPTH: usize = 200;

#[derive(Clone, Copy, Debug)]
pub struct RenderOptions {
    pub max_depth: usize,
    pub max_children: usize,
    // Append DEBUG_INFO_MARKER after the head of expressions that carry debug metadata.
    pub debug_marker: bool,
}

impl RenderOptions {
    pub fn new(max_depth: usize, max_children: usize) -> Self { Self {max_depth, max_children, debug_marker: false} }
}

pub fn render(val: &ExprVal, cx: &mut DecodeContext, max_depth: usize, max_children: usize) -> String {
    render_with(val, cx, &RenderOptions::new(max_depth, max_children))
}

pub fn render_with(val: &ExprVal, cx: &mut DecodeContext, opts: &RenderOptions) -> String {
    let mut out = String::new();
    // Writing to a String doesn't fail.
    let _ = write_value(&mut out, val, cx, opts.max_depth, opts);
    out
}

// Depth only decreases when going into an expression's head or children, so this terminates even on cyclic garbage.
pub fn write_value<W: Write>(out: &mut W, val: &ExprVal, cx: &mut DecodeContext, depth: usize, opts: &RenderOptions) -> fmt::Result {
    let depth = depth.min(MAX_RENDER_DEPTH);
    match val.kind() {
        ValueKind::Absent => out.write_str("??"),
        ValueKind::Unreadable(addr) => write!(out, "[? 0x{:x} ?]", addr),
        ValueKind::MiniString {..} | ValueKind::Object {type_: ObjectType::Known(TypeShift::BigString), ..} => write_string(out, val, cx),
        ValueKind::Object {type_: ObjectType::Known(TypeShift::Symbol), ..} => {
            let name = val.symbol_name(cx);
            out.write_str(system_short_name(&name).unwrap_or(&name))
        }
        ValueKind::Int32(x) => write!(out, "{}", x),
        ValueKind::Double(x) => write!(out, "{:?}", x),
        ValueKind::Object {addr, type_: ObjectType::Known(TypeShift::PackedArray)} => match val.packed_array_info(cx) {
            Some(info) => {
                write!(out, "PackedArray({}, <<", packed_element_type_name(info.element_type))?;
                for (i, s) in info.sizes.iter().enumerate() {
                    if i != 0 {
                        out.write_char(',')?;
                    }
                    write!(out, "{}", s)?;
                }
                out.write_str(">>)")
            }
            None => write_object_ref(out, addr, val.object_type()),
        }
        ValueKind::Object {type_: ObjectType::Known(TypeShift::ExpressionGeneral | TypeShift::ExpressionPart), ..} => write_expression(out, val, cx, depth, opts),
        ValueKind::Object {addr, type_: ObjectType::Known(TypeShift::Custom)} => match val.custom_data_and_destructor(cx) {
            Some((data, destructor)) => write!(out, "[custom 0x{:x} for 0x{:x}]", data, destructor),
            None => write_object_ref(out, addr, val.object_type()),
        }
        ValueKind::Object {addr, type_} => write_object_ref(out, addr, Some(type_)),
        ValueKind::Null => out.write_str(NULL_TEXT),
        ValueKind::Magic(x) => write!(out, "[magic {}]", x as i32),
        ValueKind::Reserved {tag, payload} => write!(out, "[tag 0x{:x}: {}]", tag, payload as i32),
    }
}

fn write_object_ref<W: Write>(out: &mut W, addr: usize, type_: Option<ObjectType>) -> fmt::Result {
    match type_ {
        Some(ObjectType::Known(t)) => write!(out, "[{} at 0x{:x}]", t.name(), addr),
        Some(ObjectType::Unknown(x)) => write!(out, "[type {} at 0x{:x}]", x, addr),
        None => write!(out, "[? 0x{:x} ?]", addr),
    }
}

fn write_string<W: Write>(out: &mut W, val: &ExprVal, cx: &mut DecodeContext) -> fmt::Result {
    let units = val.string_data(cx).unwrap_or_default();
    out.write_char('"')?;
    for c in char::decode_utf16(units.iter().copied()) {
        match c.unwrap_or(char::REPLACEMENT_CHARACTER) {
            '\\' => out.write_str("\\\\")?,
            '"' => out.write_str("\\\"")?,
            '\0' => out.write_str("\\x00")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

// head(a, b, c). With more than max_children children: the first max_children, the count of omitted ones, and the last one.
fn write_expression<W: Write>(out: &mut W, val: &ExprVal, cx: &mut DecodeContext, depth: usize, opts: &RenderOptions) -> fmt::Result {
    if depth == 0 {
        return out.write_str("...");
    }
    let head = val.child_at(0, cx);
    let length = val.child_count(cx);
    write_value(out, &head, cx, depth - 1, opts)?;
    if opts.debug_marker && !val.debug_metadata(cx).is_absent_or_null() {
        out.write_str(DEBUG_INFO_MARKER)?;
    }
    out.write_char('(')?;
    if length > 0 {
        let shown = if length > opts.max_children { opts.max_children } else { length - 1 };
        for i in 1..=shown {
            write_value(out, &val.child_at(i, cx), cx, depth - 1, opts)?;
            out.write_str(", ")?;
        }
        if length > opts.max_children {
            write!(out, "...{} more...", length - opts.max_children)?;
        }
        write_value(out, &val.child_at(length, cx), cx, depth - 1, opts)?;
    }
    out.write_char(')')
}

// Language`SourceLocation(file, Range(start, end)), where start and end are either line numbers or {line, column}.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub start: String,
    pub end: String,
}

impl SourceLocation {
    pub fn decode(val: &ExprVal, cx: &mut DecodeContext) -> Option<Self> {
        if !val.is_expression() || val.child_count(cx) != 2 {
            return None;
        }
        let file = val.child_at(1, cx);
        if !file.is_string() {
            return None;
        }
        let file = file.string_data(cx)?;
        let range = val.child_at(2, cx);
        if !range.is_expression() || range.child_count(cx) != 2 {
            return None;
        }
        let start = Self::position(&range.child_at(1, cx), cx)?;
        let end = Self::position(&range.child_at(2, cx), cx)?;
        Some(SourceLocation {file: String::from_utf16_lossy(&file), start, end})
    }

    fn position(val: &ExprVal, cx: &mut DecodeContext) -> Option<String> {
        if let Some(line) = val.integer_value() {
            return Some(format!("{}", line));
        }
        if val.is_expression() && val.child_count(cx) == 2 {
            let line = val.child_at(1, cx).integer_value()?;
            let column = val.child_at(2, cx).integer_value()?;
            return Some(format!("{}:{}", line, column));
        }
        None
    }

    pub fn basename(&self) -> &str {
        match self.file.rfind(|c| c == '/' || c == '\\') {
            Some(i) => &self.file[i + 1..],
            None => &self.file,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}..{})", self.basename(), self.start, self.end)
    }
}

// For "debug info" lines: the source location if it looks like one, otherwise whatever the value is.
pub fn format_debug_metadata(val: &ExprVal, cx: &mut DecodeContext) -> String {
    match SourceLocation::decode(val, cx) {
        Some(loc) => loc.to_string(),
        None => render(val, cx, 2, 10),
    }
}

#[cfg(test)]
mod tests {
    use crate::{render::*, layout::*, value::*, testimage::*};

    fn render_bits(image: &TestImage, bits: u64, depth: usize, children: usize) -> String {
        let mut cx = image.context();
        let v = ExprVal::decode(bits, &mut cx);
        render(&v, &mut cx, depth, children)
    }

    #[test]
    fn scalars() {
        let image = TestImage::new();
        assert_eq!(render_bits(&image, tagged_int32(3), 1, 10), "3");
        assert_eq!(render_bits(&image, tagged_int32(-42), 1, 10), "-42");
        assert_eq!(render_bits(&image, tagged_double(1.5), 1, 10), "1.5");
        assert_eq!(render_bits(&image, tagged_double(2.0), 1, 10), "2.0");
        assert_eq!(render_bits(&image, tagged_ministr(&[]).unwrap(), 1, 10), "\"\"");
        assert_eq!(render_bits(&image, tagged_ministr(&['"' as u16, 0]).unwrap(), 1, 10), "\"\\\"\\x00\"");
        assert_eq!(render_bits(&image, tagged_pointer(0), 1, 10), "/\\/");
        assert_eq!(render_bits(&image, tagged_pointer(0xbad000), 1, 10), "[? 0xbad000 ?]");
        assert_eq!(render_bits(&image, tagged_magic(7), 1, 10), "[magic 7]");
        assert_eq!(render_bits(&image, make_tagged(TAGMASK_NONDOUBLE | 0x9_0000, 5), 1, 10), "[tag 0x7ff90000: 5]");

        let mut cx = image.context();
        assert_eq!(render(&ExprVal::absent(), &mut cx, 1, 10), "??");
    }

    #[test]
    fn strings_and_symbols() {
        let mut image = TestImage::new();
        let s = image.string("a\\b\"c");
        let plus = image.symbol("System`Plus");
        let foo = image.symbol("MyContext`Foo");
        let private = image.symbol("System`Private`x");
        assert_eq!(render_bits(&image, s, 1, 10), "\"a\\\\b\\\"c\"");
        assert_eq!(render_bits(&image, plus, 1, 10), "Plus");
        assert_eq!(render_bits(&image, foo, 1, 10), "MyContext`Foo");
        assert_eq!(render_bits(&image, private, 1, 10), "System`Private`x");

        let corrupt = image.string("xyz");
        let off = image.layout.string_length;
        image.put_i32(address_of(corrupt) + off, 100);
        assert_eq!(render_bits(&image, corrupt, 1, 10), "\"\"");
    }

    #[test]
    fn expressions() {
        let mut image = TestImage::new();
        let f = image.symbol("f");
        let e = image.expr(f, &[tagged_int32(1), tagged_int32(2), tagged_int32(3)]);
        assert_eq!(render_bits(&image, e, 1, 2), "f(1, 2, ...1 more...3)");
        assert_eq!(render_bits(&image, e, 1, 3), "f(1, 2, 3)");
        assert_eq!(render_bits(&image, e, 1, 10), "f(1, 2, 3)");
        assert_eq!(render_bits(&image, e, 1, 0), "f(...3 more...3)");
        assert_eq!(render_bits(&image, e, 0, 10), "...");

        let empty = image.expr(f, &[]);
        assert_eq!(render_bits(&image, empty, 1, 10), "f()");

        // Nested: inner expressions need depth too, and so do heads.
        let g = image.symbol("System`List");
        let inner = image.expr(g, &[e]);
        assert_eq!(render_bits(&image, inner, 1, 10), "List(...)");
        assert_eq!(render_bits(&image, inner, 2, 10), "List(f(1, 2, 3))");
        let curried = image.expr(e, &[tagged_int32(4)]);
        assert_eq!(render_bits(&image, curried, 1, 10), "...(4)");
        assert_eq!(render_bits(&image, curried, 2, 10), "f(1, 2, 3)(4)");

        let long_items: Vec<u64> = (1..=100).map(tagged_int32).collect();
        let long = image.expr(f, &long_items);
        assert_eq!(render_bits(&image, long, 1, 3), "f(1, 2, 3, ...97 more...100)");
    }

    #[test]
    fn zero_depth_never_reads_children() {
        let mut image = TestImage::new();
        for _ in 0..200 {
            let n = rand::random::<usize>() % 5;
            let items: Vec<u64> = (0..n).map(|_| tagged_int32(rand::random())).collect();
            let e = image.expr(tagged_pointer(0xdead_0000), &items);
            let k = rand::random::<usize>() % 6;
            assert_eq!(render_bits(&image, e, 0, k), "...");
            let s = render_bits(&image, e, 1, k);
            assert!(s.starts_with("[? 0xdead0000 ?]("), "{}", s);
            let commas = s.matches(", ").count();
            assert_eq!(commas, if n > k { k } else { n.saturating_sub(1) }, "{}", s);
            assert_eq!(s.contains("more..."), n > k, "{}", s);
        }
    }

    #[test]
    fn cyclic_expression_terminates() {
        let mut image = TestImage::new();
        let f = image.symbol("f");
        let e = image.expr(f, &[tagged_int32(1), tagged_int32(2)]);
        // Make it its own first child.
        let off = image.layout.expr_items + 8;
        image.put_u64(address_of(e) + off, e);
        assert_eq!(render_bits(&image, e, 3, 10), "f(f(f(..., 2), 2), 2)");
    }

    #[test]
    fn other_heap_objects() {
        let mut image = TestImage::new();
        let a = image.packed_array(PACKED_DOUBLE, &[2, 3]);
        let b = image.packed_array(PACKED_INT32, &[5]);
        let c = image.packed_array(9, &[1]);
        let custom = image.custom(0x1000, 0x2000);
        let q = image.quotient(tagged_int32(1), tagged_int32(2));
        let unknown = image.raw_object(17);
        let freed = image.custom(0x1000, 0x2000);
        image.set_refcount(address_of(freed), 0);
        assert_eq!(render_bits(&image, a, 1, 10), "PackedArray(Real, <<2,3>>)");
        assert_eq!(render_bits(&image, b, 1, 10), "PackedArray(Integer, <<5>>)");
        assert_eq!(render_bits(&image, c, 1, 10), "PackedArray(Undefined, <<1>>)");
        assert_eq!(render_bits(&image, custom, 1, 10), "[custom 0x1000 for 0x2000]");
        assert_eq!(render_bits(&image, q, 1, 10), format!("[quotient at 0x{:x}]", address_of(q)));
        assert_eq!(render_bits(&image, unknown, 1, 10), format!("[type 17 at 0x{:x}]", address_of(unknown)));
        assert_eq!(render_bits(&image, freed, 1, 10), format!("[custom at 0x{:x}]", address_of(freed)));
    }

    #[test]
    fn debug_marker() {
        let mut image = TestImage::new();
        let f = image.symbol("f");
        let e = image.expr(f, &[tagged_int32(1)]);
        let meta = image.string("x.pmath");
        image.set_debug_metadata(e, meta);
        let mut cx = image.context();
        let v = ExprVal::decode(e, &mut cx);
        let opts = RenderOptions {max_depth: 1, max_children: 10, debug_marker: true};
        assert_eq!(render_with(&v, &mut cx, &opts), "f`dbg`(1)");
        assert_eq!(render(&v, &mut cx, 1, 10), "f(1)");
    }

    #[test]
    fn source_locations() {
        let mut image = TestImage::new();
        let head = image.symbol("Language`SourceLocation");
        let range_head = image.symbol("System`Range");
        let list = image.symbol("System`List");
        let file = image.string("/home/user/src/init.pmath");
        let range = image.expr(range_head, &[tagged_int32(10), tagged_int32(12)]);
        let loc = image.expr(head, &[file, range]);

        let start = image.expr(list, &[tagged_int32(3), tagged_int32(5)]);
        let end = image.expr(list, &[tagged_int32(4), tagged_int32(1)]);
        let range2 = image.expr(range_head, &[start, end]);
        let file2 = image.string("C:\\lib\\util.pmath");
        let loc2 = image.expr(head, &[file2, range2]);

        let not_loc = image.expr(head, &[tagged_int32(1), range]);
        let mut cx = image.context();

        let v = ExprVal::decode(loc, &mut cx);
        let l = SourceLocation::decode(&v, &mut cx).unwrap();
        assert_eq!(l.basename(), "init.pmath");
        assert_eq!(l.to_string(), "init.pmath (10..12)");

        let v = ExprVal::decode(loc2, &mut cx);
        assert_eq!(format_debug_metadata(&v, &mut cx), "util.pmath (3:5..4:1)");

        let v = ExprVal::decode(not_loc, &mut cx);
        assert_eq!(SourceLocation::decode(&v, &mut cx), None);
        assert_eq!(format_debug_metadata(&v, &mut cx), "Language`SourceLocation(1, Range(10, 12))");
    }

    #[test]
    fn cyclic_expression_with_huge_depth() {
        let mut image = TestImage::new();
        let f = image.symbol("f");
        let e = image.expr(f, &[tagged_pointer(0), tagged_int32(2)]);
        let first_item = address_of(e) + image.layout.expr_items + 8;
        image.put_u64(first_item, e);

        let expected = format!("{}...{}", "f(".repeat(MAX_RENDER_DEPTH), ", 2)".repeat(MAX_RENDER_DEPTH));
        assert_eq!(render_bits(&image, e, usize::MAX, 10), expected);
        assert_eq!(render_bits(&image, e, 1_000_000, usize::MAX), expected);
        assert_eq!(render_bits(&image, e, 2, 10), "f(f(..., 2), 2)");
    }
}
