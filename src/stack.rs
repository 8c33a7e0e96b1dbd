// The interpreter's own call stack. Each interpreter thread has a singly linked list of stack_info records, pushed by the evaluator
// on entry into a function body and popped on exit; the thread record also links to the thread that spawned it.
// We walk that list, and pair each record with the native frame whose local variable holds it.

use std::fmt::Write;
use crate::{*, error::*, log::*, render::*, value::*};

// Guards against a cycle in the parent-thread chain. Real nesting is a handful of levels.
const MAX_THREAD_HOPS: usize = 64;

// What the host debugger knows about one native frame. Innermost first.
#[derive(Clone, Debug, Default)]
pub struct NativeFrame {
    pub function: String,
    // Address of the evaluator's local stack_info record in this frame, if the frame has one.
    pub managed_frame_var: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameLocation {
    Source(SourceLocation),
    // Debug metadata that isn't a source location, rendered.
    Other(String),
}

pub struct ManagedFrame {
    pub thread: usize,
    pub record: usize,
    pub head: ExprVal,
    pub head_text: String,
    pub location: Option<FrameLocation>,
    // Index into the native frames passed to walk().
    pub native_frame: Option<usize>,
}

pub struct ManagedStack {
    pub frames: Vec<ManagedFrame>,
    pub truncated: Option<Error>, // if walking stopped before reaching the bottom of the outermost thread
}
impl Default for ManagedStack { fn default() -> Self { ManagedStack {frames: Vec::new(), truncated: None} } }
impl ManagedStack {
    pub fn error(e: Error) -> Self { Self {frames: Vec::new(), truncated: Some(e)} }
}

pub fn walk(cx: &mut DecodeContext, thread: usize, max_frames: usize, native: &[NativeFrame]) -> ManagedStack {
    let mut thread = thread;
    let mut record = match cx.memory.peek::<usize>(thread + cx.layout.thread_stack_info) {
        Some(r) => r,
        None => return ManagedStack::error(error!(ProcessState, "thread record at 0x{:x} is unreadable", thread)),
    };
    let mut stack = ManagedStack::default();
    let mut hops = 0usize;
    loop {
        if record == 0 {
            // This thread's chain is exhausted. Continue in the parent's.
            let parent = match cx.memory.peek::<usize>(thread + cx.layout.thread_parent) {
                Some(p) if p != 0 => p,
                _ => break,
            };
            hops += 1;
            if hops > MAX_THREAD_HOPS {
                stack.truncated = Some(error!(Sanity, "more than {} nested threads", MAX_THREAD_HOPS));
                break;
            }
            record = match cx.memory.peek::<usize>(parent + cx.layout.thread_stack_info) {
                Some(r) => r,
                None => {
                    stack.truncated = Some(error!(ProcessState, "parent thread record at 0x{:x} is unreadable", parent));
                    break;
                }
            };
            thread = parent;
            continue;
        }
        if stack.frames.len() >= max_frames {
            stack.truncated = Some(error!(Sanity, "stopped after {} frames", max_frames));
            break;
        }

        if !cx.memory.probe(record + cx.layout.stack_info_head) {
            // Garbage link. Treat this thread's chain as exhausted.
            if cx.limiter.check(line!()) { eprintln!("warning: unreadable stack_info record at 0x{:x} in thread 0x{:x}", record, thread); }
            record = 0;
            continue;
        }

        let head = ExprVal::read_at(record + cx.layout.stack_info_head, cx);
        let head_text = render(&head, cx, 1, 10);
        let metadata = ExprVal::read_at(record + cx.layout.stack_info_debug_metadata, cx);
        let location = if metadata.is_absent_or_null() {
            None
        } else {
            Some(match SourceLocation::decode(&metadata, cx) {
                Some(loc) => FrameLocation::Source(loc),
                None => FrameLocation::Other(render(&metadata, cx, 2, 10)),
            })
        };
        let native_frame = native.iter().position(|f| f.managed_frame_var == Some(record));
        stack.frames.push(ManagedFrame {thread, record, head, head_text, location, native_frame});

        record = match cx.memory.peek::<usize>(record + cx.layout.stack_info_next) {
            Some(r) => r,
            None => {
                if cx.limiter.check(line!()) { eprintln!("warning: unreadable stack_info link at 0x{:x}", record); }
                0
            }
        };
    }
    stack
}

// `#3 thread 0x7f0012340000 in Plus [from init.pmath [line 10..12]] (native #5 eval_expr)`
pub fn format_frame(idx: usize, frame: &ManagedFrame, native: &[NativeFrame]) -> String {
    let mut s = format!("#{} thread 0x{:x} in {}", idx, frame.thread, frame.head_text);
    match &frame.location {
        Some(FrameLocation::Source(loc)) => { let _ = write!(s, " from {} line {}..{}", loc.basename(), loc.start, loc.end); }
        Some(FrameLocation::Other(text)) => { let _ = write!(s, " from {}", text); }
        None => (),
    }
    if let Some(i) = frame.native_frame {
        let _ = write!(s, " (native #{} {})", i, native[i].function);
    }
    s
}

// Walks and formats, one line per frame. Reasons for stopping early go to the log.
pub fn backtrace(cx: &mut DecodeContext, thread: usize, max_frames: usize, native: &[NativeFrame], log: &mut Log, slow_secs: f64) -> Vec<String> {
    let _profile = ProfileScope::with_threshold(slow_secs, format!("backtrace of thread 0x{:x}", thread));
    let stack = walk(cx, thread, max_frames, native);
    if let Some(e) = &stack.truncated {
        log!(log, "backtrace: {}", e);
    }
    stack.frames.iter().enumerate().map(|(i, f)| format_frame(i, f, native)).collect()
}

#[cfg(test)]
mod tests {
    use crate::{stack::*, layout::*, testimage::*, log::*};

    fn heads(stack: &ManagedStack) -> Vec<&str> { stack.frames.iter().map(|f| f.head_text.as_str()).collect() }

    #[test]
    fn walks_one_thread() {
        let mut image = TestImage::new();
        let t = image.thread(0);
        let f = image.symbol("System`Plus");
        let g = image.symbol("g");
        let e = image.expr(g, &[tagged_int32(1)]);
        image.push_frame(t, f, tagged_pointer(0));
        image.push_frame(t, e, tagged_pointer(0));
        let mut cx = image.context();

        let s = walk(&mut cx, t, 20, &[]);
        assert_eq!(heads(&s), vec!["g(1)", "Plus"]);
        assert!(s.truncated.is_none());
        assert!(s.frames.iter().all(|f| f.thread == t && f.native_frame.is_none() && f.location.is_none()));

        let s = walk(&mut cx, t, 1, &[]);
        assert_eq!(heads(&s), vec!["g(1)"]);
        assert!(s.truncated.is_some());
    }

    #[test]
    fn empty_and_unreadable() {
        let mut image = TestImage::new();
        let t = image.thread(0);
        let mut cx = image.context();
        let s = walk(&mut cx, t, 20, &[]);
        assert!(s.frames.is_empty() && s.truncated.is_none());

        let s = walk(&mut cx, 0xdead_0000, 20, &[]);
        assert!(s.frames.is_empty());
        assert!(s.truncated.unwrap().is_process_state());
    }

    #[test]
    fn continues_in_parent_thread() {
        let mut image = TestImage::new();
        let parent = image.thread(0);
        let child = image.thread(parent);
        let a = image.symbol("a");
        let b = image.symbol("b");
        let c = image.symbol("c");
        image.push_frame(parent, a, tagged_pointer(0));
        image.push_frame(parent, b, tagged_pointer(0));
        image.push_frame(child, c, tagged_pointer(0));
        let mut cx = image.context();

        let s = walk(&mut cx, child, 20, &[]);
        assert_eq!(heads(&s), vec!["c", "b", "a"]);
        assert_eq!(s.frames.iter().map(|f| f.thread).collect::<Vec<_>>(), vec![child, parent, parent]);
    }

    #[test]
    fn unreadable_link_moves_to_parent() {
        let mut image = TestImage::new();
        let parent = image.thread(0);
        let child = image.thread(parent);
        let a = image.symbol("a");
        let c = image.symbol("c");
        image.push_frame(parent, a, tagged_pointer(0));
        let r = image.push_frame(child, c, tagged_pointer(0));
        let next_off = image.layout.stack_info_next;
        image.put_u64(r + next_off, 0xdead_0000);
        let mut cx = image.context();

        let s = walk(&mut cx, child, 20, &[]);
        assert_eq!(heads(&s), vec!["c", "a"]);
        assert!(s.truncated.is_none());
    }

    #[test]
    fn cyclic_lists_are_bounded() {
        let mut image = TestImage::new();
        let t = image.thread(0);
        let f = image.symbol("f");
        let r1 = image.push_frame(t, f, tagged_pointer(0));
        let r2 = image.push_frame(t, f, tagged_pointer(0));
        let next_off = image.layout.stack_info_next;
        image.put_u64(r1 + next_off, r2 as u64);
        let mut cx = image.context();
        for n in [0, 1, 5, 20, 100] {
            let s = walk(&mut cx, t, n, &[]);
            assert_eq!(s.frames.len(), n);
        }

        // Thread that is its own parent, with an empty stack.
        let mut image = TestImage::new();
        let t = image.thread(0);
        let off = image.layout.thread_parent;
        image.put_u64(t + off, t as u64);
        let mut cx = image.context();
        let s = walk(&mut cx, t, 20, &[]);
        assert!(s.frames.is_empty());
        assert!(s.truncated.is_some());
    }

    #[test]
    fn native_pairing_and_locations() {
        let mut image = TestImage::new();
        let t = image.thread(0);
        let f = image.symbol("f");
        let g = image.symbol("g");
        let sl = image.symbol("Language`SourceLocation");
        let range_head = image.symbol("Range");
        let file = image.string("/src/init.pmath");
        let range = image.expr(range_head, &[tagged_int32(10), tagged_int32(12)]);
        let loc = image.expr(sl, &[file, range]);
        let other = image.string("generated");
        let r1 = image.push_frame(t, f, loc);
        let r2 = image.push_frame(t, g, other);
        let mut cx = image.context();

        let native = vec![
            NativeFrame {function: "pmath_evaluate".to_string(), managed_frame_var: None},
            NativeFrame {function: "evaluate_expression".to_string(), managed_frame_var: Some(r2)},
            NativeFrame {function: "evaluate_expression".to_string(), managed_frame_var: Some(r1)},
            NativeFrame {function: "main".to_string(), managed_frame_var: None},
        ];
        let s = walk(&mut cx, t, 20, &native);
        assert_eq!(s.frames[0].native_frame, Some(1));
        assert_eq!(s.frames[1].native_frame, Some(2));

        let mut log = Log::new();
        let lines = backtrace(&mut cx, t, 20, &native, &mut log, 10.0);
        assert_eq!(lines, vec![
            format!("#0 thread 0x{:x} in g from \"generated\" (native #1 evaluate_expression)", t),
            format!("#1 thread 0x{:x} in f from init.pmath line 10..12 (native #2 evaluate_expression)", t),
        ]);
        assert!(log.lines.is_empty());

        let lines = backtrace(&mut cx, t, 1, &[], &mut log, 10.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(log.lines.len(), 1);
    }
}
