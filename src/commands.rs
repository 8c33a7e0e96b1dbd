// The interactive surface: `backtrace`, `print`, `set ...`, `log`, `help`.
// A Host is whatever debugger we're plugged into; it evaluates expressions in its own language and knows the native stack.

use crate::{*, error::*, log::*, pretty::*, render::*, settings::*, stack::*, util::*, value::*};

pub const PREFIX: &str = "pmath";

const HELP: &[&str] = &[
    "backtrace [count]         interpreter call stack, innermost first (alias: bt)",
    "print <expr>              evaluate <expr> and show it as a pMath value (alias: p)",
    "set depth <n>             nesting depth of pretty-printed values",
    "set maxlen <n>            children shown per expression before eliding",
    "set debugmarker on|off    mark expressions that carry debug metadata",
    "log                       recent messages, e.g. ignored arguments",
    "help                      this text",
];

pub trait Host {
    fn eval(&mut self, expr: &str) -> Result<HostValue>;
    // Address of the current interpreter thread record (the evaluator's thread-local), if any.
    fn current_thread(&mut self) -> Option<usize>;
    // Innermost first.
    fn native_frames(&mut self) -> Vec<NativeFrame>;
}

// Host for the standalone binary: no symbols, no native stack. Expressions are
//   BITS        a pmath_t given by its bits, e.g. 0x7ff2000000000003
//   *ADDR       the pmath_t stored at ADDR
//   TYPE@ADDR   a variable of a printable type at ADDR, e.g. pmath::Expr@0x7ffd1000 or richmath::Array<int>@0x7ffd2000
pub struct StandaloneHost {
    pub thread: Option<usize>,
}

impl Host for StandaloneHost {
    fn eval(&mut self, expr: &str) -> Result<HostValue> {
        let s = expr.trim();
        if let Some((type_name, addr)) = s.rsplit_once('@') {
            let addr = match parse_number(addr) {
                Some(a) => a as usize,
                None => return err!(Usage, "bad address: '{}'", addr.trim()),
            };
            let type_name = type_name.trim();
            if lookup_printer(type_name).is_none() {
                return err!(Usage, "no pretty-printer for type '{}'", type_name);
            }
            return Ok(HostValue::new(type_name, ValueLoc::Addr(addr)));
        }
        if let Some(addr) = s.strip_prefix('*') {
            return match parse_number(addr) {
                Some(a) => Ok(HostValue::new("pmath_t", ValueLoc::Addr(a as usize))),
                None => err!(Usage, "bad address: '{}'", addr.trim()),
            };
        }
        match parse_number(s) {
            Some(bits) => Ok(HostValue::new("pmath_t", ValueLoc::Bits(bits))),
            None => err!(Usage, "can't evaluate '{}' without a debugger; expected BITS, *ADDR or TYPE@ADDR", s),
        }
    }

    fn current_thread(&mut self) -> Option<usize> { self.thread }

    fn native_frames(&mut self) -> Vec<NativeFrame> { Vec::new() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingName {
    Depth,
    MaxLen,
    DebugMarker,
}

// Arguments are kept as typed; numbers are parsed when executing, so that bad ones can be ignored with a log message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Backtrace(Option<String>),
    Print(String),
    Set(SettingName, String),
    Log,
    Help,
    Nothing,
}

pub fn parse_command(line: &str) -> Result<Command> {
    let mut line = line.trim();
    if let Some(rest) = line.strip_prefix(PREFIX) {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            line = rest.trim_start();
        }
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    Ok(match word {
        "" => Command::Nothing,
        "backtrace" | "bt" => Command::Backtrace(rest.split_whitespace().next().map(|s| s.to_string())),
        "print" | "p" => {
            if rest.is_empty() {
                return err!(Usage, "usage: print <expr>");
            }
            Command::Print(rest.to_string())
        }
        "set" => {
            let (what, value) = match rest.split_once(char::is_whitespace) {
                Some((w, v)) => (w, v.trim()),
                None => (rest, ""),
            };
            let name = match what {
                "depth" => SettingName::Depth,
                "maxlen" => SettingName::MaxLen,
                "debugmarker" => SettingName::DebugMarker,
                _ => return err!(Usage, "usage: set depth|maxlen|debugmarker <value>"),
            };
            Command::Set(name, value.to_string())
        }
        "log" => Command::Log,
        "help" | "?" => Command::Help,
        _ => return err!(Usage, "unknown command: '{}' (try 'help')", word),
    })
}

pub struct Session {
    pub settings: Settings,
    pub cx: DecodeContext,
    pub log: Log,
}

impl Session {
    pub fn new(settings: Settings, cx: DecodeContext) -> Self { Self {settings, cx, log: Log::new()} }

    // Returns lines of output.
    pub fn execute(&mut self, line: &str, host: &mut dyn Host) -> Result<Vec<String>> {
        let command = parse_command(line)?;
        // The process may have run since the previous command.
        self.cx.invalidate();
        match command {
            Command::Nothing => Ok(Vec::new()),
            Command::Backtrace(count) => self.backtrace(count, host),
            Command::Print(expr) => self.print(&expr, host),
            Command::Set(name, value) => {
                self.set(name, &value);
                Ok(Vec::new())
            }
            Command::Log => Ok(self.log.lines.iter().cloned().collect()),
            Command::Help => Ok(HELP.iter().map(|s| format!("{} {}", PREFIX, s)).collect()),
        }
    }

    fn backtrace(&mut self, count: Option<String>, host: &mut dyn Host) -> Result<Vec<String>> {
        let mut max_frames = self.settings.backtrace_frames;
        if let Some(c) = count {
            match parse_number(&c) {
                Some(n) => max_frames = n as usize,
                None => log!(self.log, "backtrace: ignoring non-numeric count '{}'", c),
            }
        }
        let thread = match host.current_thread() {
            Some(t) => t,
            None => return err!(ProcessState, "no current interpreter thread"),
        };
        let native = host.native_frames();
        Ok(backtrace(&mut self.cx, thread, max_frames, &native, &mut self.log, self.settings.slow_walk_secs))
    }

    fn print(&mut self, expr: &str, host: &mut dyn Host) -> Result<Vec<String>> {
        let value = host.eval(expr)?;
        let scale = self.settings.print_scale;
        let opts = RenderOptions {max_depth: self.settings.max_depth.saturating_mul(scale), max_children: self.settings.max_children.saturating_mul(scale), debug_marker: self.settings.debug_marker};
        let val = match lookup_printer(&value.type_name) {
            Some(kind @ (PrinterKind::Tagged | PrinterKind::RawPointer | PrinterKind::Wrapper)) => expr_of(&value, kind, &mut self.cx),
            Some(kind) => {
                let printer = Printer {kind, value};
                let mut lines = vec![printer.summary(&mut self.cx, &self.settings)];
                for c in printer.children(&mut self.cx, &ElementLayout::default()) {
                    lines.push(format!("  {} = {}", c.label, self.format_child(&c.value, &opts)));
                }
                return Ok(lines);
            }
            // Not a type we know. Assume it wraps a pmath_t in its first field.
            None => expr_of(&value, PrinterKind::Wrapper, &mut self.cx),
        };
        let mut lines = vec![render_with(&val, &mut self.cx, &opts)];
        let metadata = val.debug_metadata(&mut self.cx);
        if !metadata.is_absent_or_null() {
            lines.push(format!("  debug info = {}", format_debug_metadata(&metadata, &mut self.cx)));
        }
        Ok(lines)
    }

    fn format_child(&mut self, value: &ChildValue, opts: &RenderOptions) -> String {
        match value {
            ChildValue::Text(s) => s.clone(),
            ChildValue::Int(x) => format!("{}", x),
            ChildValue::Pointer(p) | ChildValue::Addr(p) => format!("0x{:x}", p),
            ChildValue::Expr(v) => render_with(v, &mut self.cx, opts),
        }
    }

    fn set(&mut self, name: SettingName, value: &str) {
        match name {
            SettingName::Depth | SettingName::MaxLen => {
                let n = match parse_number(value) {
                    Some(n) => n as usize,
                    None => {
                        log!(self.log, "set: ignoring non-numeric value '{}'", value);
                        return;
                    }
                };
                match name {
                    SettingName::Depth => self.settings.max_depth = n,
                    _ => self.settings.max_children = n,
                }
            }
            SettingName::DebugMarker => match value {
                "on" | "1" | "true" => self.settings.debug_marker = true,
                "off" | "0" | "false" => self.settings.debug_marker = false,
                _ => log!(self.log, "set debugmarker: expected on or off, got '{}'", value),
            }
        }
    }
}
