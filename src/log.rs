use std::{collections::VecDeque, time::Instant};

// Lines worth showing to the person at the debugger prompt, but not worth interrupting command output for.
// E.g. "set depth x" with a non-numeric argument is ignored, and the reason ends up here. Shown by the `log` command.
// Developer-facing warnings (corrupt object headers etc) go to stderr instead, see util::Limiter.
pub struct Log {
    pub lines: VecDeque<String>,
}

const MAX_LINES: usize = 100;

impl Log {
    pub fn new() -> Log {
        Log {lines: VecDeque::new()}
    }

    pub fn add_line(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > MAX_LINES {
            self.lines.pop_front();
        }
    }
}

#[macro_export]
macro_rules! log {
    ($log:expr, $($arg:tt)*) => (
        ($log).add_line(format!($($arg)*))
    );
}

// Reports to stderr on drop if the scope took at least threshold_secs. Reading a big stack over process_vm_readv of a
// stopped process can be surprisingly slow, and it's useful to know when that's what made the prompt hang.
pub struct ProfileScope {
    name: String,
    start: Instant,
    threshold_secs: f64,
}

impl ProfileScope {
    pub fn with_threshold(secs: f64, name: String) -> Self {
        ProfileScope {start: Instant::now(), name, threshold_secs: secs}
    }

    pub fn elapsed_secs(&self) -> f64 { self.start.elapsed().as_secs_f64() }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let secs = self.elapsed_secs();
        if secs >= self.threshold_secs {
            eprintln!("info: {} took {:.3}s", self.name, secs);
        }
    }
}
