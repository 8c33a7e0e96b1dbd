pub struct Settings {
    // Budgets for the one-line summaries shown by pretty-printers. `set depth` / `set maxlen`.
    pub max_depth: usize,
    pub max_children: usize,
    // `print` renders with max_depth * print_scale and max_children * print_scale.
    pub print_scale: usize,
    // Default frame count for `backtrace` without an argument. Also the hard bound against cyclic frame lists.
    pub backtrace_frames: usize,
    // Emit a marker after the head of expressions that carry debug metadata. `set debugmarker on|off`.
    pub debug_marker: bool,
    // Report backtraces slower than this to stderr.
    pub slow_walk_secs: f64,
}

impl Default for Settings {
    fn default() -> Self { Settings {
        max_depth: 1,
        max_children: 10,
        print_scale: 2,
        backtrace_frames: 20,
        debug_marker: false,
        slow_walk_secs: 0.5,
    } }
}
