#![allow(dead_code)]
#![allow(unused_variables)]
#![allow(unused_imports)]
use pmath_dbg::{*, error::*, commands::*, layout::*, procfs::*, settings::*, util::*, value::*};
use std::{io, io::BufRead, io::Write, process, str::FromStr, sync::Arc};
use libc::{self, pid_t};

fn usage(arg0: &str) -> ! {
    eprintln!("usage: {} (-p pid | --core path) [--thread addr] [--depth n] [--maxlen n]", arg0);
    process::exit(1);
}

fn main() {
    let mut settings = Settings::default();
    let mut attach_pid: Option<pid_t> = None;
    let mut core_path: Option<String> = None;
    let mut thread: Option<usize> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1usize;
    while i < args.len() {
        let value = args.get(i+1);
        match &args[i][..] {
            "-p" => {
                attach_pid = value.map_or(None, |s| pid_t::from_str(s).ok());
                if attach_pid.is_none() {
                    eprintln!("-p requires a pid");
                    process::exit(1);
                }
            }
            "--core" => {
                core_path = value.cloned();
                if core_path.is_none() {
                    eprintln!("--core requires a path");
                    process::exit(1);
                }
            }
            // Address of the interpreter thread record whose stack `backtrace` shows. Without a symbol-aware host we can't find it ourselves.
            "--thread" => {
                thread = value.map_or(None, |s| parse_number(s)).map(|x| x as usize);
                if thread.is_none() {
                    eprintln!("--thread requires an address");
                    process::exit(1);
                }
            }
            "--depth" | "--maxlen" => {
                let n = match value.map_or(None, |s| parse_number(s)) {
                    Some(n) => n as usize,
                    None => {
                        eprintln!("{} requires a number", args[i]);
                        process::exit(1);
                    }
                };
                if args[i] == "--depth" {
                    settings.max_depth = n;
                } else {
                    settings.max_children = n;
                }
            }
            x => {
                eprintln!("unrecognized argument: '{}'", x);
                usage(&args[0]);
            }
        }
        i += 2;
    }
    if attach_pid.is_some() == core_path.is_some() {
        usage(&args[0]);
    }

    match run(settings, attach_pid, core_path, thread) {
        Ok(()) => (),
        Err(e) => {
            eprintln!("fatal: {}", e);
            process::exit(1);
        }
    }
}

fn open_memory(attach_pid: Option<pid_t>, core_path: Option<String>) -> Result<MemReader> {
    if let Some(pid) = attach_pid {
        // Only checks that the process exists. Reads fail later with EPERM if we're not allowed to ptrace it.
        let r = unsafe {libc::kill(pid, 0)};
        if r != 0 {
            return errno_err!("can't access process {}", pid);
        }
        return Ok(MemReader::Pid(PidMemReader::new(pid)));
    }
    match core_path {
        Some(path) => Ok(MemReader::CoreDump(Arc::new(CoreDumpMemReader::open(&path)?))),
        None => err!(Usage, "nothing to inspect"),
    }
}

fn run(settings: Settings, attach_pid: Option<pid_t>, core_path: Option<String>, thread: Option<usize>) -> Result<()> {
    let memory = open_memory(attach_pid, core_path)?;
    memory.check_valid()?;
    let mut session = Session::new(settings, DecodeContext::new(memory, ObjectLayout::default()));
    let mut host = StandaloneHost {thread};

    let interactive = unsafe {libc::isatty(libc::STDIN_FILENO)} != 0;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        if interactive {
            write!(stdout, "({}) ", PREFIX)?;
            stdout.flush()?;
        }
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let command = line.trim();
        if command == "quit" || command == "q" {
            break;
        }
        match session.execute(command, &mut host) {
            Ok(out) => for l in out {
                writeln!(stdout, "{}", l)?;
            }
            Err(e) => writeln!(stdout, "error: {}", e)?,
        }
    }
    Ok(())
}
