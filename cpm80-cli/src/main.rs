//! cpm80 - run CP/M-80 2.2 programs on a host terminal.
//!
//! Usage:
//!   cpm80 [options] <command> [args...]
//!
//! Examples:
//!   cpm80 mbasic                     # run mbasic.com from drive A:
//!   cpm80 -s wordstar doc.txt        # full-screen VT52 console
//!   cpm80 b:stat *.com               # drive-relative command
//!   cpm80 -f work.conf dbase         # with a configuration file
//!
//! The exit status is 0 when the program terminated normally (warm
//! boot, BDOS 0 or ^C) and 1 on any fatal error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;

use cpm80_core::config::{CpuDelay, DumpFlags, SaveConfig, ScreenDelay};
use cpm80_core::{logger, Config, Console, Emulator, LineConsole, LogLevel, Vt52Console};

/// Run CP/M-80 2.2 programs
#[derive(Parser, Debug)]
#[command(name = "cpm80", version, about)]
struct Args {
    /// Use the alternate character set
    #[arg(short = 'a')]
    alt_charset: bool,

    /// Force the line-orientated console
    #[arg(short = 'b', conflicts_with = "fullscreen")]
    batch: bool,

    /// Force the full-screen VT52 console
    #[arg(short = 's')]
    fullscreen: bool,

    /// Columns of the VT52 screen (20..95)
    #[arg(short = 'c', value_parser = clap::value_parser!(u16).range(20..=95))]
    columns: Option<u16>,

    /// Lines of the VT52 screen (5..95)
    #[arg(short = 'l', value_parser = clap::value_parser!(u16).range(5..=95))]
    lines: Option<u16>,

    /// Default drive (a..p)
    #[arg(short = 'd')]
    default_drive: Option<String>,

    /// Save memory after a successful run: [hex:]<start>,<end>,<file>
    #[arg(short = 'e')]
    save: Option<String>,

    /// Configuration file
    #[arg(short = 'f')]
    config_file: Option<PathBuf>,

    /// Log level (0 errors .. 4 full call trace)
    #[arg(short = 'v', value_parser = clap::value_parser!(u32).range(0..=4))]
    log_level: Option<u32>,

    /// Do not really close files closed by the program
    #[arg(short = 'n')]
    dont_close: bool,

    /// Exchange the backspace and delete keys
    #[arg(short = 'r')]
    reverse_bs_del: bool,

    /// Seconds to keep the final VT52 screen ('@' waits for a key)
    #[arg(short = 't')]
    screen_delay: Option<String>,

    /// WordStar control keys instead of VT52 cursor sequences
    #[arg(short = 'w')]
    altkeys: bool,

    /// CPU delay: <count>,<nanoseconds> ('n' disables)
    #[arg(short = 'y')]
    cpu_delay: Option<String>,

    /// Machine dumps: any of {a,e,i,n,s,x} for all/error/signal/none/
    /// startup/exit
    #[arg(short = 'z')]
    dump: Option<String>,

    /// CP/M command: host path or [drive:]name
    command: String,

    /// Command tail passed to the program
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn parse_save(spec: &str) -> Result<SaveConfig, String> {
    let (hex, rest) = match spec.strip_prefix("hex:") {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    let mut parts = rest.splitn(3, ',');
    let parse_addr = |s: Option<&str>| -> Result<u16, String> {
        let s = s.ok_or("start, end and file expected")?;
        let parsed = match s.strip_prefix("0x").or(s.strip_prefix("0X")) {
            Some(h) => u16::from_str_radix(h, 16),
            None => s.parse(),
        };
        parsed.map_err(|_| format!("invalid address {s}"))
    };
    let start = parse_addr(parts.next())?;
    let end = parse_addr(parts.next())?;
    let path = parts.next().ok_or("file name expected")?;
    if start > end || path.is_empty() {
        return Err("invalid save range".into());
    }
    Ok(SaveConfig {
        path: PathBuf::from(path),
        start,
        end,
        hex,
    })
}

fn parse_dump(spec: &str) -> Result<DumpFlags, String> {
    let mut flags = DumpFlags::empty();
    let mut none = false;
    let mut all = false;
    for c in spec.chars() {
        match c {
            'a' => all = true,
            'n' => none = true,
            's' => flags |= DumpFlags::STARTUP,
            'x' => flags |= DumpFlags::EXIT,
            'i' => flags |= DumpFlags::SIGNAL,
            'e' => flags |= DumpFlags::ERROR,
            other => return Err(format!("illegal dump suboption '{other}'")),
        }
    }
    if all {
        if !flags.is_empty() || none {
            return Err("inconsistent dump suboptions".into());
        }
        flags = DumpFlags::STARTUP | DumpFlags::EXIT | DumpFlags::SIGNAL;
    }
    if none && !flags.is_empty() {
        return Err("inconsistent dump suboptions".into());
    }
    if flags.contains(DumpFlags::EXIT) && flags.contains(DumpFlags::ERROR) {
        return Err("inconsistent dump suboptions".into());
    }
    Ok(flags)
}

fn build_config(args: &Args) -> Result<Config, String> {
    let mut cfg = Config::default();
    if let Some(path) = &args.config_file {
        cfg.read_file(path).map_err(|e| e.to_string())?;
    }

    // command-line options win over the configuration file
    if args.alt_charset {
        cfg.use_alt_charset = true;
    }
    if args.fullscreen {
        cfg.interactive = true;
    }
    if args.batch {
        cfg.interactive = false;
    }
    if let Some(cols) = args.columns {
        cfg.cols = cols;
    }
    if let Some(lines) = args.lines {
        cfg.lines = lines;
    }
    if let Some(drive) = &args.default_drive {
        cfg.default_drive =
            cpm80_core::config::parse_drive(drive).ok_or("invalid default drive")?;
    }
    if let Some(level) = args.log_level {
        cfg.log_level = LogLevel::from_number(level).ok_or("invalid log level")?;
    }
    if args.dont_close {
        cfg.dont_close = true;
    }
    if args.reverse_bs_del {
        cfg.reverse_bs_del = true;
    }
    if args.altkeys {
        cfg.altkeys = true;
    }
    if let Some(delay) = &args.screen_delay {
        cfg.screen_delay = if delay == "@" {
            ScreenDelay::WaitKey
        } else {
            ScreenDelay::Seconds(delay.parse().map_err(|_| "invalid screen delay")?)
        };
    }
    if let Some(spec) = &args.cpu_delay {
        cfg.cpu_delay = if spec == "n" {
            None
        } else {
            let (count, nanos) = spec.split_once(',').ok_or("invalid cpu delay")?;
            Some(CpuDelay {
                count: count.parse().map_err(|_| "invalid cpu delay count")?,
                nanos: nanos.parse().map_err(|_| "invalid cpu delay time")?,
            })
        };
    }
    if let Some(spec) = &args.dump {
        cfg.dump = parse_dump(spec)?;
    }
    if let Some(spec) = &args.save {
        cfg.save = Some(parse_save(spec)?);
    }

    cfg.command = args.command.clone();
    cfg.args = args.args.clone();
    cfg.finalize();
    Ok(cfg)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let cfg = match build_config(&args) {
        Ok(cfg) => cfg,
        Err(msg) => {
            eprintln!("cpm80: {msg}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logger::init(cfg.log_file.clone(), cfg.log_level) {
        eprintln!("cpm80: {e}");
        return ExitCode::FAILURE;
    }

    let stop = Arc::new(AtomicBool::new(false));
    // the line console notices redirected stdin/stdout by itself
    let console: Box<dyn Console> = if cfg.interactive {
        Box::new(Vt52Console::new(&cfg, stop.clone()))
    } else {
        Box::new(LineConsole::new(
            cfg.active_charset().clone(),
            stop.clone(),
            cfg.reverse_bs_del,
        ))
    };

    // the logger is up from here on; error records reach both the log
    // file and stderr
    let mut emulator = match Emulator::new(&cfg, console, stop) {
        Ok(emulator) => emulator,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = emulator.install_signal_handlers() {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }

    emulator.run();
    match emulator.finish() {
        0 => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}
