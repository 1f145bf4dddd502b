//! Runtime configuration: the `Config` struct threaded through every
//! constructor, and the parser for the optional configuration file.
//!
//! The file format is line oriented. Tokens are keywords, integers
//! (decimal, `0` octal, `0x` hex), `=`, `,` and double-quoted strings
//! with `\\`, `\"` and `\'` escapes; `#` starts a comment.

use std::path::{Path, PathBuf};

use bitflags::bitflags;

use crate::charset::{BuiltinSet, Charset};
use crate::error::{CpmError, CpmResult};

/// Log verbosity, lowest to highest. Each level includes the previous
/// ones; the mapping to the `log` facade is in `logger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Errors only.
    Errors = 0,
    /// Plus instruction counters on termination.
    Counters = 1,
    /// Plus FDOS call trace.
    Fdos = 2,
    /// Plus FCB dumps.
    Fcbs = 3,
    /// Plus record dumps and all OS-call entries/exits.
    Syscall = 4,
}

impl LogLevel {
    pub fn from_number(n: u32) -> Option<Self> {
        match n {
            0 => Some(Self::Errors),
            1 => Some(Self::Counters),
            2 => Some(Self::Fdos),
            3 => Some(Self::Fcbs),
            4 => Some(Self::Syscall),
            _ => None,
        }
    }

    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Errors => log::LevelFilter::Error,
            Self::Counters => log::LevelFilter::Warn,
            Self::Fdos => log::LevelFilter::Info,
            Self::Fcbs => log::LevelFilter::Debug,
            Self::Syscall => log::LevelFilter::Trace,
        }
    }
}

/// A printer/punch/reader binding.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub path: PathBuf,
    /// Raw byte mode; text mode translates through the character set
    /// and normalizes line endings.
    pub raw: bool,
}

/// What to do with the final VT52 screen before restoring the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenDelay {
    None,
    Seconds(u32),
    WaitKey,
}

bitflags! {
    /// When to write a machine-state dump to the log.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DumpFlags: u8 {
        const STARTUP = 0x01;
        const EXIT = 0x02;
        const ERROR = 0x04;
        const SIGNAL = 0x08;
    }
}

/// Post-run memory save (`-e` option).
#[derive(Debug, Clone)]
pub struct SaveConfig {
    pub path: PathBuf,
    pub start: u16,
    pub end: u16,
    /// Intel-HEX instead of raw bytes.
    pub hex: bool,
}

/// Per-N-instructions artificial slowdown.
#[derive(Debug, Clone, Copy)]
pub struct CpuDelay {
    pub count: u64,
    pub nanos: u64,
}

/// Everything the emulator needs to know, resolved from the command
/// line and the configuration file.
pub struct Config {
    /// CP/M command: host path (contains `/`) or `drive:name`.
    pub command: String,
    /// Arguments spliced into the guest command tail.
    pub args: Vec<String>,

    /// Host directory per drive A:..P:.
    pub drives: [Option<PathBuf>; 16],
    /// Configured read-only bits, parallel to `drives`.
    pub readonly: [bool; 16],
    pub default_drive: usize,

    /// Full-screen VT52 console instead of the line console.
    pub interactive: bool,
    pub lines: u16,
    pub cols: u16,

    pub primary: Charset,
    pub alternate: Charset,
    /// Select the alternate set for this run.
    pub use_alt_charset: bool,

    pub printer: Option<DeviceConfig>,
    pub punch: Option<DeviceConfig>,
    pub reader: Option<DeviceConfig>,

    pub log_file: Option<PathBuf>,
    pub log_level: LogLevel,

    /// Keep files open across BDOS close (for programs that keep using
    /// the FCB afterwards).
    pub dont_close: bool,
    /// Swap the backspace and delete keys on input.
    pub reverse_bs_del: bool,
    /// WordStar control keys instead of VT52 cursor sequences.
    pub altkeys: bool,
    /// Application cursor-key mode reporting.
    pub app_cursor: bool,
    pub screen_delay: ScreenDelay,

    pub cpu_delay: Option<CpuDelay>,
    pub dump: DumpFlags,
    pub save: Option<SaveConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            drives: Default::default(),
            readonly: [false; 16],
            default_drive: 0,
            interactive: false,
            lines: 24,
            cols: 80,
            primary: Charset::builtin(BuiltinSet::Vt52),
            alternate: Charset::builtin(BuiltinSet::Vt52),
            use_alt_charset: false,
            printer: None,
            punch: None,
            reader: None,
            log_file: None,
            log_level: LogLevel::Errors,
            dont_close: false,
            reverse_bs_del: false,
            altkeys: false,
            app_cursor: false,
            screen_delay: ScreenDelay::None,
            cpu_delay: None,
            dump: DumpFlags::empty(),
            save: None,
        }
    }
}

impl Config {
    /// Apply the documented fallbacks. Without any drive definition,
    /// drive A maps to the current directory.
    pub fn finalize(&mut self) {
        if self.drives.iter().all(Option::is_none) {
            self.drives[0] = Some(PathBuf::from("."));
        }
    }

    /// The character set active for this run.
    pub fn active_charset(&self) -> &Charset {
        if self.use_alt_charset {
            &self.alternate
        } else {
            &self.primary
        }
    }

    /// Parse a configuration file into `self` (directives overwrite
    /// defaults; the caller applies command-line overrides afterwards).
    pub fn read_file(&mut self, path: &Path) -> CpmResult<()> {
        let text = std::fs::read_to_string(path).map_err(|e| CpmError::file(path, e))?;
        for (idx, line) in text.lines().enumerate() {
            let ln = idx + 1;
            let toks = tokenize(line).map_err(|msg| config_err(path, ln, msg))?;
            if toks.is_empty() {
                continue;
            }
            self.apply_directive(&toks)
                .map_err(|msg| config_err(path, ln, msg))?;
        }
        Ok(())
    }

    fn apply_directive(&mut self, toks: &[Tok]) -> Result<(), String> {
        let mut t = Cursor::new(toks);
        let mut alt = false;
        let mut word = t.keyword()?;
        if word == "alt" {
            alt = true;
            word = t.keyword()?;
            if word != "charset" && word != "char" {
                return Err("keyword alt unexpected here".into());
            }
        }
        match word.as_str() {
            "charset" => {
                let name = t.keyword()?;
                let set = match name.as_str() {
                    "vt52" => BuiltinSet::Vt52,
                    "ascii" => BuiltinSet::Ascii,
                    "latin1" => BuiltinSet::Latin1,
                    other => return Err(format!("unknown character set {other}")),
                };
                let target = if alt {
                    &mut self.alternate
                } else {
                    &mut self.primary
                };
                *target = Charset::builtin(set);
            }
            "char" => {
                let code = t.number()?;
                if !(0x20..0x100).contains(&code) || code == 0x7F {
                    return Err(format!("character code {code} out of range"));
                }
                t.eq()?;
                let s = t.string()?;
                let target = if alt {
                    &mut self.alternate
                } else {
                    &mut self.primary
                };
                target.set_entry(code as u8, s.chars().next());
            }
            "unprintable" => {
                let s = t.string()?;
                let ch = s.chars().next();
                self.primary.set_unprintable(ch);
                self.alternate.set_unprintable(ch);
            }
            "console" => {
                self.interactive = match t.keyword()?.as_str() {
                    "full" => true,
                    "line" => false,
                    other => return Err(format!("unknown console type {other}")),
                };
            }
            "lines" => self.lines = t.ranged(5, 95)? as u16,
            "columns" => self.cols = t.ranged(20, 95)? as u16,
            "drive" => {
                let letter = t.keyword()?;
                let drive = parse_drive(&letter).ok_or("invalid drive letter")?;
                t.eq()?;
                let mut readonly = false;
                if t.peek_keyword() == Some("readonly") {
                    t.keyword()?;
                    t.comma()?;
                    readonly = true;
                }
                let path = t.string()?;
                self.drives[drive] = Some(PathBuf::from(path));
                self.readonly[drive] = readonly;
            }
            "default" => {
                t.expect_keyword("drive")?;
                t.eq()?;
                let letter = t.keyword()?;
                self.default_drive = parse_drive(&letter).ok_or("invalid drive letter")?;
            }
            "logfile" => {
                t.eq().ok();
                self.log_file = Some(PathBuf::from(t.string()?));
            }
            "loglevel" => {
                t.eq().ok();
                let n = t.number()?;
                self.log_level = LogLevel::from_number(n).ok_or("invalid log level")?;
            }
            "screen" => {
                t.expect_keyword("delay")?;
                t.eq().ok();
                self.screen_delay = if t.peek_keyword() == Some("key") {
                    ScreenDelay::WaitKey
                } else {
                    ScreenDelay::Seconds(t.number()?)
                };
            }
            "application" => {
                t.expect_keyword("cursor")?;
                self.app_cursor = t.optional_bool()?;
            }
            "exchange" => {
                t.expect_keyword("delete")?;
                self.reverse_bs_del = t.optional_bool()?;
            }
            "close" => {
                t.expect_keyword("files")?;
                self.dont_close = !t.optional_bool()?;
            }
            "cpu" => {
                t.expect_keyword("delay")?;
                t.eq().ok();
                let count = t.number()? as u64;
                t.comma()?;
                let nanos = t.number()? as u64;
                self.cpu_delay = Some(CpuDelay { count, nanos });
            }
            "printer" | "punch" | "reader" => {
                let slot = match word.as_str() {
                    "printer" => &mut self.printer,
                    "punch" => &mut self.punch,
                    _ => &mut self.reader,
                };
                match t.keyword()?.as_str() {
                    "file" => {
                        t.eq().ok();
                        let path = PathBuf::from(t.string()?);
                        match slot {
                            Some(dev) => dev.path = path,
                            None => *slot = Some(DeviceConfig { path, raw: false }),
                        }
                    }
                    "mode" => {
                        t.eq().ok();
                        let raw = match t.keyword()?.as_str() {
                            "raw" => true,
                            "text" => false,
                            other => return Err(format!("unknown device mode {other}")),
                        };
                        match slot {
                            Some(dev) => dev.raw = raw,
                            None => {
                                return Err(format!("{word} mode before {word} file"));
                            }
                        }
                    }
                    other => return Err(format!("unknown {word} subkeyword {other}")),
                }
            }
            "dump" => {
                t.eq().ok();
                loop {
                    match t.keyword()?.as_str() {
                        "all" => {
                            self.dump = DumpFlags::STARTUP | DumpFlags::EXIT | DumpFlags::SIGNAL
                        }
                        "none" => self.dump = DumpFlags::empty(),
                        "startup" => self.dump |= DumpFlags::STARTUP,
                        "exit" => self.dump |= DumpFlags::EXIT,
                        "error" => self.dump |= DumpFlags::ERROR,
                        "signal" => self.dump |= DumpFlags::SIGNAL,
                        other => return Err(format!("unknown dump keyword {other}")),
                    }
                    if t.at_end() {
                        break;
                    }
                    t.comma()?;
                }
            }
            other => return Err(format!("unknown keyword {other}")),
        }
        if !t.at_end() {
            return Err("trailing tokens".into());
        }
        Ok(())
    }
}

fn config_err(path: &Path, line: usize, message: String) -> CpmError {
    CpmError::Config {
        path: path.to_path_buf(),
        line,
        message,
    }
}

/// `a`..`p`, optionally with a trailing colon, to a drive index.
pub fn parse_drive(s: &str) -> Option<usize> {
    let s = s.strip_suffix(':').unwrap_or(s);
    let mut chars = s.chars();
    let letter = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    match letter.to_ascii_lowercase() {
        c @ 'a'..='p' => Some(c as usize - 'a' as usize),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Num(u32),
    Str(String),
    Eq,
    Comma,
}

fn tokenize(line: &str) -> Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '#' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                toks.push(Tok::Eq);
            }
            ',' => {
                chars.next();
                toks.push(Tok::Comma);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        None => return Err("unterminated string".into()),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(e @ ('\\' | '"' | '\'')) => s.push(e),
                            _ => return Err("invalid escape".into()),
                        },
                        Some(other) => s.push(other),
                    }
                }
                toks.push(Tok::Str(s));
            }
            '0'..='9' => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = if let Some(hex) = digits.strip_prefix("0x").or(digits.strip_prefix("0X"))
                {
                    u32::from_str_radix(hex, 16)
                } else if digits.len() > 1 && digits.starts_with('0') {
                    u32::from_str_radix(&digits[1..], 8)
                } else {
                    digits.parse()
                }
                .map_err(|_| format!("invalid number {digits}"))?;
                toks.push(Tok::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == ':' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(Tok::Ident(ident.to_lowercase()));
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }
    Ok(toks)
}

struct Cursor<'a> {
    toks: &'a [Tok],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(toks: &'a [Tok]) -> Self {
        Self { toks, pos: 0 }
    }

    fn next(&mut self) -> Option<&'a Tok> {
        let t = self.toks.get(self.pos)?;
        self.pos += 1;
        Some(t)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn keyword(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Tok::Ident(s)) => Ok(s.clone()),
            _ => Err("keyword expected".into()),
        }
    }

    fn peek_keyword(&self) -> Option<&str> {
        match self.toks.get(self.pos) {
            Some(Tok::Ident(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn expect_keyword(&mut self, want: &str) -> Result<(), String> {
        let got = self.keyword()?;
        if got == want {
            Ok(())
        } else {
            Err(format!("keyword {want} expected, got {got}"))
        }
    }

    fn number(&mut self) -> Result<u32, String> {
        match self.next() {
            Some(Tok::Num(n)) => Ok(*n),
            _ => Err("number expected".into()),
        }
    }

    fn ranged(&mut self, min: u32, max: u32) -> Result<u32, String> {
        self.eq().ok();
        let n = self.number()?;
        if (min..=max).contains(&n) {
            Ok(n)
        } else {
            Err(format!("value {n} not in {min}..{max}"))
        }
    }

    fn string(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(s.clone()),
            _ => Err("string expected".into()),
        }
    }

    fn eq(&mut self) -> Result<(), String> {
        match self.toks.get(self.pos) {
            Some(Tok::Eq) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err("= expected".into()),
        }
    }

    fn comma(&mut self) -> Result<(), String> {
        match self.next() {
            Some(Tok::Comma) => Ok(()),
            _ => Err(", expected".into()),
        }
    }

    /// `true`/`false` after a boolean directive; bare directive means true.
    fn optional_bool(&mut self) -> Result<bool, String> {
        self.eq().ok();
        match self.peek_keyword() {
            Some("true") => {
                self.keyword()?;
                Ok(true)
            }
            Some("false") => {
                self.keyword()?;
                Ok(false)
            }
            None if self.at_end() => Ok(true),
            _ => Err("true or false expected".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(text: &str) -> Config {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        let mut path = std::env::temp_dir();
        path.push(format!(
            "cpm80-conf-test-{}-{}.conf",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        drop(f);
        let mut cfg = Config::default();
        let r = cfg.read_file(&path);
        std::fs::remove_file(&path).ok();
        r.unwrap();
        cfg
    }

    #[test]
    fn empty_config_maps_drive_a_to_cwd() {
        let mut cfg = Config::default();
        cfg.finalize();
        assert_eq!(cfg.drives[0].as_deref(), Some(Path::new(".")));
        assert!(!cfg.readonly[0]);
        assert_eq!(cfg.default_drive, 0);
    }

    #[test]
    fn drive_directive() {
        let cfg = parse("drive b = readonly, \"/tmp/cpm\"\ndrive a = \"/home/user\"\n");
        assert_eq!(cfg.drives[1].as_deref(), Some(Path::new("/tmp/cpm")));
        assert!(cfg.readonly[1]);
        assert_eq!(cfg.drives[0].as_deref(), Some(Path::new("/home/user")));
        assert!(!cfg.readonly[0]);
    }

    #[test]
    fn console_and_geometry() {
        let cfg = parse("console full\nlines = 30\ncolumns = 90\n");
        assert!(cfg.interactive);
        assert_eq!(cfg.lines, 30);
        assert_eq!(cfg.cols, 90);
    }

    #[test]
    fn charset_directives() {
        let cfg = parse("charset latin1\nalt charset ascii\nchar 0x80 = \"€\"\n");
        assert_eq!(cfg.primary.from_cpm(0x80), Some('€'));
        assert_eq!(cfg.alternate.from_cpm(0xE4), None);
        assert_eq!(cfg.primary.from_cpm(0xE4), Some('ä'));
    }

    #[test]
    fn devices_and_numbers() {
        let cfg = parse(
            "printer file = \"out.txt\"\nprinter mode = raw\ncpu delay = 1000, 0x200\nloglevel = 3\n",
        );
        let printer = cfg.printer.unwrap();
        assert_eq!(printer.path, Path::new("out.txt"));
        assert!(printer.raw);
        let delay = cfg.cpu_delay.unwrap();
        assert_eq!(delay.count, 1000);
        assert_eq!(delay.nanos, 0x200);
        assert_eq!(cfg.log_level, LogLevel::Fcbs);
    }

    #[test]
    fn booleans_and_dump() {
        let cfg = parse("close files = false\nexchange delete\ndump = startup, error\n");
        assert!(cfg.dont_close);
        assert!(cfg.reverse_bs_del);
        assert_eq!(cfg.dump, DumpFlags::STARTUP | DumpFlags::ERROR);
    }

    #[test]
    fn comments_and_blank_lines() {
        let cfg = parse("# nothing here\n\ndefault drive = c\n");
        assert_eq!(cfg.default_drive, 2);
    }

    #[test]
    fn drive_letters() {
        assert_eq!(parse_drive("a"), Some(0));
        assert_eq!(parse_drive("P:"), Some(15));
        assert_eq!(parse_drive("q"), None);
        assert_eq!(parse_drive("ab"), None);
    }

    #[test]
    fn bad_directive_is_an_error() {
        let mut path = std::env::temp_dir();
        path.push(format!("cpm80-conf-bad-{}.conf", std::process::id()));
        std::fs::write(&path, "drives = nonsense\n").unwrap();
        let mut cfg = Config::default();
        let r = cfg.read_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(r.is_err());
    }
}
