//! The BDOS: decode of the function number in register C and the
//! console/system half of the call surface. The file (FDOS) half lives
//! in `fdos`; the FCB view in `fcb`.
//!
//! Calling convention on return: A = L = result byte, B = H = 0;
//! 16-bit results go to HL (and BA).

pub mod fcb;
mod fdos;

pub use fdos::is_nice_filename;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::charset::Charset;
use crate::chario::{InputDevice, OutputDevice};
use crate::clock;
use crate::config::{Config, LogLevel};
use crate::console::Console;
use crate::loader::{ALV, DPB, DRVUSER, DEFAULT_DMA, IOBYTE};
use crate::machine::{Machine, TermReason, MEMORY_SIZE};
use crate::registry::FileRegistry;

/// A directory-search survivor: host name plus size in records.
pub(crate) struct SearchHit {
    pub name: String,
    pub records: u64,
}

/// State of the operating-system emulation outside the CPU.
pub struct Bdos {
    pub console: Box<dyn Console>,
    pub(crate) charset: Charset,
    printer: OutputDevice,
    punch: OutputDevice,
    reader: InputDevice,

    pub(crate) drives: [Option<PathBuf>; 16],
    conf_readonly: [bool; 16],
    default_drive: usize,
    pub(crate) dont_close: bool,
    interactive: bool,
    cols: u16,
    lines: u16,
    log_level: LogLevel,

    pub(crate) current_drive: u8,
    current_user: u8,
    pub(crate) read_only: [bool; 16],
    pub(crate) dma: u16,
    console_col: u16,

    pub(crate) registry: FileRegistry,
    pub(crate) search_list: VecDeque<SearchHit>,

    /// CP/M 3 style program return code (BDOS 108).
    pub return_code: u16,

    /// Shared termination request, observed during sleeps and blocking
    /// reads.
    stop: Arc<AtomicBool>,
}

impl Bdos {
    pub fn new(cfg: &Config, console: Box<dyn Console>, stop: Arc<AtomicBool>) -> Self {
        let mut bdos = Self {
            console,
            charset: cfg.active_charset().clone(),
            printer: OutputDevice::new("printer", cfg.printer.clone()),
            punch: OutputDevice::new("punch", cfg.punch.clone()),
            reader: InputDevice::new("reader", cfg.reader.clone()),
            drives: cfg.drives.clone(),
            conf_readonly: cfg.readonly,
            default_drive: cfg.default_drive,
            dont_close: cfg.dont_close,
            interactive: cfg.interactive,
            cols: cfg.cols,
            lines: cfg.lines,
            log_level: cfg.log_level,
            current_drive: 0,
            current_user: 0,
            read_only: [false; 16],
            dma: DEFAULT_DMA,
            console_col: 0,
            registry: FileRegistry::new(),
            search_list: VecDeque::new(),
            return_code: 0,
            stop,
        };
        bdos.disk_reset_state();
        bdos
    }

    /// Reset the disk subsystem to its configured defaults. Also used
    /// by BDOS 13; unlike real CP/M, the default drive comes from the
    /// configuration, not always A:.
    fn disk_reset_state(&mut self) {
        self.current_drive = self.default_drive as u8;
        self.read_only = self.conf_readonly;
        self.dma = DEFAULT_DMA;
    }

    pub(crate) fn record_dumps(&self) -> bool {
        self.log_level >= LogLevel::Syscall
    }

    pub(crate) fn fcb_dumps(&self) -> bool {
        self.log_level >= LogLevel::Fcbs
    }

    /// Close every resource the guest left open. Called once after the
    /// dispatch loop ends, in reverse order of setup.
    pub fn shutdown(&mut self) {
        self.disk_reset_state();
        self.registry.close_all();
        self.printer.finish();
        self.punch.finish();
        self.reader.finish();
        self.console.finish();
    }

    /// Should a long-running call give up and return?
    pub(crate) fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// BDOS entry: function number in C, argument in DE.
    pub fn dispatch(&mut self, m: &mut Machine) {
        match m.c {
            0 => self.system_reset(m),
            1 => self.console_input(m),
            2 => self.console_output(m),
            3 => self.reader_input(m),
            4 => self.punch_output(m),
            5 => self.list_output(m),
            6 => self.direct_console_io(m),
            7 => self.get_io_byte(m),
            8 => self.set_io_byte(m),
            9 => self.print_string(m),
            10 => self.read_console_buffer(m),
            11 => self.get_console_status(m),
            12 => self.return_version(m),
            13 => self.reset_disk_system(m),
            14 => self.select_disk(m),
            15 => self.open_file(m),
            16 => self.close_file(m),
            17 => self.search_first(m),
            18 => self.search_next(m),
            19 => self.delete_file(m),
            20 => self.read_sequential(m),
            21 => self.write_sequential(m),
            22 => self.make_file(m),
            23 => self.rename_file(m),
            24 => self.login_vector(m),
            25 => self.current_disk(m),
            26 => self.set_dma(m),
            27 => self.get_alloc_addr(m),
            28 => self.write_protect_disk(m),
            29 => self.read_only_vector(m),
            30 => self.set_file_attributes(m),
            31 => self.get_dpb_addr(m),
            32 => self.user_code(m),
            33 => self.read_random(m),
            34 => self.write_random(m, "write random"),
            35 => self.compute_file_size(m),
            36 => self.set_random_record(m),
            37 => self.reset_drive(m),
            40 => self.write_random(m, "write random with zero fill"),
            49 => self.get_set_scb(m),
            101 => self.directory_label(m),
            102 => self.read_file_date_stamps(m),
            105 => self.get_date_time(m),
            108 => self.program_return_code(m),
            141 => self.delay(m),
            other => {
                log::trace!("unsupported BDOS function {other} entry: de=0x{:04x}", m.de());
                m.result_byte(0);
            }
        }
    }

    // ---- console output model -------------------------------------

    pub(crate) fn put_crlf(&mut self) {
        self.console.put(0x0D);
        self.console.put(0x0A);
        self.console_col = 0;
    }

    /// Graphic character: advances the column; the full-screen console
    /// gets an explicit wrap at the right margin.
    pub(crate) fn put_graph(&mut self, c: u8) {
        self.console.put(c);
        self.console_col += 1;
        if self.interactive && self.console_col == self.cols {
            self.put_crlf();
        }
    }

    /// Console output with BS/TAB/LF/CR interpretation; other control
    /// characters are suppressed.
    pub(crate) fn put_char(&mut self, c: u8) {
        match c {
            0x08 => {
                if self.console_col > 0 {
                    self.console.put(c);
                    self.console_col -= 1;
                }
            }
            0x0A => self.console.put(c),
            0x09 => {
                let spaces = 8 - self.console_col % 8;
                for _ in 0..spaces {
                    self.put_graph(0x20);
                }
            }
            0x0D => {
                self.console.put(c);
                self.console_col = 0;
            }
            c if c < 0x20 || c == 0x7F => {}
            c => self.put_graph(c),
        }
    }

    /// Echo control characters as ^X.
    fn put_ctrl(&mut self, c: u8) {
        if c < 0x20 {
            self.put_graph(b'^');
            self.put_graph(c + 0x40);
        } else {
            self.put_graph(c);
        }
    }

    fn get_char_echo(&mut self) -> u8 {
        let c = self.console.get();
        self.put_char(c);
        c
    }

    // ---- functions 0..13 ------------------------------------------

    fn system_reset(&mut self, m: &mut Machine) {
        log::trace!("system reset entry");
        m.halt_with(TermReason::Term);
    }

    fn console_input(&mut self, m: &mut Machine) {
        log::trace!("console input entry");
        let c = self.get_char_echo();
        m.result_byte(c);
        log::trace!("console input exit: a=0x{c:02x}");
    }

    fn console_output(&mut self, m: &mut Machine) {
        log::trace!("console output entry: e=0x{:02x}", m.e);
        self.put_char(m.e);
        m.result_byte(0);
    }

    fn reader_input(&mut self, m: &mut Machine) {
        log::trace!("reader input entry");
        let c = self.reader.get(&self.charset);
        m.result_byte(c);
        log::trace!("reader input exit: a=0x{c:02x}");
    }

    fn punch_output(&mut self, m: &mut Machine) {
        log::trace!("punch output entry: e=0x{:02x}", m.e);
        self.punch.put(m.e, &self.charset);
        m.result_byte(0);
    }

    fn list_output(&mut self, m: &mut Machine) {
        log::trace!("list output entry: e=0x{:02x}", m.e);
        self.printer.put(m.e, &self.charset);
        m.result_byte(0);
    }

    /// E = 0xFF polls the console without echo; anything else goes out
    /// raw. Mixing this with the cooked console calls confuses the
    /// column tracking, as on a real CP/M.
    fn direct_console_io(&mut self, m: &mut Machine) {
        log::trace!("direct console io entry: e=0x{:02x}", m.e);
        if m.e == 0xFF {
            let c = if self.console.ready() {
                self.console.get()
            } else {
                0
            };
            m.result_byte(c);
        } else {
            self.console.put(m.e);
            m.result_byte(0);
        }
    }

    fn get_io_byte(&mut self, m: &mut Machine) {
        log::trace!("get io byte entry");
        let v = m.load(IOBYTE);
        m.result_byte(v);
    }

    fn set_io_byte(&mut self, m: &mut Machine) {
        log::trace!("set io byte entry: e=0x{:02x}", m.e);
        m.store(IOBYTE, m.e);
        m.result_byte(0);
    }

    fn print_string(&mut self, m: &mut Machine) {
        log::trace!("print string entry: de=0x{:04x}", m.de());
        let start = m.de();
        let mut addr = start as usize;
        loop {
            let byte = m.load(addr as u16);
            if byte == b'$' {
                break;
            }
            self.put_char(byte);
            addr += 1;
            if addr == MEMORY_SIZE {
                log::error!("print string: invalid string at 0x{start:04x}");
                m.halt_with(TermReason::BdosArg);
                break;
            }
        }
        m.result_byte(0);
    }

    /// BDOS 10, the line editor. The buffer at DE starts with the
    /// capacity; the second byte receives the stored length.
    fn read_console_buffer(&mut self, m: &mut Machine) {
        log::trace!("read console buffer entry: de=0x{:04x}", m.de());
        let addr = m.de();
        let size = m.load(addr) as usize;
        if MEMORY_SIZE - (addr as usize) < size + 2 {
            log::error!("read console buffer: invalid buffer 0x{addr:04x}");
            m.halt_with(TermReason::BdosArg);
            m.result_byte(0);
            return;
        }
        let mut stored: Vec<u8> = Vec::with_capacity(size);
        let start_col = self.console_col;
        while stored.len() < size {
            let c = self.console.get();
            match c {
                // ^C at the start of the line terminates the program
                0x03 if stored.is_empty() => {
                    self.put_ctrl(c);
                    self.put_crlf();
                    m.halt_with(TermReason::CtrlC);
                    m.result_byte(0);
                    return;
                }
                // ^E: physical end of line
                0x05 => self.put_crlf(),
                // BS and DEL both delete by overtyping; a deleted
                // control character covers two screen positions
                0x08 | 0x7F => {
                    if let Some(deleted) = stored.pop() {
                        self.put_char(0x08);
                        self.put_graph(0x20);
                        self.put_char(0x08);
                        if deleted < 0x20 {
                            self.put_char(0x08);
                            self.put_graph(0x20);
                            self.put_char(0x08);
                        }
                    }
                }
                0x0A | 0x0D => break,
                // ^R: retype the line
                0x12 => {
                    self.put_crlf();
                    for _ in 0..start_col {
                        self.put_graph(0x20);
                    }
                    for i in 0..stored.len() {
                        let b = stored[i];
                        self.put_ctrl(b);
                    }
                }
                // ^U, ^X: discard all input
                0x15 | 0x18 => {
                    self.put_crlf();
                    for _ in 0..start_col {
                        self.put_graph(0x20);
                    }
                    stored.clear();
                }
                c => {
                    self.put_ctrl(c);
                    stored.push(c);
                }
            }
            if self.stopping() {
                break;
            }
        }
        m.store(addr.wrapping_add(1), stored.len() as u8);
        for (i, &b) in stored.iter().enumerate() {
            m.store(addr.wrapping_add(2 + i as u16), b);
        }
        self.put_char(0x0D);
        m.result_byte(0);
    }

    fn get_console_status(&mut self, m: &mut Machine) {
        log::trace!("get console status entry");
        let v = if self.console.ready() { 0xFF } else { 0x00 };
        m.result_byte(v);
    }

    fn return_version(&mut self, m: &mut Machine) {
        log::trace!("return version number entry");
        m.result_byte(0x22);
    }

    fn reset_disk_system(&mut self, m: &mut Machine) {
        log::info!("reset disk system entry");
        self.disk_reset_state();
        m.store(DRVUSER, self.current_drive | self.current_user << 4);
        m.result_byte(0);
    }

    fn select_disk(&mut self, m: &mut Machine) {
        log::info!("select disk entry: e=0x{:02x}", m.e);
        let e = m.e;
        if e > 15 || self.drives[e as usize].is_none() {
            log::error!("select disk: illegal/unconfigured disk {e}");
            m.halt_with(TermReason::Select);
        } else {
            self.current_drive = e;
            m.store(DRVUSER, e | self.current_user << 4);
        }
        m.result_byte(0);
    }

    // ---- functions 24..32 -----------------------------------------

    fn login_vector(&mut self, m: &mut Machine) {
        log::info!("return log in vector entry");
        let mut vector = 0u16;
        for (i, d) in self.drives.iter().enumerate() {
            if d.is_some() {
                vector |= 1 << i;
            }
        }
        m.result_word(vector);
    }

    fn current_disk(&mut self, m: &mut Machine) {
        log::info!("return current disk entry");
        m.result_byte(self.current_drive);
    }

    fn set_dma(&mut self, m: &mut Machine) {
        log::info!("set dma address entry: de=0x{:04x}", m.de());
        let addr = m.de();
        if MEMORY_SIZE - (addr as usize) < 128 {
            log::error!("set dma address: illegal address 0x{addr:04x}");
            m.halt_with(TermReason::BdosArg);
        } else {
            self.dma = addr;
        }
        m.result_byte(0);
    }

    fn get_alloc_addr(&mut self, m: &mut Machine) {
        log::info!("get addr alloc entry");
        m.result_word(ALV);
    }

    fn write_protect_disk(&mut self, m: &mut Machine) {
        log::info!("write protect disk entry");
        self.read_only[self.current_drive as usize] = true;
        m.result_byte(0);
    }

    fn read_only_vector(&mut self, m: &mut Machine) {
        log::info!("get read only vector entry");
        let mut vector = 0u16;
        for (i, &ro) in self.read_only.iter().enumerate() {
            if ro {
                vector |= 1 << i;
            }
        }
        m.result_word(vector);
    }

    fn get_dpb_addr(&mut self, m: &mut Machine) {
        log::info!("get addr diskparams entry");
        m.result_word(DPB);
    }

    fn user_code(&mut self, m: &mut Machine) {
        log::info!("get set user code entry: e=0x{:02x}", m.e);
        if m.e == 0xFF {
            m.result_byte(self.current_user);
        } else {
            self.current_user = m.e & 0x0F;
            m.store(DRVUSER, self.current_drive | self.current_user << 4);
            m.result_byte(0);
        }
    }

    fn reset_drive(&mut self, m: &mut Machine) {
        log::info!("reset drive entry: de=0x{:04x}", m.de());
        let mut vector = m.de();
        for i in 0..16 {
            if vector & 1 != 0 {
                if self.drives[i].is_none() {
                    log::error!("reset drive: illegal disk {i}");
                    m.halt_with(TermReason::Select);
                } else {
                    self.read_only[i] = self.conf_readonly[i];
                }
            }
            vector >>= 1;
        }
        m.result_byte(0);
    }

    // ---- CP/M 3 extensions ----------------------------------------

    /// BDOS 49: a handful of System Control Block bytes. Reads serve
    /// fixed values; writes are accepted and ignored.
    fn get_set_scb(&mut self, m: &mut Machine) {
        log::trace!("get/set scb entry: de=0x{:04x}", m.de());
        let pb = m.de();
        let offset = m.load(pb);
        let set = m.load(pb.wrapping_add(1));
        if set != 0 {
            // 0xFF sets a byte, 0xFE a word; both vanish here
            m.result_word(0);
            return;
        }
        let value: u16 = match offset {
            // BDOS version
            0x05 => 0x0022,
            // program return code
            0x10 => self.return_code & 0xFF,
            0x11 => self.return_code >> 8,
            // console width (columns - 1) and page length
            0x1A => self.cols - 1,
            0x1C => self.lines,
            // current DMA, disk, user
            0x3C => self.dma,
            0x3E => self.current_drive as u16,
            0x44 => self.current_user as u16,
            // multi-sector count is always 1
            0x4A => 1,
            _ => 0,
        };
        m.result_word(value);
    }

    /// BDOS 101: directory label byte: label present, stamps enabled,
    /// no passwords.
    fn directory_label(&mut self, m: &mut Machine) {
        log::trace!("return directory label entry");
        m.result_byte(0x61);
    }

    fn read_file_date_stamps(&mut self, m: &mut Machine) {
        self.file_date_stamps(m);
    }

    /// BDOS 105: day count plus BCD time into the buffer at DE,
    /// seconds in A.
    fn get_date_time(&mut self, m: &mut Machine) {
        log::trace!("get date and time entry: de=0x{:04x}", m.de());
        let de = m.de();
        let (stamp, seconds) = clock::now();
        m.store16(de, stamp.day);
        m.store(de.wrapping_add(2), stamp.hour);
        m.store(de.wrapping_add(3), stamp.minute);
        m.result_byte(seconds);
    }

    /// BDOS 108: get (DE = 0xFFFF) or set the program return code.
    /// Codes at or above 0xFF00 turn into a nonzero host exit status.
    fn program_return_code(&mut self, m: &mut Machine) {
        log::trace!("get/set program return code entry: de=0x{:04x}", m.de());
        if m.de() == 0xFFFF {
            m.result_word(self.return_code);
        } else {
            self.return_code = m.de();
            m.result_byte(0);
        }
    }

    /// BDOS 141: sleep DE system ticks of 20 ms, keeping the console
    /// polled and bailing out on a termination request.
    fn delay(&mut self, m: &mut Machine) {
        log::trace!("delay entry: de=0x{:04x}", m.de());
        let ms = m.de() as u64 * 20;
        self.sleep_ms(ms);
        m.result_byte(0);
    }

    // Direct device access for the BIOS entries, which bypass the
    // BDOS register conventions.

    pub(crate) fn bios_list(&mut self, c: u8) {
        self.printer.put(c, &self.charset);
    }

    pub(crate) fn bios_punch(&mut self, c: u8) {
        self.punch.put(c, &self.charset);
    }

    pub(crate) fn bios_reader(&mut self) -> u8 {
        self.reader.get(&self.charset)
    }

    pub(crate) fn bios_list_ready(&self) -> bool {
        self.printer.ready()
    }

    pub(crate) fn sleep_ms(&mut self, ms: u64) {
        let console = &mut self.console;
        let stop = &self.stop;
        clock::delay_ms(ms, &mut || {
            console.poll();
            stop.load(Ordering::Relaxed)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;
    use crate::machine::Machine;

    fn test_bdos(input: &[u8]) -> (Bdos, Machine) {
        let mut cfg = Config::default();
        cfg.finalize();
        let console = Box::new(HeadlessConsole::with_input(input));
        let stop = Arc::new(AtomicBool::new(false));
        (Bdos::new(&cfg, console, stop), Machine::new())
    }

    #[test]
    fn version_is_22() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.c = 12;
        bdos.dispatch(&mut m);
        assert_eq!(m.a, 0x22);
        assert_eq!(m.l, 0x22);
        assert_eq!(m.b, 0);
        assert_eq!(m.h, 0);
    }

    #[test]
    fn tab_expands_to_eighth_column() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.c = 2;
        m.e = b'A';
        bdos.dispatch(&mut m);
        m.c = 2;
        m.e = 0x09;
        bdos.dispatch(&mut m);
        assert_eq!(bdos.console_col, 8);
    }

    #[test]
    fn bs_at_column_zero_is_dropped() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.c = 2;
        m.e = 0x08;
        bdos.dispatch(&mut m);
        assert_eq!(bdos.console_col, 0);
    }

    #[test]
    fn line_editor_stores_input() {
        let (mut bdos, mut m) = test_bdos(b"hello\r");
        m.set_de(0x1000);
        m.store(0x1000, 32);
        m.c = 10;
        bdos.dispatch(&mut m);
        assert_eq!(m.load(0x1001), 5);
        assert_eq!(
            &m.mem[0x1002..0x1007],
            b"hello"
        );
        assert!(!m.terminate);
    }

    #[test]
    fn line_editor_backspace_removes() {
        let (mut bdos, mut m) = test_bdos(b"ab\x08c\r");
        m.set_de(0x1000);
        m.store(0x1000, 32);
        m.c = 10;
        bdos.dispatch(&mut m);
        assert_eq!(m.load(0x1001), 2);
        assert_eq!(&m.mem[0x1002..0x1004], b"ac");
    }

    #[test]
    fn line_editor_ctrl_u_discards() {
        let (mut bdos, mut m) = test_bdos(b"ab\x15xy\r");
        m.set_de(0x1000);
        m.store(0x1000, 32);
        m.c = 10;
        bdos.dispatch(&mut m);
        assert_eq!(m.load(0x1001), 2);
        assert_eq!(&m.mem[0x1002..0x1004], b"xy");
    }

    #[test]
    fn line_editor_ctrl_c_at_start_terminates() {
        let (mut bdos, mut m) = test_bdos(b"\x03");
        m.set_de(0x1000);
        m.store(0x1000, 32);
        m.c = 10;
        bdos.dispatch(&mut m);
        assert!(m.terminate);
        assert_eq!(m.term_reason, TermReason::CtrlC);
    }

    #[test]
    fn ctrl_c_mid_line_is_data() {
        let (mut bdos, mut m) = test_bdos(b"a\x03b\r");
        m.set_de(0x1000);
        m.store(0x1000, 32);
        m.c = 10;
        bdos.dispatch(&mut m);
        assert!(!m.terminate);
        assert_eq!(m.load(0x1001), 3);
        assert_eq!(&m.mem[0x1002..0x1005], b"a\x03b");
    }

    #[test]
    fn print_string_stops_at_dollar() {
        let (mut bdos, mut m) = test_bdos(b"");
        let msg = b"Hello$";
        m.mem[0x200..0x200 + msg.len()].copy_from_slice(msg);
        m.set_de(0x200);
        m.c = 9;
        bdos.dispatch(&mut m);
        assert!(!m.terminate);
        assert_eq!(bdos.console_col, 5);
    }

    #[test]
    fn print_string_without_terminator_faults() {
        let (mut bdos, mut m) = test_bdos(b"");
        // memory is all zeroes: every byte is a suppressed control
        // character and no '$' is ever found
        m.set_de(0xFFF0);
        m.c = 9;
        bdos.dispatch(&mut m);
        assert!(m.terminate);
        assert_eq!(m.term_reason, TermReason::BdosArg);
    }

    #[test]
    fn iobyte_round_trip() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.c = 8;
        m.e = 0xA5;
        bdos.dispatch(&mut m);
        assert_eq!(m.load(IOBYTE), 0xA5);
        m.c = 7;
        bdos.dispatch(&mut m);
        assert_eq!(m.a, 0xA5);
    }

    #[test]
    fn select_unconfigured_disk_faults() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.c = 14;
        m.e = 5; // drive F has no directory
        bdos.dispatch(&mut m);
        assert!(m.terminate);
        assert_eq!(m.term_reason, TermReason::Select);
    }

    #[test]
    fn login_vector_reflects_drives() {
        let (mut bdos, mut m) = test_bdos(b"");
        bdos.drives[2] = Some(PathBuf::from("/tmp"));
        m.c = 24;
        bdos.dispatch(&mut m);
        // drive A (configured by default) and drive C
        assert_eq!(m.l, 0b101);
        assert_eq!(m.h, 0);
        assert_eq!(m.a, m.l);
    }

    #[test]
    fn write_protect_and_vector() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.c = 28;
        bdos.dispatch(&mut m);
        m.c = 29;
        bdos.dispatch(&mut m);
        assert_eq!(m.l, 1);
    }

    #[test]
    fn scb_serves_console_width() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.store(0x1000, 0x1A);
        m.store(0x1001, 0x00);
        m.set_de(0x1000);
        m.c = 49;
        bdos.dispatch(&mut m);
        assert_eq!(m.l, 79);
    }

    #[test]
    fn return_code_round_trip() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.c = 108;
        m.set_de(0x1234);
        bdos.dispatch(&mut m);
        m.c = 108;
        m.set_de(0xFFFF);
        bdos.dispatch(&mut m);
        assert_eq!(m.l, 0x34);
        assert_eq!(m.h, 0x12);
        assert_eq!(bdos.return_code, 0x1234);
    }

    #[test]
    fn unsupported_function_returns_zero() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.c = 99;
        m.a = 0x55;
        bdos.dispatch(&mut m);
        assert_eq!(m.a, 0);
        assert!(!m.terminate);
    }

    #[test]
    fn user_code_get_set() {
        let (mut bdos, mut m) = test_bdos(b"");
        m.c = 32;
        m.e = 0x17; // only the low nibble sticks
        bdos.dispatch(&mut m);
        m.c = 32;
        m.e = 0xFF;
        bdos.dispatch(&mut m);
        assert_eq!(m.a, 7);
        assert_eq!(m.load(DRVUSER) >> 4, 7);
    }
}
