//! The magic-page trap dispatcher.
//!
//! An instruction fetch at `MAGIC_ADDRESS + k` lands here before
//! anything is decoded: slot 0 is the BDOS entry, slots 1..=17 the
//! seventeen CP/M 2.2 BIOS entries in canonical order, slot 18 the
//! millisecond delay hook. The caller applies RET semantics afterwards,
//! so the guest sees a subroutine that returns.

use crate::bdos::Bdos;
use crate::machine::{Machine, TermReason};

pub fn os_call(bdos: &mut Bdos, m: &mut Machine, slot: u8) {
    match slot {
        0 => bdos.dispatch(m),
        1 => {
            // BIOS BOOT: no sane program calls this
            log::trace!("bios boot entry");
            log::error!("bios boot called by program");
            m.halt_with(TermReason::Boot);
        }
        2 => {
            // BIOS WBOOT: normal termination
            log::trace!("bios wboot entry");
            m.halt_with(TermReason::Term);
        }
        3 => {
            // CONST
            log::trace!("bios const entry");
            m.a = if bdos.console.ready() { 0xFF } else { 0x00 };
        }
        4 => {
            // CONIN: the high bit is not stripped
            log::trace!("bios conin entry");
            m.a = bdos.console.get();
        }
        5 => {
            // CONOUT
            log::trace!("bios conout entry: c=0x{:02x}", m.c);
            let c = m.c;
            bdos.put_char(c);
        }
        6 => {
            // LIST
            log::trace!("bios list entry: c=0x{:02x}", m.c);
            bdos.bios_list(m.c);
        }
        7 => {
            // PUNCH
            log::trace!("bios punch entry: c=0x{:02x}", m.c);
            bdos.bios_punch(m.c);
        }
        8 => {
            // READER
            log::trace!("bios reader entry");
            m.a = bdos.bios_reader();
        }
        9 => {
            // HOME: no tracks to go home to
            log::trace!("bios home entry");
        }
        10 => {
            // SELDSK: report a nonexistent drive
            log::trace!("bios seldsk entry: c=0x{:02x} e=0x{:02x}", m.c, m.e);
            m.h = 0;
            m.l = 0;
        }
        11 | 12 | 13 => {
            // SETTRK / SETSEC / SETDMA: ignored
            log::trace!("bios settrk/setsec/setdma entry: bc=0x{:04x}", m.bc());
        }
        14 | 15 => {
            // READ / WRITE: always an error
            log::trace!("bios read/write entry");
            m.a = 1;
        }
        16 => {
            // LISTST
            log::trace!("bios listst entry");
            m.a = if bdos.bios_list_ready() { 0xFF } else { 0x00 };
        }
        17 => {
            // SECTRAN: identity translation, BC comes back in HL
            log::trace!("bios sectran entry: bc=0x{:04x} de=0x{:04x}", m.bc(), m.de());
            m.l = m.c;
            m.h = m.b;
        }
        _ => {
            // the delay hook: BC milliseconds of wall-clock time
            log::trace!("delay entry: bc=0x{:04x}", m.bc());
            let ms = m.bc() as u64;
            bdos.sleep_ms(ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::console::HeadlessConsole;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn setup() -> (Bdos, Machine) {
        let mut cfg = Config::default();
        cfg.finalize();
        let console = Box::new(HeadlessConsole::with_input(b"x"));
        let bdos = Bdos::new(&cfg, console, Arc::new(AtomicBool::new(false)));
        (bdos, Machine::new())
    }

    #[test]
    fn boot_is_fatal() {
        let (mut bdos, mut m) = setup();
        os_call(&mut bdos, &mut m, 1);
        assert!(m.terminate);
        assert_eq!(m.term_reason, TermReason::Boot);
    }

    #[test]
    fn wboot_terminates_ok() {
        let (mut bdos, mut m) = setup();
        os_call(&mut bdos, &mut m, 2);
        assert!(m.terminate);
        assert_eq!(m.term_reason, TermReason::Term);
    }

    #[test]
    fn const_and_conin() {
        let (mut bdos, mut m) = setup();
        os_call(&mut bdos, &mut m, 3);
        assert_eq!(m.a, 0xFF);
        os_call(&mut bdos, &mut m, 4);
        assert_eq!(m.a, b'x');
        os_call(&mut bdos, &mut m, 3);
        assert_eq!(m.a, 0x00);
    }

    #[test]
    fn seldsk_returns_no_drive() {
        let (mut bdos, mut m) = setup();
        m.set_hl(0x1234);
        os_call(&mut bdos, &mut m, 10);
        assert_eq!(m.hl(), 0);
    }

    #[test]
    fn sectran_is_identity() {
        let (mut bdos, mut m) = setup();
        m.set_bc(0x0B0C);
        os_call(&mut bdos, &mut m, 17);
        assert_eq!(m.hl(), 0x0B0C);
    }

    #[test]
    fn bios_read_reports_error() {
        let (mut bdos, mut m) = setup();
        os_call(&mut bdos, &mut m, 14);
        assert_eq!(m.a, 1);
        assert!(!m.terminate);
    }
}
