//! The auxiliary character devices: printer and punch (output), reader
//! (input). Each is optionally bound to a host file, opened lazily on
//! first use.
//!
//! In raw mode bytes pass through unchanged. In text mode output is
//! translated through the character set with CR/LF pairs collapsed to
//! host newlines, and reader input expands LF to CR/LF on the way in.
//! The first host error latches the device dead; the error is reported
//! once at teardown so it doesn't scroll away under a full-screen
//! guest.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

use crate::charset::Charset;
use crate::config::DeviceConfig;

pub struct OutputDevice {
    name: &'static str,
    cfg: Option<DeviceConfig>,
    file: Option<File>,
    error: Option<std::io::Error>,
    pending_cr: bool,
}

impl OutputDevice {
    pub fn new(name: &'static str, cfg: Option<DeviceConfig>) -> Self {
        Self {
            name,
            cfg,
            file: None,
            error: None,
            pending_cr: false,
        }
    }

    fn open(&mut self) -> bool {
        if self.file.is_some() {
            return true;
        }
        let Some(cfg) = &self.cfg else { return false };
        match OpenOptions::new().create(true).append(true).open(&cfg.path) {
            Ok(f) => {
                self.file = Some(f);
                true
            }
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }

    fn emit(&mut self, bytes: &[u8]) {
        if let Some(f) = self.file.as_mut() {
            if let Err(e) = f.write_all(bytes) {
                self.error = Some(e);
                self.file = None;
            }
        }
    }

    /// Send one CP/M byte to the device.
    pub fn put(&mut self, c: u8, charset: &Charset) {
        if self.cfg.is_none() || self.error.is_some() || !self.open() {
            return;
        }
        if self.cfg.as_ref().is_some_and(|d| d.raw) {
            self.emit(&[c]);
            return;
        }
        // text mode: CR before anything but LF is a bare carriage
        // return; CR itself is held back until we know what follows
        if c != 0x0A && self.pending_cr {
            self.emit("\r".as_bytes());
        }
        if c != 0x0D {
            if let Some(ch) = charset.from_cpm(c) {
                let mut buf = [0u8; 4];
                let encoded = ch.encode_utf8(&mut buf).len();
                self.emit(&buf[..encoded]);
            }
        }
        self.pending_cr = c == 0x0D;
    }

    /// Ready as long as the device is configured and alive.
    pub fn ready(&self) -> bool {
        self.cfg.is_some() && self.error.is_none()
    }

    /// Flush pending state and report any latched error.
    pub fn finish(&mut self) {
        if self.pending_cr {
            self.emit("\r".as_bytes());
            self.pending_cr = false;
        }
        if let Some(e) = &self.error {
            if let Some(cfg) = &self.cfg {
                log::error!("error on {} ({}): {e}", cfg.path.display(), self.name);
            }
        }
        self.file = None;
    }
}

pub struct InputDevice {
    name: &'static str,
    cfg: Option<DeviceConfig>,
    file: Option<File>,
    error: Option<std::io::Error>,
    pending_lf: bool,
}

impl InputDevice {
    pub fn new(name: &'static str, cfg: Option<DeviceConfig>) -> Self {
        Self {
            name,
            cfg,
            file: None,
            error: None,
            pending_lf: false,
        }
    }

    fn open(&mut self) -> bool {
        if self.file.is_some() {
            return true;
        }
        let Some(cfg) = &self.cfg else { return false };
        match File::open(&cfg.path) {
            Ok(f) => {
                self.file = Some(f);
                true
            }
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        let f = self.file.as_mut()?;
        let mut byte = [0u8; 1];
        loop {
            match f.read(&mut byte) {
                Ok(0) => return None,
                Ok(_) => return Some(byte[0]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.error = Some(e);
                    self.file = None;
                    return None;
                }
            }
        }
    }

    /// Read one UTF-8 character from the backing file.
    fn next_char(&mut self) -> Option<char> {
        let first = self.next_byte()?;
        let extra = match first {
            0x00..=0x7F => 0,
            0xC0..=0xDF => 1,
            0xE0..=0xEF => 2,
            _ => 3,
        };
        let mut buf = vec![first];
        for _ in 0..extra {
            buf.push(self.next_byte()?);
        }
        std::str::from_utf8(&buf).ok()?.chars().next()
    }

    /// Next CP/M byte; 0x1A signals end of data and an absent or dead
    /// device.
    pub fn get(&mut self, charset: &Charset) -> u8 {
        if self.cfg.is_none() || self.error.is_some() || !self.open() {
            return 0x1A;
        }
        if self.cfg.as_ref().is_some_and(|d| d.raw) {
            return self.next_byte().unwrap_or(0x1A);
        }
        if self.pending_lf {
            self.pending_lf = false;
            return 0x0A;
        }
        loop {
            let Some(ch) = self.next_char() else {
                return 0x1A;
            };
            let Some(c) = charset.to_cpm(ch) else {
                continue;
            };
            if c == 0x0A {
                // text files arrive LF-terminated; the guest expects CR/LF
                self.pending_lf = true;
                return 0x0D;
            }
            return c;
        }
    }

    pub fn finish(&mut self) {
        if let Some(e) = &self.error {
            if let Some(cfg) = &self.cfg {
                log::error!("error on {} ({}): {e}", cfg.path.display(), self.name);
            }
        }
        self.file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::{BuiltinSet, Charset};
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("cpm80-chario-{}-{name}", std::process::id()));
        p
    }

    #[test]
    fn text_output_folds_crlf() {
        let path = scratch("prn");
        std::fs::remove_file(&path).ok();
        let cs = Charset::builtin(BuiltinSet::Vt52);
        let mut dev = OutputDevice::new(
            "printer",
            Some(DeviceConfig {
                path: path.clone(),
                raw: false,
            }),
        );
        for &b in b"HI\r\nX\r" {
            dev.put(b, &cs);
        }
        dev.finish();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "HI\nX\r");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn raw_output_passes_bytes() {
        let path = scratch("pun");
        std::fs::remove_file(&path).ok();
        let mut dev = OutputDevice::new(
            "punch",
            Some(DeviceConfig {
                path: path.clone(),
                raw: true,
            }),
        );
        let cs = Charset::builtin(BuiltinSet::Vt52);
        for &b in &[0x00u8, 0x0D, 0x0A, 0xFF] {
            dev.put(b, &cs);
        }
        dev.finish();
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x00, 0x0D, 0x0A, 0xFF]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn reader_expands_lf_and_ends_with_sub() {
        let path = scratch("rdr");
        std::fs::write(&path, "AB\nC").unwrap();
        let cs = Charset::builtin(BuiltinSet::Vt52);
        let mut dev = InputDevice::new(
            "reader",
            Some(DeviceConfig {
                path: path.clone(),
                raw: false,
            }),
        );
        let got: Vec<u8> = (0..7).map(|_| dev.get(&cs)).collect();
        assert_eq!(got, vec![b'A', b'B', 0x0D, 0x0A, b'C', 0x1A, 0x1A]);
        dev.finish();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unconfigured_reader_reads_eof() {
        let cs = Charset::builtin(BuiltinSet::Vt52);
        let mut dev = InputDevice::new("reader", None);
        assert_eq!(dev.get(&cs), 0x1A);
    }
}
