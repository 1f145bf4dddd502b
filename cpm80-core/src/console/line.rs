//! Line-mode console back-end.
//!
//! When stdin and stdout are the terminal, the terminal is switched to
//! raw mode (no echo, no line discipline, no tty signals) and keys come
//! in through crossterm events. When either side is redirected the
//! console degrades to plain byte streams: input EOF reads as 0x1A,
//! input LF becomes CR, and CR/LF pairs collapse to host newlines on
//! output.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::tty::IsTty;

use super::Console;
use crate::charset::Charset;

pub struct LineConsole {
    charset: Charset,
    stop: Arc<AtomicBool>,
    reverse_bs_del: bool,
    /// Raw-mode terminal path; false means redirected byte streams.
    tty: bool,
    raw_mode: bool,
    input: VecDeque<u8>,
    /// Redirected output holds CR back to collapse CR/LF into LF.
    pending_cr: bool,
    eof: bool,
}

impl LineConsole {
    pub fn new(charset: Charset, stop: Arc<AtomicBool>, reverse_bs_del: bool) -> Self {
        let tty = std::io::stdin().is_tty() && std::io::stdout().is_tty();
        let raw_mode = tty && enable_raw_mode().is_ok();
        Self {
            charset,
            stop,
            reverse_bs_del,
            tty: raw_mode,
            raw_mode,
            input: VecDeque::new(),
            pending_cr: false,
            eof: false,
        }
    }

    fn emit(&mut self, s: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(s.as_bytes());
        let _ = out.flush();
    }

    fn translate_key(&self, key: KeyEvent) -> Option<u8> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if let KeyCode::Char(c) = key.code {
                let upper = c.to_ascii_uppercase();
                if upper.is_ascii_uppercase() {
                    return Some(upper as u8 - 0x40);
                }
            }
        }
        let (bs, del) = if self.reverse_bs_del {
            (0x7F, 0x08)
        } else {
            (0x08, 0x7F)
        };
        match key.code {
            KeyCode::Char(c) => self.charset.to_cpm(c),
            KeyCode::Enter => Some(0x0D),
            KeyCode::Backspace => Some(bs),
            KeyCode::Delete => Some(del),
            KeyCode::Tab => Some(0x09),
            KeyCode::Esc => Some(0x1B),
            // WordStar-style steering for programs that care
            KeyCode::Up => Some(0x05),
            KeyCode::Down => Some(0x18),
            KeyCode::Left => Some(0x13),
            KeyCode::Right => Some(0x04),
            _ => None,
        }
    }

    /// Move pending key events into the input queue.
    fn pump(&mut self, wait: Duration) {
        if !self.tty {
            return;
        }
        while event::poll(Duration::ZERO).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == event::KeyEventKind::Press {
                    if let Some(c) = self.translate_key(key) {
                        self.input.push_back(c);
                    }
                }
            }
        }
        if self.input.is_empty() && !wait.is_zero() && event::poll(wait).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == event::KeyEventKind::Press {
                    if let Some(c) = self.translate_key(key) {
                        self.input.push_back(c);
                    }
                }
            }
        }
    }

    /// One UTF-8 character from redirected stdin.
    fn read_char(&mut self) -> Option<char> {
        let mut stdin = std::io::stdin().lock();
        let mut first = [0u8; 1];
        if stdin.read(&mut first).ok()? == 0 {
            return None;
        }
        let extra = match first[0] {
            0x00..=0x7F => 0usize,
            0xC0..=0xDF => 1,
            0xE0..=0xEF => 2,
            _ => 3,
        };
        let mut buf = vec![first[0]];
        for _ in 0..extra {
            let mut b = [0u8; 1];
            if stdin.read(&mut b).ok()? == 0 {
                return None;
            }
            buf.push(b[0]);
        }
        std::str::from_utf8(&buf).ok()?.chars().next()
    }
}

impl Console for LineConsole {
    fn put(&mut self, c: u8) {
        if self.tty {
            if let Some(ch) = self.charset.from_cpm(c) {
                self.emit(ch.encode_utf8(&mut [0u8; 4]));
            }
            return;
        }
        // redirected: fold CR/LF to LF, drop lone CR until proven lone
        if c != 0x0A && self.pending_cr {
            self.emit("\r");
        }
        if c != 0x0D {
            if let Some(ch) = self.charset.from_cpm(c) {
                self.emit(ch.encode_utf8(&mut [0u8; 4]));
            }
        }
        self.pending_cr = c == 0x0D;
    }

    fn get(&mut self) -> u8 {
        if !self.tty {
            if self.eof {
                return 0x1A;
            }
            loop {
                let Some(ch) = self.read_char() else {
                    self.eof = true;
                    return 0x1A;
                };
                if let Some(c) = self.charset.to_cpm(ch) {
                    // redirected text arrives LF-terminated
                    return if c == 0x0A { 0x0D } else { c };
                }
            }
        }
        loop {
            if let Some(c) = self.input.pop_front() {
                return c;
            }
            if self.stop.load(Ordering::Relaxed) {
                return 0x1A;
            }
            self.pump(Duration::from_millis(50));
        }
    }

    fn ready(&mut self) -> bool {
        if !self.tty {
            return !self.eof;
        }
        self.pump(Duration::ZERO);
        !self.input.is_empty()
    }

    fn poll(&mut self) {
        self.pump(Duration::ZERO);
    }

    fn finish(&mut self) {
        if self.pending_cr {
            self.emit("\r");
            self.pending_cr = false;
        }
        if self.raw_mode {
            let _ = disable_raw_mode();
            self.raw_mode = false;
        }
    }
}
