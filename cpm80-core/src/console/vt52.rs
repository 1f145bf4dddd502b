//! Full-screen VT52 terminal emulation on top of crossterm.
//!
//! The guest writes CP/M bytes; this back-end keeps a cell grid of the
//! configured geometry (80x24 by default) on the host's alternate
//! screen and interprets the VT52 escape set plus the customary
//! extensions: attribute switches, line/character insert and delete,
//! charset and keypad selection. Cursor keys are answered with VT52
//! input sequences, or with WordStar control keys when alternate keys
//! are selected.

use std::collections::VecDeque;
use std::io::{BufWriter, Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Attributes, Print, SetAttributes};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{cursor, queue};

use super::Console;
use crate::charset::Charset;
use crate::config::{Config, ScreenDelay};

const ATTR_STANDOUT: u8 = 0x01;
const ATTR_UNDERLINE: u8 = 0x02;
const ATTR_BLINK: u8 = 0x04;
const ATTR_REVERSE: u8 = 0x08;
const ATTR_BOLD: u8 = 0x10;

#[derive(Clone, Copy, PartialEq)]
struct Cell {
    ch: char,
    attrs: u8,
}

const BLANK: Cell = Cell {
    ch: ' ',
    attrs: 0,
};

/// Escape-sequence parser state.
#[derive(Clone, Copy)]
enum State {
    Normal,
    Escape,
    EscapeY,
    EscapeYLine(u8),
}

pub struct Vt52Console {
    primary: Charset,
    alternate: Charset,
    use_alt: bool,
    stop: Arc<AtomicBool>,

    lines: usize,
    cols: usize,
    grid: Vec<Cell>,
    cursor_x: usize,
    cursor_y: usize,

    state: State,
    attrs: u8,
    graphics: bool,
    cursor_hidden: bool,
    hold_screen: bool,
    app_keypad: bool,
    altkeys: bool,
    reverse_bs_del: bool,
    app_cursor: bool,
    screen_delay: ScreenDelay,

    out: BufWriter<Stdout>,
    input: VecDeque<u8>,
    raw_mode: bool,
}

impl Vt52Console {
    pub fn new(cfg: &Config, stop: Arc<AtomicBool>) -> Self {
        let lines = cfg.lines as usize;
        let cols = cfg.cols as usize;
        let raw_mode = enable_raw_mode().is_ok();
        let mut out = BufWriter::new(std::io::stdout());
        let _ = queue!(out, EnterAlternateScreen, Clear(ClearType::All));
        let _ = queue!(out, cursor::MoveTo(0, 0));
        let _ = out.flush();
        Self {
            primary: cfg.primary.clone(),
            alternate: cfg.alternate.clone(),
            use_alt: cfg.use_alt_charset,
            stop,
            lines,
            cols,
            grid: vec![BLANK; lines * cols],
            cursor_x: 0,
            cursor_y: 0,
            state: State::Normal,
            attrs: 0,
            graphics: false,
            cursor_hidden: false,
            hold_screen: false,
            app_keypad: false,
            altkeys: cfg.altkeys,
            reverse_bs_del: cfg.reverse_bs_del,
            app_cursor: cfg.app_cursor,
            screen_delay: cfg.screen_delay,
            out,
            input: VecDeque::new(),
            raw_mode,
        }
    }

    fn charset(&self) -> &Charset {
        if self.use_alt {
            &self.alternate
        } else {
            &self.primary
        }
    }

    fn term_attrs(attrs: u8) -> Attributes {
        let mut set = Attributes::default();
        if attrs & ATTR_BOLD != 0 {
            set.set(Attribute::Bold);
        }
        if attrs & ATTR_UNDERLINE != 0 {
            set.set(Attribute::Underlined);
        }
        if attrs & ATTR_BLINK != 0 {
            set.set(Attribute::SlowBlink);
        }
        if attrs & (ATTR_REVERSE | ATTR_STANDOUT) != 0 {
            set.set(Attribute::Reverse);
        }
        set
    }

    fn draw_cell(&mut self, y: usize, x: usize) {
        let cell = self.grid[y * self.cols + x];
        let _ = queue!(
            self.out,
            cursor::MoveTo(x as u16, y as u16),
            SetAttributes(Self::term_attrs(cell.attrs)),
            Print(cell.ch),
            SetAttributes(Attributes::from(Attribute::Reset)),
        );
    }

    fn draw_row(&mut self, y: usize) {
        for x in 0..self.cols {
            self.draw_cell(y, x);
        }
    }

    fn draw_all(&mut self) {
        let _ = queue!(self.out, Clear(ClearType::All));
        for y in 0..self.lines {
            self.draw_row(y);
        }
    }

    fn sync_cursor(&mut self) {
        let _ = queue!(
            self.out,
            cursor::MoveTo(self.cursor_x as u16, self.cursor_y as u16)
        );
        let _ = self.out.flush();
    }

    fn scroll_up(&mut self) {
        let cols = self.cols;
        self.grid.rotate_left(cols);
        let tail = self.grid.len() - cols;
        self.grid[tail..].fill(BLANK);
        self.draw_all();
    }

    fn scroll_down(&mut self) {
        let cols = self.cols;
        self.grid.rotate_right(cols);
        self.grid[..cols].fill(BLANK);
        self.draw_all();
    }

    fn insert_line(&mut self) {
        let cols = self.cols;
        let at = self.cursor_y * cols;
        self.grid[at..].rotate_right(cols);
        self.grid[at..at + cols].fill(BLANK);
        self.draw_all();
    }

    fn delete_line(&mut self) {
        let cols = self.cols;
        let at = self.cursor_y * cols;
        self.grid[at..].rotate_left(cols);
        let tail = self.grid.len() - cols;
        self.grid[tail..].fill(BLANK);
        self.draw_all();
    }

    fn clear_to_eol(&mut self) {
        let row = self.cursor_y * self.cols;
        for x in self.cursor_x..self.cols {
            self.grid[row + x] = BLANK;
        }
        let y = self.cursor_y;
        self.draw_row(y);
    }

    fn clear_to_bottom(&mut self) {
        self.clear_to_eol();
        for y in self.cursor_y + 1..self.lines {
            let row = y * self.cols;
            self.grid[row..row + self.cols].fill(BLANK);
            self.draw_row(y);
        }
    }

    fn insert_char(&mut self) {
        let row = self.cursor_y * self.cols;
        for x in (self.cursor_x + 1..self.cols).rev() {
            self.grid[row + x] = self.grid[row + x - 1];
        }
        self.grid[row + self.cursor_x] = BLANK;
        let y = self.cursor_y;
        self.draw_row(y);
    }

    fn delete_char(&mut self) {
        let row = self.cursor_y * self.cols;
        for x in self.cursor_x..self.cols - 1 {
            self.grid[row + x] = self.grid[row + x + 1];
        }
        self.grid[row + self.cols - 1] = BLANK;
        let y = self.cursor_y;
        self.draw_row(y);
    }

    fn print_char(&mut self, c: u8) {
        let translated = if self.graphics {
            self.charset().from_graph(c)
        } else {
            self.charset().from_cpm(c)
        };
        let Some(ch) = translated else { return };
        let (y, x) = (self.cursor_y, self.cursor_x);
        self.grid[y * self.cols + x] = Cell {
            ch,
            attrs: self.attrs,
        };
        self.draw_cell(y, x);
        // the VT52 does not wrap: the cursor sticks at the last column
        if self.cursor_x + 1 < self.cols {
            self.cursor_x += 1;
        }
    }

    fn control(&mut self, c: u8) {
        match c {
            0x07 => {
                let _ = queue!(self.out, Print('\x07'));
            }
            0x08 => {
                self.cursor_x = self.cursor_x.saturating_sub(1);
            }
            0x09 => {
                // VT52 tab rule: every eighth column, then single steps
                // close to the right margin, ignored at the margin
                let mut t = (self.cursor_x / 8 + 1) * 8;
                if t >= self.cols {
                    t = self.cursor_x + 1;
                }
                if t < self.cols {
                    self.cursor_x = t;
                }
            }
            0x0A => {
                if self.cursor_y + 1 < self.lines {
                    self.cursor_y += 1;
                } else {
                    if self.hold_screen {
                        // hold-screen mode: one keypress per scrolled line
                        let _ = self.get();
                    }
                    self.scroll_up();
                }
            }
            0x0D => self.cursor_x = 0,
            0x1B => self.state = State::Escape,
            _ => {}
        }
    }

    fn escape(&mut self, c: u8) {
        self.state = State::Normal;
        match c {
            b')' => self.app_keypad = false,
            b'=' => self.app_keypad = true,
            b'A' => self.cursor_y = self.cursor_y.saturating_sub(1),
            b'B' => {
                if self.cursor_y + 1 < self.lines {
                    self.cursor_y += 1;
                }
            }
            b'C' => {
                if self.cursor_x + 1 < self.cols {
                    self.cursor_x += 1;
                }
            }
            b'D' => self.cursor_x = self.cursor_x.saturating_sub(1),
            b'E' => {
                self.cursor_x = 0;
                self.cursor_y = 0;
                self.grid.fill(BLANK);
                self.draw_all();
            }
            b'F' => self.graphics = true,
            b'G' => self.graphics = false,
            b'H' => {
                self.cursor_x = 0;
                self.cursor_y = 0;
            }
            b'I' => {
                if self.cursor_y > 0 {
                    self.cursor_y -= 1;
                } else {
                    self.scroll_down();
                }
            }
            b'J' => self.clear_to_bottom(),
            b'K' => self.clear_to_eol(),
            b'L' => self.insert_line(),
            b'M' => self.delete_line(),
            b'N' => self.insert_char(),
            b'O' => self.delete_char(),
            b'Y' => self.state = State::EscapeY,
            b'Z' => {
                // identify: VT52 without hardcopy
                self.input.extend([0x1B, b'/', b'K']);
            }
            b'[' => self.hold_screen = true,
            b'\\' => self.hold_screen = false,
            b'a' => {
                if !self.cursor_hidden {
                    self.cursor_hidden = true;
                    let _ = queue!(self.out, cursor::Hide);
                }
            }
            b'b' => {
                if self.cursor_hidden {
                    self.cursor_hidden = false;
                    let _ = queue!(self.out, cursor::Show);
                }
            }
            b'c' => self.use_alt = true,
            b'd' => self.use_alt = false,
            b'e' => self.attrs |= ATTR_BOLD,
            b'f' => self.attrs &= !ATTR_BOLD,
            b'g' => self.attrs |= ATTR_UNDERLINE,
            b'h' => self.attrs &= !ATTR_UNDERLINE,
            b'i' => self.attrs |= ATTR_REVERSE,
            b'j' => self.attrs &= !ATTR_REVERSE,
            b'k' => self.attrs |= ATTR_BLINK,
            b'l' => self.attrs &= !ATTR_BLINK,
            b'm' => self.attrs = 0,
            b'n' => self.altkeys = true,
            b'o' => self.altkeys = false,
            b'p' => self.attrs |= ATTR_STANDOUT,
            b'q' => self.attrs &= !ATTR_STANDOUT,
            // anything else just ends the sequence
            _ => {}
        }
    }

    fn translate_key(&self, key: KeyEvent) -> Option<Vec<u8>> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if let KeyCode::Char(c) = key.code {
                let upper = c.to_ascii_uppercase();
                if upper.is_ascii_uppercase() {
                    return Some(vec![upper as u8 - 0x40]);
                }
            }
        }
        let (bs, del) = if self.reverse_bs_del {
            (0x7F, 0x08)
        } else {
            (0x08, 0x7F)
        };
        let arrow = |vt52: u8, wordstar: u8| -> Vec<u8> {
            if self.altkeys {
                vec![wordstar]
            } else if self.app_cursor && self.app_keypad {
                vec![0x1B, b'?', vt52]
            } else {
                vec![0x1B, vt52]
            }
        };
        match key.code {
            KeyCode::Char(c) => self.charset().to_cpm(c).map(|b| vec![b]),
            KeyCode::Enter => Some(vec![0x0D]),
            KeyCode::Backspace => Some(vec![bs]),
            KeyCode::Delete => Some(vec![del]),
            KeyCode::Tab => Some(vec![0x09]),
            KeyCode::Esc => Some(vec![0x1B]),
            KeyCode::Up => Some(arrow(b'A', 0x05)),
            KeyCode::Down => Some(arrow(b'B', 0x18)),
            KeyCode::Right => Some(arrow(b'C', 0x04)),
            KeyCode::Left => Some(arrow(b'D', 0x13)),
            KeyCode::Home => Some(vec![0x1B, b'H']),
            _ => None,
        }
    }

    fn pump(&mut self, wait: Duration) {
        let _ = self.out.flush();
        let mut budget = wait;
        loop {
            let slice = budget.min(Duration::from_millis(50));
            match event::poll(slice) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        if let Some(bytes) = self.translate_key(key) {
                            self.input.extend(bytes);
                            return;
                        }
                    }
                    Ok(Event::Resize(..)) => {
                        self.draw_all();
                        self.sync_cursor();
                    }
                    _ => {}
                },
                _ => {
                    if budget.is_zero() || self.stop.load(Ordering::Relaxed) {
                        return;
                    }
                    budget = budget.saturating_sub(slice);
                    if budget.is_zero() {
                        return;
                    }
                }
            }
        }
    }
}

impl Console for Vt52Console {
    fn put(&mut self, c: u8) {
        match self.state {
            State::Normal if c <= 0x1F => self.control(c),
            State::Normal if c == 0x7F => {}
            State::Normal => self.print_char(c),
            State::Escape => self.escape(c),
            State::EscapeY => self.state = State::EscapeYLine(c),
            State::EscapeYLine(line) => {
                self.state = State::Normal;
                let line = (line.wrapping_sub(32)) as usize;
                let col = (c.wrapping_sub(32)) as usize;
                self.cursor_y = line.min(self.lines - 1);
                if col < self.cols {
                    self.cursor_x = col;
                }
            }
        }
        self.sync_cursor();
    }

    fn get(&mut self) -> u8 {
        loop {
            if let Some(c) = self.input.pop_front() {
                return c;
            }
            if self.stop.load(Ordering::Relaxed) {
                return 0x1A;
            }
            self.pump(Duration::from_millis(100));
        }
    }

    fn ready(&mut self) -> bool {
        if self.input.is_empty() {
            self.pump(Duration::ZERO);
        }
        !self.input.is_empty()
    }

    fn poll(&mut self) {
        self.pump(Duration::ZERO);
    }

    fn finish(&mut self) {
        match self.screen_delay {
            ScreenDelay::None => {}
            ScreenDelay::Seconds(s) => {
                let _ = self.out.flush();
                std::thread::sleep(Duration::from_secs(s as u64));
            }
            ScreenDelay::WaitKey => {
                self.get();
            }
        }
        let _ = queue!(self.out, cursor::Show, LeaveAlternateScreen);
        let _ = self.out.flush();
        if self.raw_mode {
            let _ = disable_raw_mode();
            self.raw_mode = false;
        }
    }
}
