//! The instruction interpreter: prefix resolution, operand decoding and
//! the base-plane handlers. The 0xCB and 0xED planes live in `bits` and
//! `ed`; the flag primitives live in `alu`.
//!
//! Decoding follows the real chip's prefix state machine: any run of
//! 0xDD/0xFD bytes is consumed first (the last one wins), then the
//! primary opcode, then (for indexed instructions) one signed
//! displacement byte, then any immediate operand.

pub(crate) mod alu;
mod bits;
mod ed;

use crate::machine::Machine;

/// Active index-register prefix for the instruction being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prefix {
    None,
    Ix,
    Iy,
}

impl Prefix {
    #[inline]
    fn active(self) -> bool {
        self != Prefix::None
    }
}

// Per-opcode decode hints for the base plane.
const OP_0: u8 = 0;
/// With an active DD/FD prefix, a displacement byte follows the opcode.
const OP_IDX: u8 = 1;
/// One immediate byte.
const OP_ARG8: u8 = 2;
/// Two immediate bytes (little-endian word).
const OP_ARG16: u8 = 4;

#[rustfmt::skip]
static BASE_FLAGS: [u8; 256] = {
    const N: u8 = OP_0;
    const I: u8 = OP_IDX;
    const B: u8 = OP_ARG8;
    const W: u8 = OP_ARG16;
    const IB: u8 = OP_IDX | OP_ARG8;
    [
    //  x0 x1 x2 x3 x4 x5 x6 x7 x8 x9 xA xB xC xD xE xF
        N, W, N, N, N, N, B, N, N, N, N, N, N, N, B, N, // 0x
        B, W, N, N, N, N, B, N, B, N, N, N, N, N, B, N, // 1x
        B, W, W, N, N, N, B, N, B, N, W, N, N, N, B, N, // 2x
        B, W, W, N, I, I, IB, N, B, N, W, N, N, N, B, N, // 3x
        N, N, N, N, N, N, I, N, N, N, N, N, N, N, I, N, // 4x
        N, N, N, N, N, N, I, N, N, N, N, N, N, N, I, N, // 5x
        N, N, N, N, N, N, I, N, N, N, N, N, N, N, I, N, // 6x
        I, I, I, I, I, I, N, I, N, N, N, N, N, N, I, N, // 7x
        N, N, N, N, N, N, I, N, N, N, N, N, N, N, I, N, // 8x
        N, N, N, N, N, N, I, N, N, N, N, N, N, N, I, N, // 9x
        N, N, N, N, N, N, I, N, N, N, N, N, N, N, I, N, // Ax
        N, N, N, N, N, N, I, N, N, N, N, N, N, N, I, N, // Bx
        N, N, W, W, W, N, B, N, N, N, W, I, W, W, B, N, // Cx
        N, N, W, B, W, N, B, N, N, N, W, B, W, N, B, N, // Dx
        N, N, W, N, W, N, B, N, N, N, W, N, W, N, B, N, // Ex
        N, N, W, N, W, N, B, N, N, N, W, N, W, N, B, N, // Fx
    ]
};

/// Which decode plane an opcode was counted against.
#[derive(Clone, Copy)]
enum Plane {
    Base,
    Cb,
    Ed,
    Dd,
    Fd,
    DdCb,
    FdCb,
}

/// Per-plane instruction call counters, collected when the log level
/// asks for them and dumped as 16x16 tables on termination.
pub struct Counters {
    pub enabled: bool,
    base: Box<[u64; 256]>,
    cb: Box<[u64; 256]>,
    ed: Box<[u64; 256]>,
    dd: Box<[u64; 256]>,
    fd: Box<[u64; 256]>,
    dd_cb: Box<[u64; 256]>,
    fd_cb: Box<[u64; 256]>,
}

impl Counters {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            base: Box::new([0; 256]),
            cb: Box::new([0; 256]),
            ed: Box::new([0; 256]),
            dd: Box::new([0; 256]),
            fd: Box::new([0; 256]),
            dd_cb: Box::new([0; 256]),
            fd_cb: Box::new([0; 256]),
        }
    }

    #[inline]
    fn count(&mut self, plane: Plane, opcode: u8) {
        if !self.enabled {
            return;
        }
        let table = match plane {
            Plane::Base => &mut self.base,
            Plane::Cb => &mut self.cb,
            Plane::Ed => &mut self.ed,
            Plane::Dd => &mut self.dd,
            Plane::Fd => &mut self.fd,
            Plane::DdCb => &mut self.dd_cb,
            Plane::FdCb => &mut self.fd_cb,
        };
        table[opcode as usize] += 1;
    }

    /// Write all seven plane tables to the log.
    pub fn dump(&self) {
        if !self.enabled {
            return;
        }
        dump_plane(&self.base, "base plane");
        dump_plane(&self.cb, "0xcb plane");
        dump_plane(&self.dd, "0xdd base plane");
        dump_plane(&self.dd_cb, "0xdd 0xcb plane");
        dump_plane(&self.ed, "0xed plane");
        dump_plane(&self.fd, "0xfd base plane");
        dump_plane(&self.fd_cb, "0xfd 0xcb plane");
    }
}

fn dump_plane(counters: &[u64; 256], name: &str) {
    if counters.iter().all(|&n| n == 0) {
        return;
    }
    log::warn!("instruction counters for {name}:");
    let mut header = String::from("  ");
    for high in 0..16 {
        header.push_str(&format!("         {high:x}y"));
    }
    log::warn!("{header}");
    for low in 0..16 {
        let mut line = format!("x{low:x}");
        for high in 0..16 {
            let n = counters[high * 16 + low];
            if n != 0 {
                line.push_str(&format!(" {n:10}"));
            } else {
                line.push_str("          -");
            }
        }
        log::warn!("{line}");
    }
}

/// Execute one instruction (a repeating block instruction counts one
/// step per iteration). The caller is responsible for the magic-page
/// check before invoking this.
pub fn step(m: &mut Machine, counters: &mut Counters) {
    let mut prefix = Prefix::None;
    let opcode = loop {
        match m.fetch_m1() {
            0xDD => prefix = Prefix::Ix,
            0xFD => prefix = Prefix::Iy,
            byte => break byte,
        }
    };

    if opcode == 0xED {
        // ED ignores any DD/FD prefix and has its own argument shapes.
        let opcode2 = m.fetch_m1();
        counters.count(Plane::Ed, opcode2);
        ed::exec(m, opcode2);
        return;
    }

    let flags = BASE_FLAGS[opcode as usize];
    let disp = if prefix.active() && flags & OP_IDX != 0 {
        m.fetch() as i8
    } else {
        0
    };

    if opcode == 0xCB {
        let opcode2 = if prefix.active() { m.fetch_m1() } else { m.fetch() };
        counters.count(
            match prefix {
                Prefix::None => Plane::Cb,
                Prefix::Ix => Plane::DdCb,
                Prefix::Iy => Plane::FdCb,
            },
            opcode2,
        );
        bits::exec(m, prefix, disp, opcode2);
        return;
    }

    counters.count(
        match prefix {
            Prefix::None => Plane::Base,
            Prefix::Ix => Plane::Dd,
            Prefix::Iy => Plane::Fd,
        },
        opcode,
    );

    let arg_lo;
    let arg_hi;
    if flags & OP_ARG8 != 0 {
        arg_lo = m.fetch();
        arg_hi = 0;
    } else if flags & OP_ARG16 != 0 {
        arg_lo = m.fetch();
        arg_hi = m.fetch();
    } else {
        arg_lo = 0;
        arg_hi = 0;
    }

    exec_base(m, prefix, opcode, disp, arg_lo, arg_hi);
}

/// Effective address of the memory operand: (HL) unprefixed, (IX+d) or
/// (IY+d) otherwise. The indexed forms latch the internal register.
#[inline]
pub(crate) fn mem_addr(m: &mut Machine, prefix: Prefix, disp: i8) -> u16 {
    match prefix {
        Prefix::None => m.hl(),
        Prefix::Ix => {
            let addr = m.ix().wrapping_add(disp as i16 as u16);
            m.internal = addr;
            addr
        }
        Prefix::Iy => {
            let addr = m.iy().wrapping_add(disp as i16 as u16);
            m.internal = addr;
            addr
        }
    }
}

/// Read the 8-bit operand named by a 3-bit field.
///
/// `partner` is the other operand field of the same opcode (0 when there
/// is none): when the partner is the memory operand, H and L do *not*
/// turn into the index-register halves.
pub(crate) fn read8(m: &mut Machine, code: u8, partner: u8, prefix: Prefix, disp: i8) -> u8 {
    match code {
        0 => m.b,
        1 => m.c,
        2 => m.d,
        3 => m.e,
        4 => match prefix {
            _ if partner == 6 => m.h,
            Prefix::Ix => m.ixh,
            Prefix::Iy => m.iyh,
            Prefix::None => m.h,
        },
        5 => match prefix {
            _ if partner == 6 => m.l,
            Prefix::Ix => m.ixl,
            Prefix::Iy => m.iyl,
            Prefix::None => m.l,
        },
        6 => {
            let addr = mem_addr(m, prefix, disp);
            m.load(addr)
        }
        _ => m.a,
    }
}

/// Write counterpart of [`read8`].
pub(crate) fn write8(m: &mut Machine, code: u8, partner: u8, prefix: Prefix, disp: i8, value: u8) {
    match code {
        0 => m.b = value,
        1 => m.c = value,
        2 => m.d = value,
        3 => m.e = value,
        4 => match prefix {
            _ if partner == 6 => m.h = value,
            Prefix::Ix => m.ixh = value,
            Prefix::Iy => m.iyh = value,
            Prefix::None => m.h = value,
        },
        5 => match prefix {
            _ if partner == 6 => m.l = value,
            Prefix::Ix => m.ixl = value,
            Prefix::Iy => m.iyl = value,
            Prefix::None => m.l = value,
        },
        6 => {
            let addr = mem_addr(m, prefix, disp);
            m.store(addr, value);
        }
        _ => m.a = value,
    }
}

/// HL, or the active index register under a prefix.
#[inline]
fn hl_like(m: &Machine, prefix: Prefix) -> u16 {
    match prefix {
        Prefix::None => m.hl(),
        Prefix::Ix => m.ix(),
        Prefix::Iy => m.iy(),
    }
}

#[inline]
fn set_hl_like(m: &mut Machine, prefix: Prefix, value: u16) {
    match prefix {
        Prefix::None => m.set_hl(value),
        Prefix::Ix => m.set_ix(value),
        Prefix::Iy => m.set_iy(value),
    }
}

/// Condition field of JP cc / CALL cc / RET cc.
pub(crate) fn condition(m: &Machine, code: u8) -> bool {
    match code & 7 {
        0 => !m.f.z,
        1 => m.f.z,
        2 => !m.f.c,
        3 => m.f.c,
        4 => !m.f.p,
        5 => m.f.p,
        6 => !m.f.s,
        _ => m.f.s,
    }
}

/// Relative jump by a signed displacement; goes through the internal
/// register like the real chip.
fn jump_relative(m: &mut Machine, off: u8) {
    m.internal = m.pc.wrapping_add(off as i8 as i16 as u16);
    m.pc = m.internal;
}

fn exec_base(m: &mut Machine, prefix: Prefix, op: u8, disp: i8, lo: u8, hi: u8) {
    let nn = u16::from_le_bytes([lo, hi]);
    match op {
        0x00 => {}

        0x08 => {
            // EX AF,AF'
            std::mem::swap(&mut m.a, &mut m.alt_a);
            std::mem::swap(&mut m.f, &mut m.alt_f);
        }

        0x10 => {
            // DJNZ
            m.b = m.b.wrapping_sub(1);
            if m.b != 0 {
                jump_relative(m, lo);
            }
        }

        0x18 => jump_relative(m, lo),

        0x20 | 0x28 | 0x30 | 0x38 => {
            if condition(m, (op >> 3) & 3) {
                jump_relative(m, lo);
            }
        }

        // LD rr,nn
        0x01 => m.set_bc(nn),
        0x11 => m.set_de(nn),
        0x21 => set_hl_like(m, prefix, nn),
        0x31 => m.sp = nn,

        // LD (BC)/(DE),A and back
        0x02 => m.store(m.bc(), m.a),
        0x12 => m.store(m.de(), m.a),
        0x0A => m.a = m.load(m.bc()),
        0x1A => m.a = m.load(m.de()),

        // LD (nn),HL / LD HL,(nn) / LD (nn),A / LD A,(nn)
        0x22 => m.store16(nn, hl_like(m, prefix)),
        0x2A => {
            let v = m.load16(nn);
            set_hl_like(m, prefix, v);
        }
        0x32 => m.store(nn, m.a),
        0x3A => m.a = m.load(nn),

        // 16-bit INC/DEC (no flags)
        0x03 => m.set_bc(m.bc().wrapping_add(1)),
        0x13 => m.set_de(m.de().wrapping_add(1)),
        0x23 => set_hl_like(m, prefix, hl_like(m, prefix).wrapping_add(1)),
        0x33 => m.sp = m.sp.wrapping_add(1),
        0x0B => m.set_bc(m.bc().wrapping_sub(1)),
        0x1B => m.set_de(m.de().wrapping_sub(1)),
        0x2B => set_hl_like(m, prefix, hl_like(m, prefix).wrapping_sub(1)),
        0x3B => m.sp = m.sp.wrapping_sub(1),

        // ADD HL,rr: S, Z and P/V survive
        0x09 | 0x19 | 0x29 | 0x39 => {
            let rhs = match op {
                0x09 => m.bc(),
                0x19 => m.de(),
                0x29 => hl_like(m, prefix),
                _ => m.sp,
            };
            let (old_s, old_z, old_p) = (m.f.s, m.f.z, m.f.p);
            m.internal = hl_like(m, prefix);
            let sum = alu::add16(m, m.internal, rhs, false);
            set_hl_like(m, prefix, sum);
            m.f.s = old_s;
            m.f.z = old_z;
            m.f.p = old_p;
        }

        // accumulator rotates
        0x07 => {
            m.f.c = m.a & 0x80 != 0;
            m.a = m.a.rotate_left(1);
            alu::acc_rotate_flags(m);
        }
        0x0F => {
            m.f.c = m.a & 0x01 != 0;
            m.a = m.a.rotate_right(1);
            alu::acc_rotate_flags(m);
        }
        0x17 => {
            let carry_in = m.f.c as u8;
            m.f.c = m.a & 0x80 != 0;
            m.a = (m.a << 1) | carry_in;
            alu::acc_rotate_flags(m);
        }
        0x1F => {
            let carry_in = (m.f.c as u8) << 7;
            m.f.c = m.a & 0x01 != 0;
            m.a = (m.a >> 1) | carry_in;
            alu::acc_rotate_flags(m);
        }

        0x27 => alu::daa(m),

        0x2F => {
            // CPL
            m.a = !m.a;
            m.f.y = m.a & 0x20 != 0;
            m.f.h = true;
            m.f.x = m.a & 0x08 != 0;
            m.f.n = true;
        }

        0x37 => {
            // SCF
            m.f.y = m.a & 0x20 != 0;
            m.f.h = false;
            m.f.x = m.a & 0x08 != 0;
            m.f.n = false;
            m.f.c = true;
        }

        0x3F => {
            // CCF
            m.f.y = m.a & 0x20 != 0;
            m.f.x = m.a & 0x08 != 0;
            m.f.h = m.f.c;
            m.f.n = false;
            m.f.c = !m.f.c;
        }

        // 8-bit INC/DEC preserve carry
        0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
            let code = (op >> 3) & 7;
            let v = read8(m, code, 0, prefix, disp);
            let old_c = m.f.c;
            let r = alu::add8(m, v, 1, false);
            m.f.c = old_c;
            write8(m, code, 0, prefix, disp, r);
        }
        0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
            let code = (op >> 3) & 7;
            let v = read8(m, code, 0, prefix, disp);
            let old_c = m.f.c;
            let r = alu::sub8(m, v, 1, false);
            m.f.c = old_c;
            write8(m, code, 0, prefix, disp, r);
        }

        // LD r,n
        0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
            write8(m, (op >> 3) & 7, 0, prefix, disp, lo);
        }

        0x76 => {
            // HALT: no interrupt will ever end it, so the machine spins
            // on the instruction until a signal or dispatch budget stops
            // the loop.
            if !m.halt_logged {
                log::warn!("0x{:04x}: HALT executed", m.pc.wrapping_sub(1));
                m.halt_logged = true;
            }
            m.pc = m.pc.wrapping_sub(1);
        }

        // LD r,r'
        0x40..=0x7F => {
            let dst = (op >> 3) & 7;
            let src = op & 7;
            let v = read8(m, src, dst, prefix, disp);
            write8(m, dst, src, prefix, disp, v);
        }

        // ALU A,r
        0x80..=0xBF => {
            let v = read8(m, op & 7, 0, prefix, disp);
            alu_op(m, (op >> 3) & 7, v);
        }

        // ALU A,n
        0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
            alu_op(m, (op >> 3) & 7, lo);
        }

        0xC3 => m.pc = nn,
        0xC9 => m.ret(),
        0xCD => {
            m.push(m.pc);
            m.pc = nn;
        }

        0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
            if condition(m, (op >> 3) & 7) {
                m.pc = nn;
            }
        }
        0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
            if condition(m, (op >> 3) & 7) {
                m.push(m.pc);
                m.pc = nn;
            }
        }
        0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
            if condition(m, (op >> 3) & 7) {
                m.ret();
            }
        }

        0xC1 | 0xD1 | 0xE1 | 0xF1 => {
            let word = m.pop();
            match op {
                0xC1 => m.set_bc(word),
                0xD1 => m.set_de(word),
                0xE1 => set_hl_like(m, prefix, word),
                _ => {
                    m.a = (word >> 8) as u8;
                    m.f = crate::machine::Flags::from_byte(word as u8);
                }
            }
        }
        0xC5 | 0xD5 | 0xE5 | 0xF5 => {
            let word = match op {
                0xC5 => m.bc(),
                0xD5 => m.de(),
                0xE5 => hl_like(m, prefix),
                _ => (m.a as u16) << 8 | m.f.to_byte() as u16,
            };
            m.push(word);
        }

        0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
            m.push(m.pc);
            m.pc = (op & 0x38) as u16;
        }

        0xD3 => {
            // OUT (n),A: no ports exist
        }
        0xDB => {
            // IN A,(n): ports read as zero
            m.a = 0;
        }

        0xD9 => {
            // EXX
            std::mem::swap(&mut m.b, &mut m.alt_b);
            std::mem::swap(&mut m.c, &mut m.alt_c);
            std::mem::swap(&mut m.d, &mut m.alt_d);
            std::mem::swap(&mut m.e, &mut m.alt_e);
            std::mem::swap(&mut m.h, &mut m.alt_h);
            std::mem::swap(&mut m.l, &mut m.alt_l);
        }

        0xE3 => {
            // EX (SP),HL/IX/IY
            let stacked = m.load16(m.sp);
            let reg = hl_like(m, prefix);
            m.store16(m.sp, reg);
            set_hl_like(m, prefix, stacked);
        }

        0xE9 => m.pc = hl_like(m, prefix),

        0xEB => {
            // EX DE,HL: never touches IX/IY
            std::mem::swap(&mut m.d, &mut m.h);
            std::mem::swap(&mut m.e, &mut m.l);
        }

        0xF3 => m.iff = false,
        0xFB => m.iff = true,
        0xF9 => m.sp = hl_like(m, prefix),

        // 0xCB/0xDD/0xED/0xFD are consumed before this table is reached.
        _ => {}
    }
}

/// The eight accumulator operations selected by bits 3..5.
fn alu_op(m: &mut Machine, which: u8, v: u8) {
    match which {
        0 => m.a = alu::add8(m, m.a, v, false),
        1 => {
            let c = m.f.c;
            m.a = alu::add8(m, m.a, v, c);
        }
        2 => m.a = alu::sub8(m, m.a, v, false),
        3 => {
            let c = m.f.c;
            m.a = alu::sub8(m, m.a, v, c);
        }
        4 => {
            m.a &= v;
            m.f.h = true;
            alu::logic_flags(m);
        }
        5 => {
            m.a ^= v;
            m.f.h = false;
            alu::logic_flags(m);
        }
        6 => {
            m.a |= v;
            m.f.h = false;
            alu::logic_flags(m);
        }
        _ => {
            // CP: Y and X come from the operand, not the difference
            alu::sub8(m, m.a, v, false);
            m.f.y = v & 0x20 != 0;
            m.f.x = v & 0x08 != 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with(program: &[u8]) -> Machine {
        let mut m = Machine::new();
        m.mem[0x0100..0x0100 + program.len()].copy_from_slice(program);
        m.pc = 0x0100;
        m.sp = 0xF000;
        m
    }

    fn run(m: &mut Machine, steps: usize) {
        let mut counters = Counters::new(false);
        for _ in 0..steps {
            step(m, &mut counters);
        }
    }

    #[test]
    fn last_prefix_wins() {
        // DD FD 21 34 12 = LD IY,0x1234 (the DD is discarded)
        let mut m = machine_with(&[0xDD, 0xFD, 0x21, 0x34, 0x12]);
        run(&mut m, 1);
        assert_eq!(m.iy(), 0x1234);
        assert_eq!(m.ix(), 0);
        assert_eq!(m.hl(), 0);
        // four M1 fetches: DD, FD, 21 and nothing else
        assert_eq!(m.r, 3);
    }

    #[test]
    fn indexed_load_with_displacement() {
        // LD A,(IX-2)
        let mut m = machine_with(&[0xDD, 0x7E, 0xFE]);
        m.set_ix(0x2002);
        m.store(0x2000, 0x5A);
        run(&mut m, 1);
        assert_eq!(m.a, 0x5A);
        assert_eq!(m.internal, 0x2000);
    }

    #[test]
    fn prefixed_halves() {
        // LD IXH,0x42 via DD 26 42, then LD A,IXH via DD 7C
        let mut m = machine_with(&[0xDD, 0x26, 0x42, 0xDD, 0x7C]);
        run(&mut m, 2);
        assert_eq!(m.ixh, 0x42);
        assert_eq!(m.a, 0x42);
        assert_eq!(m.h, 0);
    }

    #[test]
    fn halving_suppressed_next_to_memory_operand() {
        // LD H,(IX+1) must load H, not IXH
        let mut m = machine_with(&[0xDD, 0x66, 0x01]);
        m.set_ix(0x3000);
        m.store(0x3001, 0x77);
        run(&mut m, 1);
        assert_eq!(m.h, 0x77);
        assert_eq!(m.ixh, 0x30);
    }

    #[test]
    fn immediate_after_displacement() {
        // LD (IX+3),0xAB: displacement byte comes before the immediate
        let mut m = machine_with(&[0xDD, 0x36, 0x03, 0xAB]);
        m.set_ix(0x4000);
        run(&mut m, 1);
        assert_eq!(m.load(0x4003), 0xAB);
    }

    #[test]
    fn cp_copies_yx_from_operand() {
        // CP 0x28 with A=0x28: zero result, but Y/X mirror the operand
        let mut m = machine_with(&[0xFE, 0x28]);
        m.a = 0x28;
        run(&mut m, 1);
        assert!(m.f.z);
        assert!(m.f.y);
        assert!(m.f.x);
    }

    #[test]
    fn djnz_loops() {
        // LD B,3; label: DJNZ label; (falls through with B=0)
        let mut m = machine_with(&[0x06, 0x03, 0x10, 0xFE]);
        run(&mut m, 4);
        assert_eq!(m.b, 0);
        assert_eq!(m.pc, 0x0104);
    }

    #[test]
    fn halt_spins_in_place() {
        let mut m = machine_with(&[0x76]);
        run(&mut m, 3);
        assert_eq!(m.pc, 0x0100);
        assert_eq!(m.term_reason, crate::machine::TermReason::NotRun);
    }

    #[test]
    fn ex_af_and_exx_swap_shadows() {
        let mut m = machine_with(&[0x08, 0xD9]);
        m.a = 0x11;
        m.f.c = true;
        m.set_bc(0x2233);
        run(&mut m, 2);
        assert_eq!(m.a, 0);
        assert!(!m.f.c);
        assert_eq!(m.alt_a, 0x11);
        assert!(m.alt_f.c);
        assert_eq!(m.bc(), 0);
        assert_eq!(u16::from_le_bytes([m.alt_c, m.alt_b]), 0x2233);
    }

    #[test]
    fn add_hl_preserves_szp() {
        // ADD HL,DE with S/Z/P set beforehand
        let mut m = machine_with(&[0x19]);
        m.set_hl(0x0FFF);
        m.set_de(0x0001);
        m.f.s = true;
        m.f.z = true;
        m.f.p = true;
        run(&mut m, 1);
        assert_eq!(m.hl(), 0x1000);
        assert!(m.f.s && m.f.z && m.f.p);
        assert!(m.f.h && !m.f.c);
    }

    #[test]
    fn call_and_ret() {
        // CALL 0x0110; ...; at 0x0110: RET
        let mut m = machine_with(&[0xCD, 0x10, 0x01]);
        m.store(0x0110, 0xC9);
        run(&mut m, 1);
        assert_eq!(m.pc, 0x0110);
        assert_eq!(m.load16(m.sp), 0x0103);
        run(&mut m, 1);
        assert_eq!(m.pc, 0x0103);
    }

    #[test]
    fn scenario_arithmetic_round_trip() {
        // LD A,1; ADD A,2; LD (0x0200),A; LD A,(0x0200); CP 3; JP Z,0x0100; HALT
        let code = [
            0x3E, 0x01, 0xC6, 0x02, 0x32, 0x00, 0x02, 0x3A, 0x00, 0x02, 0xFE, 0x03, 0xCA, 0x00,
            0x01, 0x76,
        ];
        let mut m = machine_with(&code);
        // first pass: loops back to 0x0100 because the CP matched
        run(&mut m, 6);
        assert_eq!(m.load(0x0200), 3);
        assert!(m.f.z);
        assert_eq!(m.pc, 0x0100);
        assert_eq!(m.term_reason, crate::machine::TermReason::NotRun);
    }
}
