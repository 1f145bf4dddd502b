//! The 0xED plane: 16-bit arithmetic with carry, direct word loads,
//! interrupt plumbing (stored but inert), RRD/RLD and the block
//! transfer/search/IO instructions.
//!
//! A DD/FD prefix in front of 0xED is ignored, as on the real chip.
//! The repeating block forms repeat by backing PC up two bytes, so each
//! iteration is re-dispatched as its own instruction.

use super::alu;
use crate::machine::Machine;

pub(super) fn exec(m: &mut Machine, op: u8) {
    match op {
        // IN r,(C): ports read as zero; 0x70 is the flags-only form
        0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
            match (op >> 3) & 7 {
                0 => m.b = 0,
                1 => m.c = 0,
                2 => m.d = 0,
                3 => m.e = 0,
                4 => m.h = 0,
                5 => m.l = 0,
                6 => {}
                _ => m.a = 0,
            }
            m.f.s = false;
            m.f.z = true;
            m.f.y = false;
            m.f.h = false;
            m.f.x = false;
            m.f.p = false;
            m.f.n = false;
        }

        // OUT (C),r: nothing listens
        0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {}

        // SBC HL,rr / ADC HL,rr
        0x42 | 0x52 | 0x62 | 0x72 => {
            m.internal = m.hl();
            let rhs = pair(m, op);
            let c = m.f.c;
            let r = alu::sub16(m, m.internal, rhs, c);
            m.set_hl(r);
        }
        0x4A | 0x5A | 0x6A | 0x7A => {
            m.internal = m.hl();
            let rhs = pair(m, op);
            let c = m.f.c;
            let r = alu::add16(m, m.internal, rhs, c);
            m.set_hl(r);
        }

        // LD (nn),rr / LD rr,(nn)
        0x43 | 0x53 | 0x63 | 0x73 => {
            let addr = fetch16(m);
            let v = pair(m, op);
            m.store16(addr, v);
        }
        0x4B | 0x5B | 0x6B | 0x7B => {
            let addr = fetch16(m);
            let v = m.load16(addr);
            set_pair(m, op, v);
        }

        // NEG and its mirrors
        0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
            m.a = alu::sub8(m, 0, m.a, false);
        }

        // RETN/RETI: no NMI and no IFF2 here, so both are a plain return
        0x45 | 0x4D | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => m.ret(),

        // IM 0/1/2: interrupt modes are stored nowhere; no interrupts fire
        0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x76 | 0x7E => {}

        0x47 => m.i = m.a,
        0x4F => m.r = m.a,
        0x57 => {
            m.a = m.i;
            ir_transfer_flags(m);
        }
        0x5F => {
            m.a = m.r;
            ir_transfer_flags(m);
        }

        0x67 => {
            // RRD: low nibble of (HL) into A, nibbles shuffle right
            let hl = m.hl();
            let t = m.load(hl);
            m.store(hl, (t >> 4) | (m.a << 4));
            m.a = (m.a & 0xF0) | (t & 0x0F);
            let a = m.a;
            alu::shift_flags(m, a);
        }
        0x6F => {
            // RLD
            let hl = m.hl();
            let t = m.load(hl);
            m.store(hl, (t << 4) | (m.a & 0x0F));
            m.a = (m.a & 0xF0) | (t >> 4);
            let a = m.a;
            alu::shift_flags(m, a);
        }

        // block transfers
        0xA0 => block_load(m, true),
        0xA8 => block_load(m, false),
        0xB0 => {
            block_load(m, true);
            if m.f.p {
                repeat(m);
            }
        }
        0xB8 => {
            block_load(m, false);
            if m.f.p {
                repeat(m);
            }
        }

        // block search
        0xA1 => block_compare(m, true),
        0xA9 => block_compare(m, false),
        0xB1 => {
            block_compare(m, true);
            if m.f.p && !m.f.z {
                repeat(m);
            }
        }
        0xB9 => {
            block_compare(m, false);
            if m.f.p && !m.f.z {
                repeat(m);
            }
        }

        // block input: the port reads zero but the side effects (and
        // the strange carry heuristics) are kept
        0xA2 => block_in(m, true),
        0xAA => block_in(m, false),
        0xB2 => {
            block_in(m, true);
            if m.b != 0 {
                repeat(m);
            }
        }
        0xBA => {
            block_in(m, false);
            if m.b != 0 {
                repeat(m);
            }
        }

        // block output: reads memory, discards the byte
        0xA3 => block_out(m, true),
        0xAB => block_out(m, false),
        0xB3 => {
            block_out(m, true);
            if m.b != 0 {
                repeat(m);
            }
        }
        0xBB => {
            block_out(m, false);
            if m.b != 0 {
                repeat(m);
            }
        }

        // everything else in the plane is a two-byte NOP
        _ => {}
    }
}

fn fetch16(m: &mut Machine) -> u16 {
    let lo = m.fetch();
    let hi = m.fetch();
    u16::from_le_bytes([lo, hi])
}

/// Register pair selected by bits 4..5 (BC, DE, HL, SP).
fn pair(m: &Machine, op: u8) -> u16 {
    match op & 0x30 {
        0x00 => m.bc(),
        0x10 => m.de(),
        0x20 => m.hl(),
        _ => m.sp,
    }
}

fn set_pair(m: &mut Machine, op: u8, v: u16) {
    match op & 0x30 {
        0x00 => m.set_bc(v),
        0x10 => m.set_de(v),
        0x20 => m.set_hl(v),
        _ => m.sp = v,
    }
}

/// LD A,I and LD A,R flag rule; P/V reports the interrupt flip-flop.
fn ir_transfer_flags(m: &mut Machine) {
    let a = m.a;
    m.f.s = a & 0x80 != 0;
    m.f.z = a == 0;
    m.f.y = a & 0x20 != 0;
    m.f.h = false;
    m.f.x = a & 0x08 != 0;
    m.f.p = m.iff;
    m.f.n = false;
}

/// Back PC up over the two opcode bytes so the instruction re-dispatches.
fn repeat(m: &mut Machine) {
    m.pc = m.pc.wrapping_sub(2);
}

/// LDI/LDD: Y and X come from bits 1 and 3 of transferred byte + A.
fn block_load(m: &mut Machine, up: bool) {
    let hl = m.hl();
    let de = m.de();
    let byte = m.load(hl);
    m.store(de, byte);
    let t = byte.wrapping_add(m.a);
    if up {
        m.set_hl(hl.wrapping_add(1));
        m.set_de(de.wrapping_add(1));
    } else {
        m.set_hl(hl.wrapping_sub(1));
        m.set_de(de.wrapping_sub(1));
    }
    let bc = m.bc().wrapping_sub(1);
    m.set_bc(bc);
    m.f.y = t & 0x02 != 0;
    m.f.h = false;
    m.f.x = t & 0x08 != 0;
    m.f.p = bc != 0;
    m.f.n = false;
}

/// CPI/CPD: compare without carry update; Y and X come from the
/// difference adjusted by the half-borrow.
fn block_compare(m: &mut Machine, up: bool) {
    let old_c = m.f.c;
    let hl = m.hl();
    let byte = m.load(hl);
    let t = alu::sub8(m, m.a, byte, false).wrapping_add(m.f.h as u8);
    m.set_hl(if up {
        hl.wrapping_add(1)
    } else {
        hl.wrapping_sub(1)
    });
    let bc = m.bc().wrapping_sub(1);
    m.set_bc(bc);
    m.f.y = t & 0x02 != 0;
    m.f.x = t & 0x08 != 0;
    m.f.p = bc != 0;
    m.f.c = old_c;
}

/// INI/IND: writes the (zero) port byte, decrements B, and applies the
/// documented-by-reverse-engineering carry heuristics.
fn block_in(m: &mut Machine, up: bool) {
    let hl = m.hl();
    let byte = 0u8;
    m.store(hl, byte);
    m.set_hl(if up {
        hl.wrapping_add(1)
    } else {
        hl.wrapping_sub(1)
    });
    let k = byte as u16
        + if up {
            m.c.wrapping_add(1) as u16
        } else {
            m.c.wrapping_sub(1) as u16
        };
    let new_n = byte & 0x80 != 0;
    let carry = k > 0xFF;
    let p = alu::parity((k as u8 & 7) ^ m.b.wrapping_sub(1));
    m.b = alu::sub8(m, m.b, 1, false);
    m.f.c = carry;
    m.f.h = carry;
    m.f.n = new_n;
    m.f.p = p;
}

/// OUTI/OUTD: reads memory for a port nobody listens to.
fn block_out(m: &mut Machine, up: bool) {
    let hl = m.hl();
    let byte = m.load(hl);
    m.set_hl(if up {
        hl.wrapping_add(1)
    } else {
        hl.wrapping_sub(1)
    });
    let k = byte as u16 + m.l as u16;
    let new_n = byte & 0x80 != 0;
    let carry = k > 0xFF;
    let p = alu::parity((k as u8 & 7) ^ m.b.wrapping_sub(1));
    m.b = alu::sub8(m, m.b, 1, false);
    m.f.c = carry;
    m.f.h = carry;
    m.f.n = new_n;
    m.f.p = p;
}

#[cfg(test)]
mod tests {
    use crate::cpu::{step, Counters};
    use crate::machine::Machine;

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
    fn ldir_copies_and_repeats() {
        // LDIR copying 4 bytes; each iteration is one dispatched step
        let mut m = machine_with(&[0xED, 0xB0]);
        m.set_hl(0x2000);
        m.set_de(0x3000);
        m.set_bc(4);
        for i in 0..4 {
            m.store(0x2000 + i, 0x40 + i as u8);
        }
        run(&mut m, 4);
        for i in 0..4 {
            assert_eq!(m.load(0x3000 + i), 0x40 + i as u8);
        }
        assert_eq!(m.bc(), 0);
        assert!(!m.f.p);
        assert_eq!(m.pc, 0x0102);
        assert_eq!(m.hl(), 0x2004);
        assert_eq!(m.de(), 0x3004);
    }

    #[test]
    fn ldir_backs_up_pc_while_counting() {
        let mut m = machine_with(&[0xED, 0xB0]);
        m.set_hl(0x2000);
        m.set_de(0x3000);
        m.set_bc(2);
        run(&mut m, 1);
        assert_eq!(m.pc, 0x0100);
        assert!(m.f.p);
    }

    #[test]
    fn cpir_stops_on_match() {
        let mut m = machine_with(&[0xED, 0xB1]);
        m.a = 0x42;
        m.set_hl(0x2000);
        m.set_bc(10);
        m.store(0x2002, 0x42);
        run(&mut m, 3);
        assert!(m.f.z);
        assert_eq!(m.hl(), 0x2003);
        assert_eq!(m.bc(), 7);
        assert!(m.f.p);
        assert_eq!(m.pc, 0x0102);
    }

    #[test]
    fn cpi_preserves_carry() {
        let mut m = machine_with(&[0xED, 0xA1]);
        m.a = 0;
        m.f.c = true;
        m.set_hl(0x2000);
        m.set_bc(1);
        m.store(0x2000, 1);
        run(&mut m, 1);
        assert!(m.f.c);
        assert!(!m.f.p);
        assert!(m.f.n);
    }

    #[test]
    fn sbc_hl_full_flags() {
        // SBC HL,DE
        let mut m = machine_with(&[0xED, 0x52]);
        m.set_hl(0x4000);
        m.set_de(0x4000);
        m.f.c = false;
        run(&mut m, 1);
        assert_eq!(m.hl(), 0);
        assert!(m.f.z && m.f.n && !m.f.c);
    }

    #[test]
    fn ld_nn_dereferences(){
        // LD (0x2000),BC then LD SP,(0x2000)
        let mut m = machine_with(&[0xED, 0x43, 0x00, 0x20, 0xED, 0x7B, 0x00, 0x20]);
        m.set_bc(0xCAFE);
        run(&mut m, 2);
        assert_eq!(m.load16(0x2000), 0xCAFE);
        assert_eq!(m.sp, 0xCAFE);
    }

    #[test]
    fn in_r_c_reads_zero_with_flags() {
        // IN A,(C)
        let mut m = machine_with(&[0xED, 0x78]);
        m.a = 0x55;
        run(&mut m, 1);
        assert_eq!(m.a, 0);
        assert!(m.f.z && !m.f.s && !m.f.n && !m.f.h);
    }

    #[test]
    fn neg_negates() {
        let mut m = machine_with(&[0xED, 0x44]);
        m.a = 1;
        run(&mut m, 1);
        assert_eq!(m.a, 0xFF);
        assert!(m.f.c && m.f.n && m.f.s);
    }

    #[test]
    fn rld_rotates_nibbles() {
        let mut m = machine_with(&[0xED, 0x6F]);
        m.a = 0x7A;
        m.set_hl(0x2000);
        m.store(0x2000, 0x31);
        run(&mut m, 1);
        assert_eq!(m.a, 0x73);
        assert_eq!(m.load(0x2000), 0x1A);
    }

    #[test]
    fn rrd_rotates_nibbles() {
        let mut m = machine_with(&[0xED, 0x67]);
        m.a = 0x84;
        m.set_hl(0x2000);
        m.store(0x2000, 0x20);
        run(&mut m, 1);
        assert_eq!(m.a, 0x80);
        assert_eq!(m.load(0x2000), 0x42);
    }

    #[test]
    fn ld_a_r_reports_iff() {
        // EI; LD A,R
        let mut m = machine_with(&[0xFB, 0xED, 0x5F]);
        run(&mut m, 2);
        assert!(m.f.p);
        // R counted the three M1 fetches
        assert_eq!(m.a, 3);
    }
}
