//! The 0xCB plane: rotates, shifts (SLL included), BIT, RES and SET.
//!
//! Under a DD/FD prefix the operand is always the indexed memory cell;
//! for the non-BIT instructions the result is additionally copied into
//! the register named by bits 0..2 (the undocumented `LD r,RLC (IX+d)`
//! forms). The copy target is never an index-register half.

use super::{alu, mem_addr, write8, Prefix};
use crate::machine::Machine;

pub(super) fn exec(m: &mut Machine, prefix: Prefix, disp: i8, op: u8) {
    let reg = op & 7;

    // Operand source: indexed memory under a prefix, else (HL) or a
    // plain register.
    let (byte, addr) = if prefix != Prefix::None || reg == 6 {
        let a = mem_addr(m, prefix, disp);
        (m.load(a), Some(a))
    } else {
        (super::read8(m, reg, 0, Prefix::None, 0), None)
    };

    let result = match op & 0xC0 {
        0x00 => {
            let rotated = match op & 0x38 {
                0x00 => {
                    // RLC
                    m.f.c = byte & 0x80 != 0;
                    byte.rotate_left(1)
                }
                0x08 => {
                    // RRC
                    m.f.c = byte & 0x01 != 0;
                    byte.rotate_right(1)
                }
                0x10 => {
                    // RL
                    let carry_in = m.f.c as u8;
                    m.f.c = byte & 0x80 != 0;
                    (byte << 1) | carry_in
                }
                0x18 => {
                    // RR
                    let carry_in = (m.f.c as u8) << 7;
                    m.f.c = byte & 0x01 != 0;
                    (byte >> 1) | carry_in
                }
                0x20 => {
                    // SLA
                    m.f.c = byte & 0x80 != 0;
                    byte << 1
                }
                0x28 => {
                    // SRA
                    m.f.c = byte & 0x01 != 0;
                    (byte >> 1) | (byte & 0x80)
                }
                0x30 => {
                    // SLL: like SLA but shifts in a 1
                    m.f.c = byte & 0x80 != 0;
                    (byte << 1) | 0x01
                }
                _ => {
                    // SRL
                    m.f.c = byte & 0x01 != 0;
                    byte >> 1
                }
            };
            alu::shift_flags(m, rotated);
            rotated
        }

        0x40 => {
            // BIT: flags only, nothing written back
            let masked = byte & (1 << ((op >> 3) & 7));
            m.f.n = false;
            m.f.h = true;
            m.f.z = masked == 0;
            m.f.p = masked == 0;
            m.f.s = masked & 0x80 != 0;
            if addr.is_some() {
                // memory operand: Y and X surface bits 13/11 of the
                // internal address latch
                m.f.y = m.internal & 0x2000 != 0;
                m.f.x = m.internal & 0x0800 != 0;
            } else {
                m.f.y = masked & 0x20 != 0;
                m.f.x = masked & 0x08 != 0;
            }
            return;
        }

        0x80 => byte & !(1 << ((op >> 3) & 7)),
        _ => byte | (1 << ((op >> 3) & 7)),
    };

    match addr {
        Some(a) => {
            m.store(a, result);
            // undocumented register copy of the DDCB/FDCB forms
            if prefix != Prefix::None && reg != 6 {
                write8(m, reg, 6, Prefix::None, 0, result);
            }
        }
        None => write8(m, reg, 0, Prefix::None, 0, result),
    }
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

    fn run1(m: &mut Machine) {
        let mut counters = Counters::new(false);
        step(m, &mut counters);
    }

    #[test]
    fn rlc_register() {
        // RLC B
        let mut m = machine_with(&[0xCB, 0x00]);
        m.b = 0x81;
        run1(&mut m);
        assert_eq!(m.b, 0x03);
        assert!(m.f.c && !m.f.z && !m.f.s);
        assert!(m.f.p); // 0x03 has even parity
    }

    #[test]
    fn sll_shifts_in_one() {
        // SLL A
        let mut m = machine_with(&[0xCB, 0x37]);
        m.a = 0x80;
        run1(&mut m);
        assert_eq!(m.a, 0x01);
        assert!(m.f.c);
    }

    #[test]
    fn sra_keeps_sign() {
        // SRA A
        let mut m = machine_with(&[0xCB, 0x2F]);
        m.a = 0x81;
        run1(&mut m);
        assert_eq!(m.a, 0xC0);
        assert!(m.f.c && m.f.s);
    }

    #[test]
    fn bit_on_register_copies_yx_from_value() {
        // BIT 5,A with bit set
        let mut m = machine_with(&[0xCB, 0x6F]);
        m.a = 0x20;
        run1(&mut m);
        assert!(!m.f.z && m.f.y && !m.f.x && m.f.h && !m.f.n);
    }

    #[test]
    fn bit_on_indexed_memory_takes_yx_from_address() {
        // BIT 0,(IX+0) with IX pointing at 0x2A00: bits 13/11 of the
        // effective address are 1/1
        let mut m = machine_with(&[0xDD, 0xCB, 0x00, 0x46]);
        m.set_ix(0x2A00);
        m.store(0x2A00, 0x01);
        run1(&mut m);
        assert!(!m.f.z);
        assert!(m.f.y && m.f.x);
    }

    #[test]
    fn ddcb_set_copies_to_register() {
        // SET 7,(IX+1) -> B (DD CB 01 F8)
        let mut m = machine_with(&[0xDD, 0xCB, 0x01, 0xF8]);
        m.set_ix(0x3000);
        m.store(0x3001, 0x01);
        run1(&mut m);
        assert_eq!(m.load(0x3001), 0x81);
        assert_eq!(m.b, 0x81);
    }

    #[test]
    fn res_memory_operand() {
        // RES 0,(HL)
        let mut m = machine_with(&[0xCB, 0x86]);
        m.set_hl(0x2000);
        m.store(0x2000, 0xFF);
        run1(&mut m);
        assert_eq!(m.load(0x2000), 0xFE);
    }
}
