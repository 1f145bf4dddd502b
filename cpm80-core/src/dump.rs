//! Diagnostic dumps and the post-run memory save.
//!
//! The machine dump goes to the log: registers, flags as a letter
//! string, the shadow set, and a hex+ASCII rendition of a memory
//! range. The memory save writes a configured range to a host file,
//! either as raw bytes or as Intel-HEX records.

use std::io::Write;
use std::path::Path;

use crate::error::{CpmError, CpmResult};
use crate::machine::Machine;

/// Hex+ASCII lines for a memory range, 16 bytes per line.
pub fn hex_lines(mem: &[u8], start: usize, len: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let end = (start + len).min(mem.len());
    let mut addr = start;
    while addr < end {
        let chunk = &mem[addr..(addr + 16).min(end)];
        let mut line = format!("{addr:04x}:");
        for (i, b) in chunk.iter().enumerate() {
            if i == 8 {
                line.push(' ');
            }
            line.push_str(&format!(" {b:02x}"));
        }
        line.push_str(&"   ".repeat(16 - chunk.len()));
        if chunk.len() <= 8 {
            line.push(' ');
        }
        line.push_str("  |");
        for &b in chunk {
            line.push(if (0x20..0x7F).contains(&b) {
                b as char
            } else {
                '.'
            });
        }
        line.push('|');
        lines.push(line);
        addr += 16;
    }
    lines
}

/// Log a guest-memory range at trace level.
pub fn log_memory(mem: &[u8], start: usize, len: usize) {
    for line in hex_lines(mem, start, len) {
        log::trace!("{line}");
    }
}

/// Full machine-state dump to the log.
pub fn dump_machine(m: &Machine, label: &str) {
    log::warn!("start of {label} machine dump");
    log::warn!(
        "a={:02x} f={} bc={:04x} de={:04x} hl={:04x}",
        m.a,
        m.f.letters(),
        m.bc(),
        m.de(),
        m.hl()
    );
    log::warn!(
        "a'={:02x} f'={} bc'={:04x} de'={:04x} hl'={:04x}",
        m.alt_a,
        m.alt_f.letters(),
        u16::from_le_bytes([m.alt_c, m.alt_b]),
        u16::from_le_bytes([m.alt_e, m.alt_d]),
        u16::from_le_bytes([m.alt_l, m.alt_h])
    );
    log::warn!(
        "ix={:04x} iy={:04x} sp={:04x} pc={:04x} r={:02x} i={:02x}",
        m.ix(),
        m.iy(),
        m.sp,
        m.pc,
        m.r,
        m.i
    );
    log::warn!(
        "interrupts {}",
        if m.iff { "enabled" } else { "disabled" }
    );
    for line in hex_lines(&m.mem[..], 0, m.mem.len()) {
        log::warn!("{line}");
    }
    log::warn!("end of {label} machine dump");
}

/// Save `[start, end]` of guest memory as raw bytes.
pub fn save_binary(mem: &[u8], path: &Path, start: u16, end: u16) -> CpmResult<()> {
    let mut file = std::fs::File::create(path).map_err(|e| CpmError::file(path, e))?;
    file.write_all(&mem[start as usize..=end as usize])
        .map_err(|e| CpmError::file(path, e))?;
    Ok(())
}

/// Save `[start, end]` of guest memory as Intel-HEX: type-0 records of
/// at most 32 bytes followed by a type-1 EOF record addressed at
/// `start`, each with the standard two's-complement checksum.
pub fn save_hex(mem: &[u8], path: &Path, start: u16, end: u16) -> CpmResult<()> {
    let mut out = String::new();
    let mut addr = start as usize;
    let last = end as usize;
    while addr <= last {
        let n = (last - addr + 1).min(32);
        let chunk = &mem[addr..addr + n];
        let mut checksum = n as u8;
        checksum = checksum
            .wrapping_add((addr >> 8) as u8)
            .wrapping_add(addr as u8);
        out.push_str(&format!(":{n:02X}{addr:04X}00"));
        for &b in chunk {
            out.push_str(&format!("{b:02X}"));
            checksum = checksum.wrapping_add(b);
        }
        out.push_str(&format!("{:02X}\n", checksum.wrapping_neg()));
        addr += n;
    }
    let checksum = ((start >> 8) as u8)
        .wrapping_add(start as u8)
        .wrapping_add(1)
        .wrapping_neg();
    out.push_str(&format!(":00{start:04X}01{checksum:02X}\n"));
    std::fs::write(path, out).map_err(|e| CpmError::file(path, e))?;
    Ok(())
}
