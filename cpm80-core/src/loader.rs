//! Program loading and the initial memory image.
//!
//! Resolves the command name (host path or `drive:name`), reads the
//! `.com` image into the TPA, and builds everything a CP/M 2.2 program
//! expects to find around itself: the zero page, the BDOS and BIOS
//! stubs jumping into the magic page, the serial number, the CCP
//! stack, a fake DPB and allocation vector, the command tail, and the
//! two default FCBs.

use std::io::Read;
use std::path::PathBuf;

use crate::bdos::fcb;
use crate::config::Config;
use crate::error::{CpmError, CpmResult};
use crate::machine::{Machine, BIOS_VECTOR_COUNT, MAGIC_ADDRESS};

// Memory layout, top down. Everything between TPA_START and BDOS_START
// belongs to the program.
pub const ALV_SIZE: u16 = 64;
pub const ALV: u16 = MAGIC_ADDRESS - ALV_SIZE;
pub const DPB_SIZE: u16 = 15;
pub const DPB: u16 = ALV - DPB_SIZE;
pub const BIOS_VECTOR: u16 = DPB - (BIOS_VECTOR_COUNT as u16) * 3;
pub const BDOS_SIZE: u16 = 11;
pub const BDOS_START: u16 = BIOS_VECTOR - BDOS_SIZE;
pub const SERIAL_NUMBER: u16 = BDOS_START - 6;
pub const CCP_STACK_COUNT: u16 = 8;
pub const CCP_STACK: u16 = SERIAL_NUMBER - CCP_STACK_COUNT * 2;
pub const TPA_START: u16 = 0x0100;

// Zero page.
pub const BOOT: u16 = 0x0000;
pub const IOBYTE: u16 = 0x0003;
pub const DRVUSER: u16 = 0x0004;
pub const BDOS_ENTRY: u16 = 0x0005;
pub const DEFAULT_FCB_1: u16 = 0x005C;
pub const DEFAULT_FCB_2: u16 = 0x006C;
pub const DEFAULT_DMA: u16 = 0x0080;
pub const DMA_SIZE: u16 = 128;

/// The WBOOT entry of the BIOS vector, where `JP 0` ends up.
pub const WBOOT: u16 = BIOS_VECTOR + 3;

const SERIAL: [u8; 6] = [0x00, 0x16, 0x00, 0xC0, 0xFF, 0xEE];

const JP: u8 = 0xC3;
const RET: u8 = 0xC9;

/// Check a command base name: CP/M compatible and ending in `.com` or
/// nothing (in which case `.com` is appended by the caller).
fn check_command_name(name: &str) -> CpmResult<bool> {
    let (stem, has_ext) = match name.split_once('.') {
        Some((stem, ext)) => {
            if ext != "com" {
                return Err(CpmError::BadCommandName(name.to_string()));
            }
            (stem, true)
        }
        None => (name, false),
    };
    if !crate::bdos::is_nice_filename(stem) {
        return Err(CpmError::BadCommandName(name.to_string()));
    }
    Ok(!has_ext)
}

/// Resolve the configured command to a host path.
fn command_path(cfg: &Config) -> CpmResult<PathBuf> {
    if cfg.command.contains('/') {
        // host path
        let base = cfg
            .command
            .rsplit('/')
            .next()
            .unwrap_or(cfg.command.as_str());
        let add_com = check_command_name(base)?;
        let mut path = cfg.command.clone();
        if add_com {
            path.push_str(".com");
        }
        return Ok(PathBuf::from(path));
    }
    // CP/M-style name, optionally with a drive prefix
    let mut name = cfg.command.as_str();
    let mut drive = cfg.default_drive;
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' {
        match crate::config::parse_drive(&name[..1]) {
            Some(d) => {
                drive = d;
                name = &name[2..];
            }
            None => return Err(CpmError::BadCommandName(cfg.command.clone())),
        }
    }
    let dir = cfg.drives[drive]
        .as_ref()
        .ok_or(CpmError::DriveNotConfigured((b'a' + drive as u8) as char))?;
    let add_com = check_command_name(name)?;
    let mut file = name.to_string();
    if add_com {
        file.push_str(".com");
    }
    Ok(dir.join(file))
}

/// Load the program and construct the initial machine state.
pub fn load(cfg: &Config, m: &mut Machine) -> CpmResult<()> {
    let path = command_path(cfg)?;
    let mut file = std::fs::File::open(&path).map_err(|e| CpmError::file(&path, e))?;

    // Read into the TPA; allow growth up to the BDOS stub so an image
    // that only fits by overwriting the CCP area is caught as too big.
    let mut tpa = vec![0u8; (BDOS_START - TPA_START) as usize];
    let mut filled = 0;
    loop {
        match file.read(&mut tpa[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CpmError::file(&path, e)),
        }
        if filled == tpa.len() {
            return Err(CpmError::ProgramTooLarge(path));
        }
    }
    if filled > (CCP_STACK - TPA_START) as usize {
        return Err(CpmError::ProgramTooLarge(path));
    }
    m.mem[TPA_START as usize..TPA_START as usize + filled].copy_from_slice(&tpa[..filled]);

    // Magic page: every byte is a RET so debuggers that peek see code.
    for b in &mut m.mem[MAGIC_ADDRESS as usize..] {
        *b = RET;
    }

    // Eight-level CCP stack with a pushed return address to WBOOT.
    m.sp = SERIAL_NUMBER;
    m.sp = m.sp.wrapping_sub(1);
    m.store(m.sp, (WBOOT >> 8) as u8);
    m.sp = m.sp.wrapping_sub(1);
    m.store(m.sp, WBOOT as u8);

    m.mem[SERIAL_NUMBER as usize..SERIAL_NUMBER as usize + 6].copy_from_slice(&SERIAL);

    // BDOS stub: JP into the magic page, then four dummy error vectors
    // pointing at WBOOT's magic slot.
    m.store(BDOS_START, JP);
    m.store16(BDOS_START + 1, MAGIC_ADDRESS);
    for k in 0..4 {
        m.store16(BDOS_START + 3 + 2 * k, MAGIC_ADDRESS + 2);
    }

    // BIOS vector: one JP per magic slot.
    for i in 0..BIOS_VECTOR_COUNT as u16 {
        m.store(BIOS_VECTOR + i * 3, JP);
        m.store16(BIOS_VECTOR + i * 3 + 1, MAGIC_ADDRESS + 1 + i);
    }

    // Fake DPB, consistent with a 16K-block 8MB drive, shared by all
    // drives; the ALV only needs its directory bits.
    let dpb: [u8; DPB_SIZE as usize] = [
        32, 0, // SPT
        7,  // BSH
        127, // BLM
        7,  // EXM
        0xFF, 0x01, // DSM 511
        0xFF, 0x07, // DRM 2047
        0xF0, 0x00, // AL0/AL1
        0, 0, // CKS
        0, 0, // OFF
    ];
    m.mem[DPB as usize..(DPB + DPB_SIZE) as usize].copy_from_slice(&dpb);
    m.mem[ALV as usize..(ALV + ALV_SIZE) as usize].fill(0);
    m.store(ALV, 0xF0);
    m.store(ALV + 1, 0x00);

    // Zero page.
    m.store(BOOT, JP);
    m.store16(BOOT + 1, WBOOT);
    m.store(IOBYTE, 0x00);
    m.store(
        DRVUSER,
        cfg.default_drive as u8, // user 0 in the high nibble
    );
    m.store(BDOS_ENTRY, JP);
    m.store16(BDOS_ENTRY + 1, BDOS_START);

    // Command tail: the arguments joined by blanks, upper-cased
    // through the character set, length byte first.
    let charset = cfg.active_charset();
    let mut tail: Vec<u8> = Vec::new();
    for arg in &cfg.args {
        tail.push(b' ');
        for ch in arg.chars() {
            let upper = ch.to_uppercase().next().unwrap_or(ch);
            let code = charset
                .to_cpm(upper)
                .ok_or_else(|| CpmError::BadCommandName(arg.clone()))?;
            tail.push(code);
        }
    }
    if tail.len() >= DMA_SIZE as usize {
        return Err(CpmError::BadCommandName("command tail too long".into()));
    }
    m.store(DEFAULT_DMA, tail.len() as u8);
    m.mem[DEFAULT_DMA as usize + 1..DEFAULT_DMA as usize + 1 + tail.len()]
        .copy_from_slice(&tail);

    // Default FCBs from the first two arguments.
    let fcb1 = fcb::pack_name(cfg.args.first().map(String::as_str).unwrap_or(""), charset);
    let fcb2 = fcb::pack_name(cfg.args.get(1).map(String::as_str).unwrap_or(""), charset);
    m.mem[DEFAULT_FCB_1 as usize..DEFAULT_FCB_1 as usize + 12].copy_from_slice(&fcb1);
    m.mem[DEFAULT_FCB_2 as usize..DEFAULT_FCB_2 as usize + 12].copy_from_slice(&fcb2);

    m.pc = TPA_START;
    log::info!("starting execution of program {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::machine::Machine;

    fn temp_drive(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("cpm80-loader-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn load_with(program: &[u8], args: &[&str]) -> (Machine, PathBuf) {
        let dir = temp_drive("a");
        std::fs::write(dir.join("prog.com"), program).unwrap();
        let mut cfg = Config::default();
        cfg.drives[0] = Some(dir.clone());
        cfg.command = "prog".into();
        cfg.args = args.iter().map(|s| s.to_string()).collect();
        cfg.finalize();
        let mut m = Machine::new();
        load(&cfg, &mut m).unwrap();
        (m, dir)
    }

    #[test]
    fn zero_page_layout() {
        let (m, dir) = load_with(&[0x76], &[]);
        assert_eq!(m.load(0x0000), 0xC3);
        assert_eq!(m.load16(0x0001), WBOOT);
        assert_eq!(m.load(IOBYTE), 0);
        assert_eq!(m.load(BDOS_ENTRY), 0xC3);
        assert_eq!(m.load16(BDOS_ENTRY + 1), BDOS_START);
        // BDOS stub jumps into the magic page
        assert_eq!(m.load(BDOS_START), 0xC3);
        assert_eq!(m.load16(BDOS_START + 1), MAGIC_ADDRESS);
        // BIOS vector entry 2 (WBOOT) jumps at magic slot 2
        assert_eq!(m.load(WBOOT), 0xC3);
        assert_eq!(m.load16(WBOOT + 1), MAGIC_ADDRESS + 2);
        // magic page is all RETs
        assert!(m.mem[MAGIC_ADDRESS as usize..].iter().all(|&b| b == 0xC9));
        // program loaded at the TPA, PC points there
        assert_eq!(m.load(TPA_START), 0x76);
        assert_eq!(m.pc, TPA_START);
        // serial number in place
        assert_eq!(
            &m.mem[SERIAL_NUMBER as usize..SERIAL_NUMBER as usize + 6],
            &SERIAL
        );
        // pre-pushed WBOOT return address
        assert_eq!(m.sp, SERIAL_NUMBER - 2);
        assert_eq!(m.load16(m.sp), WBOOT);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn command_tail_and_default_fcbs() {
        let (m, dir) = load_with(&[0x00], &["in.txt", "out.txt"]);
        let len = m.load(DEFAULT_DMA) as usize;
        let tail: Vec<u8> = m.mem[DEFAULT_DMA as usize + 1..DEFAULT_DMA as usize + 1 + len].to_vec();
        assert_eq!(tail, b" IN.TXT OUT.TXT".to_vec());
        assert_eq!(&m.mem[DEFAULT_FCB_1 as usize + 1..DEFAULT_FCB_1 as usize + 9], b"IN      ");
        assert_eq!(&m.mem[DEFAULT_FCB_1 as usize + 9..DEFAULT_FCB_1 as usize + 12], b"TXT");
        assert_eq!(&m.mem[DEFAULT_FCB_2 as usize + 1..DEFAULT_FCB_2 as usize + 9], b"OUT     ");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_drive_is_an_error() {
        let mut cfg = Config::default();
        cfg.command = "b:prog".into();
        cfg.finalize();
        let mut m = Machine::new();
        assert!(matches!(
            load(&cfg, &mut m),
            Err(CpmError::DriveNotConfigured('b'))
        ));
    }

    #[test]
    fn bad_extension_rejected() {
        let mut cfg = Config::default();
        cfg.command = "prog.exe".into();
        cfg.finalize();
        let mut m = Machine::new();
        assert!(matches!(
            load(&cfg, &mut m),
            Err(CpmError::BadCommandName(_))
        ));
    }

    #[test]
    fn oversized_program_rejected() {
        let dir = temp_drive("big");
        let big = vec![0u8; (BDOS_START - TPA_START) as usize + 1];
        std::fs::write(dir.join("big.com"), big).unwrap();
        let mut cfg = Config::default();
        cfg.drives[0] = Some(dir.clone());
        cfg.command = "big".into();
        cfg.finalize();
        let mut m = Machine::new();
        assert!(matches!(
            load(&cfg, &mut m),
            Err(CpmError::ProgramTooLarge(_))
        ));
        std::fs::remove_dir_all(dir).ok();
    }
}
