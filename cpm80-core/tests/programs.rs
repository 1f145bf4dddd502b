//! End-to-end tests: whole guest programs running through the
//! dispatch loop against temp-directory drives and a headless console.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpm80_core::bdos::fcb::FCB_SIZE;
use cpm80_core::{Config, Emulator, HeadlessConsole, TermReason};

/// Temp directory that disappears with the test.
struct TempDrive(PathBuf);

impl TempDrive {
    fn new(tag: &str) -> Self {
        let mut dir = std::env::temp_dir();
        dir.push(format!("cpm80-it-{}-{tag}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    fn path(&self) -> &PathBuf {
        &self.0
    }
}

impl Drop for TempDrive {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.0).ok();
    }
}

struct Harness {
    emulator: Emulator,
    output: Arc<Mutex<Vec<u8>>>,
    stop: Arc<AtomicBool>,
    _drive: TempDrive,
}

fn harness(tag: &str, program: &[u8], args: &[&str], input: &[u8]) -> Harness {
    let drive = TempDrive::new(tag);
    std::fs::write(drive.path().join("prog.com"), program).unwrap();
    let mut cfg = Config::default();
    cfg.drives[0] = Some(drive.path().clone());
    cfg.command = "prog".into();
    cfg.args = args.iter().map(|s| s.to_string()).collect();
    cfg.finalize();
    let (console, output) = HeadlessConsole::with_capture(input);
    let stop = Arc::new(AtomicBool::new(false));
    let emulator = Emulator::new(&cfg, Box::new(console), stop.clone()).unwrap();
    Harness {
        emulator,
        output,
        stop,
        _drive: drive,
    }
}

#[test]
fn arithmetic_round_trip() {
    // LD A,1; ADD A,2; LD (0x0200),A; LD A,(0x0200); CP 3; JP Z,0x0100;
    // HALT -- loops forever through the CP match, so run on a budget
    let program = [
        0x3E, 0x01, 0xC6, 0x02, 0x32, 0x00, 0x02, 0x3A, 0x00, 0x02, 0xFE, 0x03, 0xCA, 0x00, 0x01,
        0x76,
    ];
    let mut h = harness("arith", &program, &[], b"");
    h.emulator.run_steps(100);
    assert_eq!(h.emulator.machine.load(0x0200), 3);
    assert!(h.emulator.machine.f.z);
    assert_eq!(h.emulator.machine.term_reason, TermReason::NotRun);

    // an external signal ends it with zero further instructions
    h.stop.store(true, Ordering::Relaxed);
    assert_eq!(h.emulator.run_steps(100), 0);
    assert_eq!(h.emulator.run(), TermReason::Signal);
}

#[test]
fn bdos_print_string() {
    // LD DE,0x010E; LD C,9; CALL 5; JP 0; db "Hello$"
    let program = [
        0x11, 0x0B, 0x01, 0x0E, 0x09, 0xCD, 0x05, 0x00, 0xC3, 0x00, 0x00, b'H', b'e', b'l', b'l',
        b'o', b'$',
    ];
    let mut h = harness("print", &program, &[], b"");
    let reason = h.emulator.run();
    assert_eq!(reason, TermReason::Term);
    assert_eq!(h.output.lock().unwrap().as_slice(), b"Hello");
}

#[test]
fn file_create_write_read() {
    // make test.dat; set DMA 0x0200; fill with 0xAA; write sequential;
    // close; open; clear CR; set DMA 0x0300; read sequential; JP 0
    #[rustfmt::skip]
    let program = [
        0x0E, 0x16, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // make file
        0x0E, 0x1A, 0x11, 0x00, 0x02, 0xCD, 0x05, 0x00, // set dma 0x0200
        0x21, 0x00, 0x02, 0x06, 0x80,                   // HL=0x0200 B=128
        0x36, 0xAA, 0x23, 0x10, 0xFB,                   // fill loop
        0x0E, 0x15, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // write sequential
        0x0E, 0x10, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // close file
        0x0E, 0x0F, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // open file
        0xAF, 0x32, 0x7C, 0x00,                         // clear CR
        0x0E, 0x1A, 0x11, 0x00, 0x03, 0xCD, 0x05, 0x00, // set dma 0x0300
        0x0E, 0x14, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // read sequential
        0xC3, 0x00, 0x00,                               // warm boot
    ];
    let mut h = harness("rw", &program, &["test.dat"], b"");
    let reason = h.emulator.run();
    assert_eq!(reason, TermReason::Term);
    assert_eq!(h.emulator.machine.a, 0, "final read must succeed");
    assert!(h.emulator.machine.mem[0x0300..0x0380].iter().all(|&b| b == 0xAA));
    let data = std::fs::read(h._drive.path().join("test.dat")).unwrap();
    assert_eq!(data, vec![0xAA; 128]);
    assert_eq!(h.emulator.finish(), 0);
}

#[test]
fn sequential_read_hits_eof() {
    // open in.dat (one record); read twice; second read leaves A=1
    #[rustfmt::skip]
    let program = [
        0x0E, 0x0F, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // open file
        0x0E, 0x14, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // read (record 0)
        0x0E, 0x14, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // read (EOF)
        0xC3, 0x00, 0x00,
    ];
    let h = harness("eof", &program, &["in.dat"], b"");
    std::fs::write(h._drive.path().join("in.dat"), vec![0x55u8; 128]).unwrap();
    let mut h = h;
    assert_eq!(h.emulator.run(), TermReason::Term);
    assert_eq!(h.emulator.machine.a, 0x01);
    // the first record landed in the default DMA buffer
    assert!(h.emulator.machine.mem[0x0080..0x0100].iter().all(|&b| b == 0x55));
}

#[test]
fn short_record_padded_with_sub() {
    #[rustfmt::skip]
    let program = [
        0x0E, 0x0F, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // open file
        0x0E, 0x14, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // read
        0xC3, 0x00, 0x00,
    ];
    let h = harness("pad", &program, &["in.dat"], b"");
    std::fs::write(h._drive.path().join("in.dat"), b"AB").unwrap();
    let mut h = h;
    assert_eq!(h.emulator.run(), TermReason::Term);
    assert_eq!(&h.emulator.machine.mem[0x0080..0x0082], b"AB");
    assert!(h.emulator.machine.mem[0x0082..0x0100].iter().all(|&b| b == 0x1A));
}

#[test]
fn ambiguous_search_enumerates_directory() {
    // search first/next/next on ????????.txt; record A after each call
    #[rustfmt::skip]
    let program = [
        0x0E, 0x11, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // search first
        0x32, 0x00, 0x20,                               // A -> 0x2000
        0x21, 0x80, 0x00, 0x11, 0x00, 0x21, 0x01, 0x20, 0x00, // LD HL,0x80; LD DE,0x2100; LD BC,0x20
        0xED, 0xB0,                                     // LDIR: copy entry 1
        0x0E, 0x12, 0xCD, 0x05, 0x00,                   // search next
        0x32, 0x01, 0x20,                               // A -> 0x2001
        0x21, 0x80, 0x00, 0x11, 0x20, 0x21, 0x01, 0x20, 0x00, // copy entry 2 to 0x2120
        0xED, 0xB0,
        0x0E, 0x12, 0xCD, 0x05, 0x00,                   // search next
        0x32, 0x02, 0x20,                               // A -> 0x2002
        0xC3, 0x00, 0x00,
    ];
    let h = harness("search", &program, &["????????.txt"], b"");
    std::fs::write(h._drive.path().join("a.txt"), b"x").unwrap();
    std::fs::write(h._drive.path().join("b.txt"), b"y").unwrap();
    std::fs::write(h._drive.path().join("readme"), b"z").unwrap();
    let mut h = h;
    assert_eq!(h.emulator.run(), TermReason::Term);
    let m = &h.emulator.machine;
    assert_eq!(m.load(0x2000), 0x00);
    assert_eq!(m.load(0x2001), 0x00);
    assert_eq!(m.load(0x2002), 0xFF);
    // both entries surfaced exactly once, in directory order
    let entry = |base: usize| m.mem[base + 1..base + 12].to_vec();
    let mut names = vec![entry(0x2100), entry(0x2120)];
    names.sort();
    assert_eq!(names[0], b"A       TXT".to_vec());
    assert_eq!(names[1], b"B       TXT".to_vec());
}

#[test]
fn make_file_on_readonly_drive_is_fatal() {
    // BDOS 22 on drive B:, which is configured read-only
    let program = [0x0E, 0x16, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, 0xC3, 0x00, 0x00];
    let drive_a = TempDrive::new("roa");
    let drive_b = TempDrive::new("rob");
    std::fs::write(drive_a.path().join("prog.com"), program).unwrap();
    let mut cfg = Config::default();
    cfg.drives[0] = Some(drive_a.path().clone());
    cfg.drives[1] = Some(drive_b.path().clone());
    cfg.readonly[1] = true;
    cfg.command = "prog".into();
    cfg.args = vec!["b:newfile.dat".into()];
    cfg.finalize();
    let (console, _) = HeadlessConsole::with_capture(b"");
    let stop = Arc::new(AtomicBool::new(false));
    let mut emulator = Emulator::new(&cfg, Box::new(console), stop).unwrap();
    assert_eq!(emulator.run(), TermReason::RoDisk);
    assert!(std::fs::read_dir(drive_b.path()).unwrap().next().is_none());
    assert_eq!(emulator.finish(), 1);
}

#[test]
fn delete_with_wildcard_removes_all_matches() {
    // BDOS 19 with *.tmp in the default FCB
    let program = [0x0E, 0x13, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, 0xC3, 0x00, 0x00];
    let h = harness("del", &program, &["*.tmp"], b"");
    std::fs::write(h._drive.path().join("one.tmp"), b"1").unwrap();
    std::fs::write(h._drive.path().join("two.tmp"), b"2").unwrap();
    std::fs::write(h._drive.path().join("keep.txt"), b"3").unwrap();
    let mut h = h;
    assert_eq!(h.emulator.run(), TermReason::Term);
    assert!(!h._drive.path().join("one.tmp").exists());
    assert!(!h._drive.path().join("two.tmp").exists());
    assert!(h._drive.path().join("keep.txt").exists());
}

#[test]
fn random_write_leaves_sparse_zeroes() {
    // make big.dat; set random record 4; write random; JP 0
    #[rustfmt::skip]
    let program = [
        0x0E, 0x16, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // make file
        0x3E, 0x04, 0x32, 0x7D, 0x00,                   // r0 = 4
        0x0E, 0x22, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // write random
        0xC3, 0x00, 0x00,
    ];
    let mut h = harness("sparse", &program, &["big.dat"], b"");
    // the default DMA holds the command tail; whatever it is, it gets
    // written as record 4
    assert_eq!(h.emulator.run(), TermReason::Term);
    let data = std::fs::read(h._drive.path().join("big.dat")).unwrap();
    assert_eq!(data.len(), 5 * 128);
    assert!(data[..4 * 128].iter().all(|&b| b == 0));
}

#[test]
fn tampered_fcb_id_is_fatal() {
    // open, corrupt the ID check bytes, read
    #[rustfmt::skip]
    let program = [
        0x0E, 0x0F, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // open file
        0x3E, 0x99, 0x32, 0x6E, 0x00,                   // clobber byte 18
        0x0E, 0x14, 0x11, 0x5C, 0x00, 0xCD, 0x05, 0x00, // read sequential
        0xC3, 0x00, 0x00,
    ];
    let h = harness("tamper", &program, &["in.dat"], b"");
    std::fs::write(h._drive.path().join("in.dat"), vec![0u8; 128]).unwrap();
    let mut h = h;
    assert_eq!(h.emulator.run(), TermReason::Logic);
    assert_eq!(h.emulator.finish(), 1);
}

#[test]
fn console_line_input_echoes() {
    // BDOS 10 into a buffer at 0x2000, then warm boot
    #[rustfmt::skip]
    let program = [
        0x3E, 0x20, 0x32, 0x00, 0x20,                   // buffer size 32
        0x0E, 0x0A, 0x11, 0x00, 0x20, 0xCD, 0x05, 0x00, // read console buffer
        0xC3, 0x00, 0x00,
    ];
    let mut h = harness("edit", &program, &[], b"hi\r");
    assert_eq!(h.emulator.run(), TermReason::Term);
    assert_eq!(h.emulator.machine.load(0x2001), 2);
    assert_eq!(&h.emulator.machine.mem[0x2002..0x2004], b"hi");
    // both characters echoed, final CR appended
    assert_eq!(h.output.lock().unwrap().as_slice(), b"hi\r");
}

#[test]
fn default_fcb_survives_size_checks() {
    assert_eq!(FCB_SIZE, 36);
}

#[test]
fn ctrl_c_at_line_start_exits_cleanly() {
    #[rustfmt::skip]
    let program = [
        0x3E, 0x20, 0x32, 0x00, 0x20,
        0x0E, 0x0A, 0x11, 0x00, 0x20, 0xCD, 0x05, 0x00,
        0xC3, 0x00, 0x00,
    ];
    let mut h = harness("ctrlc", &program, &[], b"\x03");
    assert_eq!(h.emulator.run(), TermReason::CtrlC);
    assert_eq!(h.emulator.finish(), 0);
}
