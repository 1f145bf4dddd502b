//! The emulator proper: owns the machine and the OS emulation and runs
//! the dispatch loop until the guest, a signal, or a fatal condition
//! sets the termination latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bdos::Bdos;
use crate::config::{Config, CpuDelay, DumpFlags, LogLevel, SaveConfig};
use crate::console::Console;
use crate::cpu::{self, Counters};
use crate::dump;
use crate::error::CpmResult;
use crate::loader;
use crate::machine::{Machine, TermReason, MAGIC_ADDRESS};
use crate::traps;

/// Instructions between console polls. Chosen empirically: frequent
/// enough to keep resize and typed-ahead input responsive, rare enough
/// to stay invisible in the instruction rate.
pub const POLL_INTERVAL: u32 = 128 * 1024;

pub struct Emulator {
    pub machine: Machine,
    pub bdos: Bdos,
    counters: Counters,
    dump_flags: DumpFlags,
    cpu_delay: Option<CpuDelay>,
    save: Option<SaveConfig>,
    /// First terminating signal lands here; the loop notices at the
    /// next instruction boundary.
    stop: Arc<AtomicBool>,
    /// SIGUSR1 requests a machine dump at the next boundary.
    dump_request: Arc<AtomicBool>,
}

impl Emulator {
    /// Build the initial machine image and the OS state. `stop` is
    /// shared with the console back-end so blocking reads wake up.
    pub fn new(
        cfg: &Config,
        console: Box<dyn Console>,
        stop: Arc<AtomicBool>,
    ) -> CpmResult<Self> {
        let mut machine = Machine::new();
        loader::load(cfg, &mut machine)?;
        let bdos = Bdos::new(cfg, console, stop.clone());
        let emulator = Self {
            machine,
            bdos,
            counters: Counters::new(cfg.log_level >= LogLevel::Counters),
            dump_flags: cfg.dump,
            cpu_delay: cfg.cpu_delay,
            save: cfg.save.clone(),
            stop,
            dump_request: Arc::new(AtomicBool::new(false)),
        };
        if emulator.dump_flags.contains(DumpFlags::STARTUP) {
            dump::dump_machine(&emulator.machine, "startup");
        }
        Ok(emulator)
    }

    /// Route SIGINT/SIGQUIT/SIGTERM into the termination flag and,
    /// when configured, SIGUSR1 into a dump request. The handlers only
    /// store flags; everything else happens in the dispatch loop.
    pub fn install_signal_handlers(&self) -> CpmResult<()> {
        use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM, SIGUSR1};
        for sig in [SIGINT, SIGQUIT, SIGTERM] {
            signal_hook::flag::register(sig, self.stop.clone())?;
        }
        if self.dump_flags.contains(DumpFlags::SIGNAL) {
            signal_hook::flag::register(SIGUSR1, self.dump_request.clone())?;
        }
        Ok(())
    }

    /// Run until termination.
    pub fn run(&mut self) -> TermReason {
        self.run_steps(u64::MAX);
        self.machine.term_reason
    }

    /// Run at most `budget` dispatch cycles (a trap counts as one).
    /// Returns the number executed; stops early on termination.
    pub fn run_steps(&mut self, budget: u64) -> u64 {
        let mut executed = 0u64;
        let mut poll_counter = 0u32;
        let mut delay_counter = 0u64;
        while executed < budget && !self.machine.terminate {
            if self.dump_request.swap(false, Ordering::Relaxed) {
                dump::dump_machine(&self.machine, "signal");
            }
            if self.stop.load(Ordering::Relaxed) {
                self.machine.halt_with(TermReason::Signal);
                break;
            }
            let pc = self.machine.pc;
            if pc >= MAGIC_ADDRESS {
                // trap first, then behave like the RET stored there
                traps::os_call(&mut self.bdos, &mut self.machine, (pc - MAGIC_ADDRESS) as u8);
                self.machine.ret();
            } else {
                cpu::step(&mut self.machine, &mut self.counters);
            }
            executed += 1;
            poll_counter += 1;
            if poll_counter == POLL_INTERVAL {
                poll_counter = 0;
                self.bdos.console.poll();
            }
            if let Some(delay) = self.cpu_delay {
                delay_counter += 1;
                if delay_counter >= delay.count {
                    delay_counter = 0;
                    std::thread::sleep(Duration::from_nanos(delay.nanos));
                }
            }
        }
        executed
    }

    /// Tear everything down in reverse order of setup, write the
    /// configured dumps and the optional memory save, and map the
    /// termination reason to the process exit code.
    pub fn finish(mut self) -> i32 {
        let reason = self.machine.term_reason;
        if self.dump_flags.contains(DumpFlags::EXIT) {
            dump::dump_machine(&self.machine, "exit");
        } else if self.dump_flags.contains(DumpFlags::ERROR) && !reason.is_ok() {
            dump::dump_machine(&self.machine, "error");
        }
        self.bdos.shutdown();
        match reason {
            TermReason::NotRun | TermReason::Term | TermReason::CtrlC => {}
            TermReason::Boot => log::error!("BIOS cold boot entry called"),
            TermReason::BdosArg => log::error!("invalid argument in BDOS call"),
            TermReason::Select => log::error!("access to invalid/unconfigured disk"),
            TermReason::RoDisk => {
                log::error!("attempted write access to read-only disk")
            }
            TermReason::RoFile => {
                log::error!("attempted write access to read-only file")
            }
            TermReason::Host => log::error!("host system call failed"),
            TermReason::Logic => log::error!("guest program logic error"),
            TermReason::Signal => log::error!("program execution stopped by signal"),
        }
        let mut code = if reason.is_ok() { 0 } else { 1 };
        if reason.is_ok() {
            if let Some(save) = &self.save {
                let result = if save.hex {
                    dump::save_hex(&self.machine.mem[..], &save.path, save.start, save.end)
                } else {
                    dump::save_binary(&self.machine.mem[..], &save.path, save.start, save.end)
                };
                if let Err(e) = result {
                    log::error!("cannot save memory: {e}");
                    code = 1;
                }
            }
            // a CP/M 3 error return code turns into a host failure
            if self.bdos.return_code >= 0xFF00 {
                code = 1;
            }
        }
        self.counters.dump();
        code
    }
}
