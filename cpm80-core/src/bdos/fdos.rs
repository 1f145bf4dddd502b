//! The FDOS: every BDOS function that touches a drive. Drives are host
//! directories; open files live in the registry and are addressed by
//! the ID stamped into the FCB.
//!
//! Failure policy: errors the guest can deal with come back as result
//! codes (0xFF generic, 0x01 unwritten data, 0x02 disk full, 0x05 no
//! directory space, 0x06 record out of range). Protection violations,
//! FCB-protocol violations and unexpected host errors stop the machine
//! with the matching termination reason.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::fcb::{Fcb, FCB_SIZE, RECORD_SIZE};
use super::{Bdos, SearchHit};
use crate::dump;
use crate::machine::{Machine, TermReason, MEMORY_SIZE};
use crate::registry::{FileEntry, FileFlags};

/// Largest host file representable in a 16-bit record count.
const MAX_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// A host name acceptable on both sides: 1..8 name characters, an
/// optional 1..3 character extension, everything from the CP/M-safe
/// lower-case set.
pub fn is_nice_filename(name: &str) -> bool {
    fn good(part: &str, max: usize) -> bool {
        (1..=max).contains(&part.len())
            && part
                .bytes()
                .all(|c| matches!(c, b'#' | b'$' | b'@' | b'-' | b'0'..=b'9' | b'a'..=b'z'))
    }
    match name.split_once('.') {
        None => good(name, 8),
        Some((stem, ext)) => good(stem, 8) && good(ext, 3),
    }
}

/// Wildcard match of a host name against a pattern where `?` matches
/// at most one character and never crosses the dot.
fn matches_pattern(pattern: &str, name: &str) -> bool {
    let mut p = pattern.as_bytes();
    let mut n = name.as_bytes();
    while let Some((&pc, prest)) = p.split_first() {
        if n.first() == Some(&pc) {
            p = prest;
            n = &n[1..];
        } else if pc == b'?' {
            p = prest;
            if let Some((&nc, nrest)) = n.split_first() {
                if nc != b'.' {
                    n = nrest;
                }
            }
        } else {
            break;
        }
    }
    p.is_empty() && n.is_empty()
}

impl Bdos {
    /// Fetch and range-check the FCB pointer in DE; dumps the FCB when
    /// the log level asks for it.
    fn get_fcb(&self, m: &mut Machine, size: usize, caller: &str) -> Option<u16> {
        let fcb = m.de();
        if MEMORY_SIZE - (fcb as usize) < size {
            log::error!("{caller} (FCB 0x{fcb:04x}): invalid address");
            m.halt_with(TermReason::BdosArg);
            return None;
        }
        if self.fcb_dumps() {
            log::debug!("dump of FCB(0x{fcb:04x}):");
            for line in dump::hex_lines(&m.mem[..], fcb as usize, size) {
                log::debug!("{line}");
            }
        }
        Some(fcb)
    }

    /// Resolve the FCB drive byte (0 = current) against the
    /// configured drives.
    fn fcb_drive(&self, m: &mut Machine, fcb: u16, drive_byte: u8, caller: &str) -> Option<usize> {
        let drive = if drive_byte == 0 {
            self.current_drive as usize
        } else {
            drive_byte as usize - 1
        };
        if drive > 15 || self.drives[drive].is_none() {
            log::error!("{caller} (FCB 0x{fcb:04x}): illegal/unconfigured drive");
            m.halt_with(TermReason::Select);
            return None;
        }
        Some(drive)
    }

    fn drive_dir(&self, drive: usize) -> &Path {
        self.drives[drive].as_deref().expect("checked drive")
    }

    /// All files in `dir` that are CP/M material and match `pattern`.
    fn filelist(&self, dir: &Path, pattern: &str, caller: &str) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::info!("{caller}: cannot read {}: {e}", dir.display());
                return hits;
            }
        };
        for entry in entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_nice_filename(&name) || !matches_pattern(pattern, &name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() || meta.len() > MAX_FILE_SIZE {
                continue;
            }
            hits.push(SearchHit {
                name,
                records: meta.len().div_ceil(RECORD_SIZE as u64),
            });
        }
        hits
    }

    /// Look up the registry entry referenced by an FCB, enforcing the
    /// ID protocol.
    fn fcb_entry_id(&self, m: &mut Machine, fcb_buf: &mut [u8], fcb: u16, caller: &str) -> Option<u16> {
        let Some(id) = Fcb::new(fcb_buf).id() else {
            log::error!("{caller} (FCB 0x{fcb:04x}): invalid file ID in FCB");
            m.halt_with(TermReason::Logic);
            return None;
        };
        if !self.registry.contains(id) {
            log::error!("{caller} (FCB 0x{fcb:04x}): stale file ID in FCB");
            m.halt_with(TermReason::Logic);
            return None;
        }
        Some(id)
    }

    fn read_fcb_buf(m: &Machine, fcb: u16) -> [u8; FCB_SIZE] {
        let mut buf = [0u8; FCB_SIZE];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = m.load(fcb.wrapping_add(i as u16));
        }
        buf
    }

    fn write_fcb_buf(m: &mut Machine, fcb: u16, buf: &[u8; FCB_SIZE]) {
        for (i, &b) in buf.iter().enumerate() {
            m.store(fcb.wrapping_add(i as u16), b);
        }
    }

    /// Position a registry file at a record offset.
    fn seek_record(&mut self, m: &mut Machine, id: u16, offset: u32, fcb: u16, caller: &str) -> bool {
        let entry = self.registry.get_mut(id).expect("live id");
        match entry
            .file
            .seek(SeekFrom::Start(offset as u64 * RECORD_SIZE as u64))
        {
            Ok(_) => true,
            Err(e) => {
                log::error!(
                    "{caller} (FCB 0x{fcb:04x}): seek({}) failed: {e}",
                    entry.path.display()
                );
                m.halt_with(TermReason::Host);
                false
            }
        }
    }

    /// Read one record into the DMA buffer, padding a short tail with
    /// 0x1A. `Some(false)` reports end of file.
    fn read_record(&mut self, m: &mut Machine, id: u16, fcb: u16, caller: &str) -> Option<bool> {
        let entry = self.registry.get_mut(id).expect("live id");
        let mut buf = [0x1Au8; RECORD_SIZE];
        let mut got = 0;
        while got < RECORD_SIZE {
            match entry.file.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!(
                        "{caller} (FCB 0x{fcb:04x}): read({}) failed: {e}",
                        entry.path.display()
                    );
                    m.halt_with(TermReason::Host);
                    return None;
                }
            }
        }
        if got == 0 {
            return Some(false);
        }
        let dma = self.dma as usize;
        m.mem[dma..dma + RECORD_SIZE].copy_from_slice(&buf);
        if self.record_dumps() {
            for line in dump::hex_lines(&m.mem[..], dma, RECORD_SIZE) {
                log::trace!("{line}");
            }
        }
        Some(true)
    }

    /// Write one record from the DMA buffer.
    fn write_record(&mut self, m: &mut Machine, id: u16, fcb: u16, caller: &str) -> bool {
        let dma = self.dma as usize;
        let buf: [u8; RECORD_SIZE] = m.mem[dma..dma + RECORD_SIZE]
            .try_into()
            .expect("record slice");
        let entry = self.registry.get_mut(id).expect("live id");
        entry.flags |= FileFlags::WRITTEN;
        if let Err(e) = entry.file.write_all(&buf) {
            log::error!(
                "{caller} (FCB 0x{fcb:04x}): write({}) failed: {e}",
                entry.path.display()
            );
            m.halt_with(TermReason::Host);
            return false;
        }
        if self.record_dumps() {
            for line in dump::hex_lines(&m.mem[..], dma, RECORD_SIZE) {
                log::trace!("{line}");
            }
        }
        true
    }

    /// Write protection gate shared by every mutating record call.
    fn check_writeable(&mut self, m: &mut Machine, id: u16, fcb: u16, caller: &str) -> bool {
        let entry = self.registry.get_mut(id).expect("live id");
        if entry.flags.contains(FileFlags::RODISK) {
            log::error!(
                "{caller} (FCB 0x{fcb:04x}): {}: write protected disk",
                entry.path.display()
            );
            m.halt_with(TermReason::RoDisk);
            return false;
        }
        if entry.flags.contains(FileFlags::ROFILE) {
            log::error!(
                "{caller} (FCB 0x{fcb:04x}): {} is write protected",
                entry.path.display()
            );
            m.halt_with(TermReason::RoFile);
            return false;
        }
        true
    }

    // ---- open / close ---------------------------------------------

    pub(super) fn open_file(&mut self, m: &mut Machine) {
        const FUNC: &str = "open file";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 33, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let extent = {
                let mut view = Fcb::new(&mut buf);
                if view.ex() > 31 {
                    log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal extent number");
                    break 'fail;
                }
                view.set_s2(0);
                view.ex()
            };
            m.store(fcb.wrapping_add(14), 0);
            let drive_byte = buf[0];
            let Some(drive) = self.fcb_drive(m, fcb, drive_byte, FUNC) else {
                break 'fail;
            };
            let mut flags = FileFlags::empty();
            if self.read_only[drive] {
                flags |= FileFlags::RODISK;
            }
            let Some(mut name) = Fcb::new(&mut buf).host_name(&self.charset) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal file name");
                break 'fail;
            };
            let ambiguous = name.contains('?');
            if ambiguous {
                // the first match large enough to cover the requested
                // extent wins
                let hits = self.filelist(self.drive_dir(drive), &name, FUNC);
                match hits
                    .into_iter()
                    .find(|hit| hit.records >= extent as u64 * 128)
                {
                    Some(hit) => name = hit.name,
                    None => break 'fail,
                }
            }
            let path = self.drive_dir(drive).join(&name);
            let open_result = if flags.contains(FileFlags::RODISK) {
                OpenOptions::new().read(true).open(&path)
            } else {
                match OpenOptions::new().read(true).write(true).open(&path) {
                    Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                        flags |= FileFlags::ROFILE;
                        OpenOptions::new().read(true).open(&path)
                    }
                    other => other,
                }
            };
            let file = match open_result {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::NotFound => break 'fail,
                Err(e) => {
                    log::error!("{FUNC} (FCB 0x{fcb:04x}): could not open {}: {e}", path.display());
                    m.halt_with(TermReason::Host);
                    break 'fail;
                }
            };
            if ambiguous {
                let packed = super::fcb::pack_name(&name, &self.charset);
                buf[1..12].copy_from_slice(&packed[1..12]);
            }
            let Some(id) = self.registry.insert(FileEntry { file, path, flags }) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): more than 65535 open files");
                m.halt_with(TermReason::Logic);
                break 'fail;
            };
            Fcb::new(&mut buf).set_id(id);
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    pub(super) fn close_file(&mut self, m: &mut Machine) {
        const FUNC: &str = "close file";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 33, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let Some(id) = self.fcb_entry_id(m, &mut buf, fcb, FUNC) else {
                break 'fail;
            };
            if self.dont_close {
                // some programs keep using the FCB after close; leave
                // the file open and just mark it flushed
                let entry = self.registry.get_mut(id).expect("live id");
                entry.flags -= FileFlags::WRITTEN;
                result = 0x00;
                break 'fail;
            }
            let entry = self.registry.remove(id).expect("live id");
            Fcb::new(&mut buf).clear_id();
            Self::write_fcb_buf(m, fcb, &buf);
            if entry.flags.contains(FileFlags::WRITTEN) {
                if let Err(e) = entry.file.sync_all() {
                    log::error!(
                        "{FUNC} (FCB 0x{fcb:04x}): close({}) failed: {e}",
                        entry.path.display()
                    );
                    m.halt_with(TermReason::Host);
                    break 'fail;
                }
            }
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    // ---- directory search -----------------------------------------

    /// Pop the head of the search list into a synthesized directory
    /// entry at the DMA address.
    fn return_direntry(&mut self, m: &mut Machine) -> u8 {
        let Some(hit) = self.search_list.pop_front() else {
            return 0xFF;
        };
        let dma = self.dma as usize;
        m.mem[dma..dma + 32].fill(0);
        m.mem[dma + 32..dma + 128].fill(0xE5);
        let packed = super::fcb::pack_name(&hit.name, &self.charset);
        m.mem[dma + 1..dma + 12].copy_from_slice(&packed[1..12]);
        // the entry sits in the first 32 bytes, so the directory code
        // is always 0
        0x00
    }

    pub(super) fn search_first(&mut self, m: &mut Machine) {
        const FUNC: &str = "search for first";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 32, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            // a '?' drive byte means the current drive; user areas are
            // not distinguished
            let drive_byte = if buf[0] == b'?' { 0 } else { buf[0] };
            let Some(drive) = self.fcb_drive(m, fcb, drive_byte, FUNC) else {
                break 'fail;
            };
            let Some(pattern) = Fcb::new(&mut buf).host_name(&self.charset) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal file name");
                break 'fail;
            };
            self.search_list = self.filelist(self.drive_dir(drive), &pattern, FUNC).into();
            result = self.return_direntry(m);
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    pub(super) fn search_next(&mut self, m: &mut Machine) {
        const FUNC: &str = "search for next";
        log::info!("{FUNC} entry");
        let result = self.return_direntry(m);
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    // ---- create / delete / rename ---------------------------------

    pub(super) fn make_file(&mut self, m: &mut Machine) {
        const FUNC: &str = "make file";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 33, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            {
                let mut view = Fcb::new(&mut buf);
                if view.ex() > 31 {
                    log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal extent number");
                    break 'fail;
                }
                view.set_s2(0);
            }
            m.store(fcb.wrapping_add(14), 0);
            let drive_byte = buf[0];
            let Some(drive) = self.fcb_drive(m, fcb, drive_byte, FUNC) else {
                break 'fail;
            };
            if self.read_only[drive] {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): disk write protected");
                m.halt_with(TermReason::RoDisk);
                break 'fail;
            }
            let Some(name) = Fcb::new(&mut buf).host_name(&self.charset) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal file name");
                break 'fail;
            };
            if name.contains('?') {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): ambiguous file name {name}");
                break 'fail;
            }
            let path = self.drive_dir(drive).join(&name);
            let file = match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(f) => f,
                Err(e) => {
                    log::error!(
                        "{FUNC} (FCB 0x{fcb:04x}): could not create {}: {e}",
                        path.display()
                    );
                    m.halt_with(TermReason::Host);
                    break 'fail;
                }
            };
            let Some(id) = self.registry.insert(FileEntry {
                file,
                path,
                flags: FileFlags::empty(),
            }) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): more than 65535 open files");
                m.halt_with(TermReason::Logic);
                break 'fail;
            };
            Fcb::new(&mut buf).set_id(id);
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    pub(super) fn delete_file(&mut self, m: &mut Machine) {
        const FUNC: &str = "delete file";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 32, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let drive_byte = buf[0];
            let Some(drive) = self.fcb_drive(m, fcb, drive_byte, FUNC) else {
                break 'fail;
            };
            let Some(pattern) = Fcb::new(&mut buf).host_name(&self.charset) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal file name");
                break 'fail;
            };
            let hits = self.filelist(self.drive_dir(drive), &pattern, FUNC);
            if hits.is_empty() {
                break 'fail;
            }
            if self.read_only[drive] {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): write protected disk");
                m.halt_with(TermReason::RoDisk);
                break 'fail;
            }
            for hit in hits {
                let path = self.drive_dir(drive).join(&hit.name);
                if let Err(e) = std::fs::remove_file(&path) {
                    log::error!(
                        "{FUNC} (FCB 0x{fcb:04x}): unlink({}) failed: {e}",
                        path.display()
                    );
                    m.halt_with(TermReason::RoFile);
                    break 'fail;
                }
            }
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    pub(super) fn rename_file(&mut self, m: &mut Machine) {
        const FUNC: &str = "rename file";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 32, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let drive_byte = buf[0];
            let Some(drive) = self.fcb_drive(m, fcb, drive_byte, FUNC) else {
                break 'fail;
            };
            if self.read_only[drive] {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): disk write protected");
                m.halt_with(TermReason::RoDisk);
                break 'fail;
            }
            let Some(old_name) = Fcb::new(&mut buf).host_name(&self.charset) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal file name");
                break 'fail;
            };
            // the new name occupies the second 16 bytes of the FCB
            let mut new_buf = [0u8; FCB_SIZE];
            new_buf[..16].copy_from_slice(&buf[16..32]);
            let Some(new_name) = Fcb::new(&mut new_buf).host_name(&self.charset) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal file name");
                break 'fail;
            };
            if old_name.contains('?') || new_name.contains('?') {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): ambiguous file name");
                break 'fail;
            }
            let dir = self.drive_dir(drive).to_path_buf();
            let old_path = dir.join(&old_name);
            let new_path = dir.join(&new_name);
            if let Err(e) = std::fs::hard_link(&old_path, &new_path) {
                log::error!(
                    "{FUNC} (FCB 0x{fcb:04x}): link({}, {}) failed: {e}",
                    old_path.display(),
                    new_path.display()
                );
                match e.kind() {
                    ErrorKind::NotFound | ErrorKind::AlreadyExists => {}
                    ErrorKind::PermissionDenied => m.halt_with(TermReason::RoFile),
                    _ => m.halt_with(TermReason::Host),
                }
                break 'fail;
            }
            if let Err(e) = std::fs::remove_file(&old_path) {
                log::error!(
                    "{FUNC} (FCB 0x{fcb:04x}): unlink({}) failed: {e}",
                    old_path.display()
                );
                m.halt_with(TermReason::Host);
                std::fs::remove_file(&new_path).ok();
                break 'fail;
            }
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    // ---- record I/O -----------------------------------------------

    pub(super) fn read_sequential(&mut self, m: &mut Machine) {
        const FUNC: &str = "read sequential";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0x01;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 33, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let Some(id) = self.fcb_entry_id(m, &mut buf, fcb, FUNC) else {
                break 'fail;
            };
            let offset = match Fcb::new(&mut buf).offset() {
                Some(o) if o < 65536 => o,
                _ => {
                    log::error!("{FUNC} (FCB 0x{fcb:04x}): invalid file offset");
                    result = 0x06;
                    break 'fail;
                }
            };
            if !self.seek_record(m, id, offset, fcb, FUNC) {
                break 'fail;
            }
            match self.read_record(m, id, fcb, FUNC) {
                None => break 'fail,
                Some(false) => break 'fail, // end of file: 0x01
                Some(true) => {}
            }
            Fcb::new(&mut buf).set_offset(offset + 1);
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    pub(super) fn write_sequential(&mut self, m: &mut Machine) {
        const FUNC: &str = "write sequential";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0x02;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 33, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let Some(id) = self.fcb_entry_id(m, &mut buf, fcb, FUNC) else {
                break 'fail;
            };
            if !self.check_writeable(m, id, fcb, FUNC) {
                break 'fail;
            }
            let offset = match Fcb::new(&mut buf).offset() {
                Some(o) if o < 65536 => o,
                _ => {
                    log::error!("{FUNC} (FCB 0x{fcb:04x}): invalid file offset");
                    result = 0x06;
                    break 'fail;
                }
            };
            if !self.seek_record(m, id, offset, fcb, FUNC) {
                break 'fail;
            }
            if !self.write_record(m, id, fcb, FUNC) {
                break 'fail;
            }
            Fcb::new(&mut buf).set_offset(offset + 1);
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    pub(super) fn read_random(&mut self, m: &mut Machine) {
        const FUNC: &str = "read random";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0x01;
        'fail: {
            let Some(fcb) = self.get_fcb(m, FCB_SIZE, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let Some(id) = self.fcb_entry_id(m, &mut buf, fcb, FUNC) else {
                break 'fail;
            };
            let offset = match Fcb::new(&mut buf).random() {
                Some(o) if o < 65536 => o,
                _ => {
                    log::error!("{FUNC} (FCB 0x{fcb:04x}): invalid random record number");
                    result = 0x06;
                    break 'fail;
                }
            };
            if !self.seek_record(m, id, offset, fcb, FUNC) {
                break 'fail;
            }
            match self.read_record(m, id, fcb, FUNC) {
                None => break 'fail,
                Some(false) => break 'fail,
                Some(true) => {}
            }
            // random reads leave the sequential position on the record
            // just read
            Fcb::new(&mut buf).set_offset(offset);
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    /// BDOS 34 and 40. Zero fill comes for free: host files read
    /// unwritten ranges as zeroes.
    pub(super) fn write_random(&mut self, m: &mut Machine, func: &str) {
        log::info!("{func} entry: de=0x{:04x}", m.de());
        let mut result = 0x05;
        'fail: {
            let Some(fcb) = self.get_fcb(m, FCB_SIZE, func) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let Some(id) = self.fcb_entry_id(m, &mut buf, fcb, func) else {
                break 'fail;
            };
            if !self.check_writeable(m, id, fcb, func) {
                break 'fail;
            }
            let offset = match Fcb::new(&mut buf).random() {
                Some(o) if o < 65536 => o,
                _ => {
                    log::error!("{func} (FCB 0x{fcb:04x}): invalid random record number");
                    result = 0x06;
                    break 'fail;
                }
            };
            if !self.seek_record(m, id, offset, fcb, func) {
                break 'fail;
            }
            if !self.write_record(m, id, fcb, func) {
                break 'fail;
            }
            Fcb::new(&mut buf).set_offset(offset);
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{func} exit: a=0x{result:02x}");
    }

    // ---- metadata -------------------------------------------------

    pub(super) fn compute_file_size(&mut self, m: &mut Machine) {
        const FUNC: &str = "compute file size";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, FCB_SIZE, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let drive_byte = buf[0];
            let Some(drive) = self.fcb_drive(m, fcb, drive_byte, FUNC) else {
                break 'fail;
            };
            let Some(name) = Fcb::new(&mut buf).host_name(&self.charset) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal file name");
                break 'fail;
            };
            if name.contains('?') {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): ambiguous file name {name}");
                break 'fail;
            }
            let path = self.drive_dir(drive).join(&name);
            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    log::info!("{FUNC} (FCB 0x{fcb:04x}): stat({}) failed: {e}", path.display());
                    break 'fail;
                }
            };
            if !meta.is_file() || meta.len() > MAX_FILE_SIZE {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): {} not usable", path.display());
                break 'fail;
            }
            let records = meta.len().div_ceil(RECORD_SIZE as u64);
            Fcb::new(&mut buf).set_random(records as u32);
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    pub(super) fn set_random_record(&mut self, m: &mut Machine) {
        const FUNC: &str = "set random record";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, FCB_SIZE, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let mut view = Fcb::new(&mut buf);
            let Some(offset) = view.offset() else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): invalid file offset");
                break 'fail;
            };
            view.set_random(offset);
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    /// BDOS 30: attributes are not stored on the host, so this only
    /// validates the request and normalizes the name bytes.
    pub(super) fn set_file_attributes(&mut self, m: &mut Machine) {
        const FUNC: &str = "set file attributes";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 32, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let drive_byte = buf[0];
            let Some(drive) = self.fcb_drive(m, fcb, drive_byte, FUNC) else {
                break 'fail;
            };
            if self.read_only[drive] {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): disk write protected");
                m.halt_with(TermReason::RoDisk);
                break 'fail;
            }
            let mut view = Fcb::new(&mut buf);
            view.strip_high_bits();
            let Some(name) = view.host_name(&self.charset) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal file name");
                break 'fail;
            };
            if name.contains('?') {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): ambiguous file name {name}");
                break 'fail;
            }
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }

    /// BDOS 102: host access and modification times as CP/M date
    /// stamps in FCB bytes 24..31.
    pub(super) fn file_date_stamps(&mut self, m: &mut Machine) {
        const FUNC: &str = "read file date stamps";
        log::info!("{FUNC} entry: de=0x{:04x}", m.de());
        let mut result = 0xFF;
        'fail: {
            let Some(fcb) = self.get_fcb(m, 32, FUNC) else {
                break 'fail;
            };
            let mut buf = Self::read_fcb_buf(m, fcb);
            let drive_byte = buf[0];
            let Some(drive) = self.fcb_drive(m, fcb, drive_byte, FUNC) else {
                break 'fail;
            };
            let Some(name) = Fcb::new(&mut buf).host_name(&self.charset) else {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): illegal file name");
                break 'fail;
            };
            if name.contains('?') {
                log::error!("{FUNC} (FCB 0x{fcb:04x}): ambiguous file name {name}");
                break 'fail;
            }
            let path = self.drive_dir(drive).join(&name);
            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    log::info!("{FUNC} (FCB 0x{fcb:04x}): stat({}) failed: {e}", path.display());
                    break 'fail;
                }
            };
            let access = meta
                .accessed()
                .map(crate::clock::stamp_from_system)
                .unwrap_or(crate::clock::CpmStamp {
                    day: 0,
                    hour: 0,
                    minute: 0,
                });
            let update = meta
                .modified()
                .map(crate::clock::stamp_from_system)
                .unwrap_or(crate::clock::CpmStamp {
                    day: 0,
                    hour: 0,
                    minute: 0,
                });
            buf[24..26].copy_from_slice(&access.day.to_le_bytes());
            buf[26] = access.hour;
            buf[27] = access.minute;
            buf[28..30].copy_from_slice(&update.day.to_le_bytes());
            buf[30] = update.hour;
            buf[31] = update.minute;
            buf[12] = 0;
            Self::write_fcb_buf(m, fcb, &buf);
            result = 0x00;
        }
        m.result_byte(result);
        log::info!("{FUNC} exit: a=0x{result:02x}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_filenames() {
        assert!(is_nice_filename("hello.com"));
        assert!(is_nice_filename("a"));
        assert!(is_nice_filename("readme"));
        assert!(is_nice_filename("x#$-@.txt"));
        assert!(!is_nice_filename("Hello.com")); // upper case
        assert!(!is_nice_filename("toolongname.txt"));
        assert!(!is_nice_filename("a.text"));
        assert!(!is_nice_filename(""));
        assert!(!is_nice_filename(".txt"));
        assert!(!is_nice_filename("two.dots.x"));
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches_pattern("a???????.t??", "a.txt"));
        assert!(matches_pattern("a???????.t??", "abc.t"));
        assert!(!matches_pattern("a???????.t??", "b.txt"));
        assert!(matches_pattern("????????.???", "x.y"));
        // '?' does not bridge the dot
        assert!(!matches_pattern("????????????", "a.txt"));
        assert!(matches_pattern("readme", "readme"));
        assert!(!matches_pattern("readme", "readme.txt"));
    }
}
