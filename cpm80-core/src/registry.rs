//! The file registry: open host files keyed by the 16-bit ID that FDOS
//! stamps into FCB bytes 16..19.
//!
//! IDs come from a monotonically increasing counter that wraps at
//! 65535, skipping 0 and any ID still alive. Lookups go through an
//! ordered map so teardown closes files in a stable order.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u8 {
        /// Opened on a read-only drive.
        const RODISK = 0x01;
        /// The file itself could only be opened for reading.
        const ROFILE = 0x02;
        /// At least one record was written.
        const WRITTEN = 0x04;
    }
}

/// One live guest file.
pub struct FileEntry {
    pub file: File,
    pub path: PathBuf,
    pub flags: FileFlags,
}

#[derive(Default)]
pub struct FileRegistry {
    entries: BTreeMap<u16, FileEntry>,
    next_id: u16,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Register an open file and return its ID, or `None` when all
    /// 65535 IDs are taken.
    pub fn insert(&mut self, entry: FileEntry) -> Option<u16> {
        let start = self.next_id;
        loop {
            let id = self.next_id;
            self.next_id = match self.next_id.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if !self.entries.contains_key(&id) {
                self.entries.insert(id, entry);
                return Some(id);
            }
            if self.next_id == start {
                return None;
            }
        }
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut FileEntry> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn remove(&mut self, id: u16) -> Option<FileEntry> {
        self.entries.remove(&id)
    }

    /// Close everything still open; written-but-never-closed files get
    /// a log warning, mirroring what a real BDOS would have flushed.
    pub fn close_all(&mut self) {
        for (_, entry) in std::mem::take(&mut self.entries) {
            if entry.flags.contains(FileFlags::WRITTEN) {
                log::warn!(
                    "output file {} not explicitly closed by program",
                    entry.path.display()
                );
            }
            // dropping the File closes the descriptor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_entry() -> FileEntry {
        let mut path = std::env::temp_dir();
        path.push(format!("cpm80-registry-test-{}", std::process::id()));
        let file = File::create(&path).unwrap();
        FileEntry {
            file,
            path,
            flags: FileFlags::empty(),
        }
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut reg = FileRegistry::new();
        let a = reg.insert(scratch_entry()).unwrap();
        let b = reg.insert(scratch_entry()).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert!(reg.contains(a));
        reg.remove(a).unwrap();
        assert!(!reg.contains(a));
    }

    #[test]
    fn id_allocation_skips_zero_and_live_ids() {
        let mut reg = FileRegistry::new();
        reg.next_id = 0xFFFF;
        let a = reg.insert(scratch_entry()).unwrap();
        assert_eq!(a, 0xFFFF);
        // wraps past 0
        let b = reg.insert(scratch_entry()).unwrap();
        assert_eq!(b, 1);
        // collides with 0xFFFF and 1, lands on 2
        reg.next_id = 0xFFFF;
        let c = reg.insert(scratch_entry()).unwrap();
        assert_eq!(c, 2);
        let scratch = reg.get_mut(1).unwrap().path.clone();
        std::fs::remove_file(scratch).ok();
    }
}
