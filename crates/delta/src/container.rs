//! Declarative manifest of a build: paths, kinds, sizes and modes, no content.

use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DeltaError;
use crate::pool::FilePool;

/// Default mode for regular files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default mode for directories and executables.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Kind of a container entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Dir,
    Symlink { target: String },
}

/// One entry of a [`Container`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Relative path, `/`-separated.
    pub path: String,
    pub kind: EntryKind,
    /// Content size in bytes (0 for dirs and symlinks).
    pub size: u64,
    /// Unix permission bits.
    pub mode: u32,
}

impl Entry {
    pub fn file(path: impl Into<String>, size: u64, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            size,
            mode,
        }
    }

    pub fn dir(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Dir,
            size: 0,
            mode,
        }
    }

    pub fn symlink(path: impl Into<String>, target: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Symlink {
                target: target.into(),
            },
            size: 0,
            mode,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File)
    }
}

/// An ordered, immutable build manifest.
///
/// File entries are addressed by their *file index*: the position among the
/// container's files only, in container order. Pools, signatures and patches
/// all use that index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    entries: Vec<Entry>,
}

impl Container {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    /// The manifest of a channel's nonexistent previous build.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// File entries in file-index order.
    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.is_file())
    }

    pub fn file_count(&self) -> usize {
        self.files().count()
    }

    /// Total size of all files in bytes.
    pub fn size(&self) -> u64 {
        self.files().map(|e| e.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ContainerStats {
        let mut stats = ContainerStats::default();
        for entry in &self.entries {
            match entry.kind {
                EntryKind::File => stats.files += 1,
                EntryKind::Dir => stats.dirs += 1,
                EntryKind::Symlink { .. } => stats.symlinks += 1,
            }
        }
        stats
    }

    /// Marks files that look executable as `0o755`.
    ///
    /// Archives and some filesystems lose the executable bit; sniffing the
    /// first bytes of each file (ELF, Mach-O, universal binaries, `#!`
    /// scripts) restores it. Returns the number of entries fixed.
    pub fn fix_permissions(&mut self, pool: &mut dyn FilePool) -> Result<usize, DeltaError> {
        let mut fixed = 0;
        let mut file_index = 0;

        for entry in self.entries.iter_mut() {
            if !entry.is_file() {
                continue;
            }
            let index = file_index;
            file_index += 1;

            if entry.mode & 0o111 != 0 || entry.size < 2 {
                continue;
            }

            let mut head = [0u8; 4];
            let n = read_head(pool.open(index)?, &mut head)?;
            if looks_executable(&head[..n]) {
                debug!(path = %entry.path, "marking as executable");
                entry.mode = DEFAULT_DIR_MODE;
                fixed += 1;
            }
        }

        Ok(fixed)
    }
}

fn read_head(mut reader: Box<dyn Read + '_>, buf: &mut [u8]) -> Result<usize, DeltaError> {
    let mut n = 0;
    while n < buf.len() {
        let read = reader.read(&mut buf[n..])?;
        if read == 0 {
            break;
        }
        n += read;
    }
    Ok(n)
}

fn looks_executable(head: &[u8]) -> bool {
    if head.starts_with(b"#!") {
        return true;
    }
    if head.len() < 4 {
        return false;
    }
    matches!(
        head[..4],
        // ELF
        [0x7f, b'E', b'L', b'F']
        // Mach-O 32/64, both byte orders
        | [0xfe, 0xed, 0xfa, 0xce]
        | [0xfe, 0xed, 0xfa, 0xcf]
        | [0xce, 0xfa, 0xed, 0xfe]
        | [0xcf, 0xfa, 0xed, 0xfe]
        // Universal (fat) binary
        | [0xca, 0xfe, 0xba, 0xbe]
    )
}

/// Entry counts of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
}

impl fmt::Display for ContainerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} dirs, {} symlinks",
            self.files, self.dirs, self.symlinks
        )
    }
}
