//! Read access to the content of a container's files.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::DeltaError;
use crate::container::Container;

/// Opens readers over a container's files, addressed by file index.
///
/// A pool has a single reader at a time and never modifies its source.
pub trait FilePool: Send {
    /// Opens a reader positioned at the start of the file.
    fn open(&mut self, file_index: usize) -> Result<Box<dyn Read + '_>, DeltaError>;
}

/// Pool over a directory on disk.
pub struct DirPool {
    root: PathBuf,
    paths: Vec<String>,
}

impl DirPool {
    pub fn new(root: &Path, container: &Container) -> Self {
        Self {
            root: root.to_path_buf(),
            paths: container.files().map(|e| e.path.clone()).collect(),
        }
    }
}

impl FilePool for DirPool {
    fn open(&mut self, file_index: usize) -> Result<Box<dyn Read + '_>, DeltaError> {
        let rel = self
            .paths
            .get(file_index)
            .ok_or(DeltaError::NoSuchFile(file_index))?;
        let file = File::open(self.root.join(rel))?;
        Ok(Box::new(file))
    }
}

/// Pool over the entries of a zip archive.
pub struct ZipPool {
    archive: ZipArchive<File>,
    /// Archive entry index for each file index.
    indices: Vec<usize>,
}

impl ZipPool {
    pub fn new(archive: ZipArchive<File>, indices: Vec<usize>) -> Self {
        Self { archive, indices }
    }
}

impl FilePool for ZipPool {
    fn open(&mut self, file_index: usize) -> Result<Box<dyn Read + '_>, DeltaError> {
        let zip_index = *self
            .indices
            .get(file_index)
            .ok_or(DeltaError::NoSuchFile(file_index))?;
        let entry = self.archive.by_index(zip_index)?;
        Ok(Box::new(entry))
    }
}

/// Pool over in-memory file contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryPool {
    files: Vec<Vec<u8>>,
}

impl MemoryPool {
    pub fn new(files: Vec<Vec<u8>>) -> Self {
        Self { files }
    }
}

impl FilePool for MemoryPool {
    fn open(&mut self, file_index: usize) -> Result<Box<dyn Read + '_>, DeltaError> {
        let data = self
            .files
            .get(file_index)
            .ok_or(DeltaError::NoSuchFile(file_index))?;
        Ok(Box::new(Cursor::new(data.as_slice())))
    }
}
