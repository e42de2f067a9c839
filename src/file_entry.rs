use std::path::{Path, PathBuf};

use tokio::fs;

use super::error::Error;
use super::mmap;

#[derive(Debug, Clone)]
pub struct FileEntry {
    path: PathBuf,
    size: u64,
}

impl FileEntry {
    pub fn new(path: PathBuf, size: u64) -> FileEntry {
        FileEntry { path, size }
    }

    pub async fn read(&self) -> Result<Vec<u8>, Error> {
        Ok(fs::read(&self.path).await?)
    }

    /// Maps the file read-only for part uploads.
    pub fn map(&self) -> Result<mmap::Handle, Error> {
        let file = std::fs::File::open(&self.path)?;
        let handle = unsafe { mmap::Handle::new(&file, self.size as usize) }?;
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}
