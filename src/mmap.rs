use std::ffi::c_void;
use std::ops::Deref;
use std::os::unix::io::AsRawFd;
use std::ptr;
use std::sync::Arc;

use nix::sys::mman;

/// Read-only shared mapping of a whole file.
#[derive(Debug)]
pub struct Handle {
    ptr: *mut c_void,
    len: usize,
}

unsafe impl Sync for Handle {}
unsafe impl Send for Handle {}

impl Handle {
    /// The caller must keep the file unmodified while the mapping is alive.
    pub unsafe fn new<F>(as_fd: &F, len: usize) -> nix::Result<Self>
    where
        F: AsRawFd,
    {
        if len == 0 {
            return Ok(Self { ptr: ptr::null_mut(), len: 0 });
        }
        let ptr = mman::mmap(
            ptr::null_mut(),
            len,
            mman::ProtFlags::PROT_READ,
            mman::MapFlags::MAP_PRIVATE,
            as_fd.as_raw_fd(),
            0,
        )?;
        Ok(Self { ptr, len })
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        unsafe {
            if let Err(e) = mman::munmap(self.ptr, self.len) {
                tracing::error!(error = %e, "munmap failed");
            }
        }
    }
}

/// Splits a mapping into consecutive part bodies of at most `part_size` bytes.
#[derive(Debug)]
pub struct Chunker {
    handle: Arc<Handle>,
    offset: usize,
    part_size: usize,
}

impl Chunker {
    pub fn new(handle: Handle, part_size: usize) -> Self {
        Chunker {
            handle: Arc::new(handle),
            offset: 0,
            part_size: part_size.max(1),
        }
    }

    pub fn remaining(&self) -> usize {
        self.handle.len - self.offset
    }
}

impl Iterator for Chunker {
    type Item = Chunk;
    fn next(&mut self) -> Option<Chunk> {
        let len = self.part_size.min(self.remaining());
        if len == 0 {
            return None;
        }
        let chunk = Chunk {
            handle: self.handle.clone(),
            offset: self.offset,
            len,
        };
        self.offset += len;
        Some(chunk)
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    handle: Arc<Handle>,
    offset: usize,
    len: usize,
}

impl Deref for Chunk {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        if self.len == 0 {
            return &[];
        }
        unsafe {
            let ptr = (self.handle.ptr as *const u8).add(self.offset);
            std::slice::from_raw_parts(ptr, self.len)
        }
    }
}
