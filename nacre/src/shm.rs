// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use std::{
    num::NonZeroUsize,
    os::fd::{AsFd, OwnedFd},
    ptr::NonNull,
};

use anyhow::bail;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

// TODO: malicious or broken clients can cause us to crash with SIGBUS. We
// should handle that with an exception handler.

slotmap::new_key_type! { pub struct ShmPoolKey; }

/// A client shared-memory pool, mapped read-only for renderer access. The
/// mapping outlives the wl_shm_pool resource until the last buffer carved
/// out of it is destroyed.
pub struct ShmPool {
    fd: OwnedFd,
    ptr: Option<NonNull<std::ffi::c_void>>,
    size: usize,
    pub(crate) buffers: u32,
    pub(crate) resource_alive: bool,
}

impl ShmPool {
    pub fn new(fd: OwnedFd, size: usize) -> anyhow::Result<Self> {
        let ptr = map(&fd, size)?;
        Ok(ShmPool {
            fd,
            ptr: Some(ptr),
            size,
            buffers: 0,
            resource_alive: true,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn data(&self, offset: usize, len: usize) -> &[u8] {
        let ptr = self.ptr.expect("mmap defunct");
        assert!(offset + len <= self.size);
        unsafe { std::slice::from_raw_parts(ptr.as_ptr().cast::<u8>().add(offset), len) }
    }

    pub fn resize(&mut self, new_size: usize) -> anyhow::Result<()> {
        if new_size < self.size {
            bail!("shm pools may only grow");
        }

        self.unmap();
        self.ptr = Some(map(&self.fd, new_size)?);
        self.size = new_size;

        Ok(())
    }

    fn unmap(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            unsafe { munmap(ptr, self.size).expect("munmap failed") }
        }
    }
}

fn map(fd: impl AsFd, size: usize) -> anyhow::Result<NonNull<std::ffi::c_void>> {
    let Some(len) = NonZeroUsize::new(size) else {
        bail!("zero-sized mmap");
    };

    let ptr = unsafe { mmap(None, len, ProtFlags::PROT_READ, MapFlags::MAP_SHARED, fd, 0)? };

    Ok(ptr)
}

impl Drop for ShmPool {
    fn drop(&mut self) {
        self.unmap();
    }
}
