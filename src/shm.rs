// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Anonymous memory-backed region (`memfd_create` + `mmap`), owned by the
// writer and attached by readers from a file descriptor received over the
// control channel. Unlike named POSIX shm, nothing under this is visible in
// the filesystem; the region disappears once every fd referencing it closes.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;

/// A single mapped region. Dropping it unmaps the memory; the backing fd
/// (if owned) is closed by its own `Drop` impl.
pub struct ShmRegion {
    ptr: NonNull<u8>,
    len: usize,
    fd: Option<OwnedFd>,
}

// The mapping is shared across processes by construction; `Writer`/`Reader`
// enforce the single-writer/many-reader access discipline on top of it.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Creates a new anonymous memfd, sizes it, and maps it read/write.
    /// Returns the region plus a duplicate fd suitable for handing to a
    /// reader via `SCM_RIGHTS` (the region keeps its own fd for the mapping's
    /// lifetime; the caller owns the duplicate independently).
    pub fn create(len: usize) -> io::Result<(Self, OwnedFd)> {
        let name = std::ffi::CString::new("vitalring").unwrap();
        let raw = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let dup_raw = unsafe { libc::dup(fd.as_raw_fd()) };
        if dup_raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let dup = unsafe { OwnedFd::from_raw_fd(dup_raw) };

        let region = Self::map(fd.as_raw_fd(), len, true)?;
        Ok((
            Self {
                ptr: region,
                len,
                fd: Some(fd),
            },
            dup,
        ))
    }

    /// Maps a region received from a peer (read-only), taking ownership of
    /// `fd`. `len` must be the region size agreed on during handshake.
    pub fn attach(fd: OwnedFd, len: usize) -> io::Result<Self> {
        let ptr = Self::map(fd.as_raw_fd(), len, false)?;
        Ok(Self {
            ptr,
            len,
            fd: Some(fd),
        })
    }

    fn map(fd: RawFd, len: usize, writable: bool) -> io::Result<NonNull<u8>> {
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };
        let addr = unsafe { libc::mmap(std::ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, 0) };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(NonNull::new(addr as *mut u8).expect("mmap returned a null non-failure address"))
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn fd(&self) -> RawFd {
        self.fd
            .as_ref()
            .expect("region always owns its fd")
            .as_raw_fd()
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}
