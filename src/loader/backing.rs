//! Anonymous memory-backed staging file
//!
//! The decision module is staged into an anonymous, file-like memory
//! region and loaded from its `/proc/self/fd/<n>` alias, so the bytes
//! that get mapped are byte-identical to the module on disk while the
//! load itself never names the policy-restricted source path.
//!
//! Two mechanisms, tried in order: `memfd_create` where the kernel
//! provides it, and the legacy `/dev/ashmem` device otherwise. The
//! copy is exact or the attempt dies: a short read or write abandons
//! this staging file, never a truncated module image.

use libc::{c_char, c_void};
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::PathBuf;
use std::ptr;

use crate::config::types::{Result, ShimError};

/// Which anonymous-memory mechanism backs the staging file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingMechanism {
    MemFd,
    Ashmem,
}

impl BackingMechanism {
    pub fn label(self) -> &'static str {
        match self {
            BackingMechanism::MemFd => "memfd",
            BackingMechanism::Ashmem => "ashmem",
        }
    }
}

const ASHMEM_DEVICE: &[u8] = b"/dev/ashmem\0";
const ASHMEM_NAME_LEN: usize = 256;

// _IOW('x', nr, size): dir=write(1)<<30 | size<<16 | type<<8 | nr
const fn ashmem_iow(nr: u64, size: u64) -> u64 {
    (1 << 30) | (size << 16) | (0x77 << 8) | nr
}
const ASHMEM_SET_NAME: u64 = ashmem_iow(1, ASHMEM_NAME_LEN as u64);
const ASHMEM_SET_SIZE: u64 = ashmem_iow(3, std::mem::size_of::<libc::size_t>() as u64);

/// Anonymous staging file sized exactly to the module being loaded.
///
/// Dropping this abandons the staging attempt and closes the
/// descriptor; a successful load must take the descriptor out with
/// [`BackingFile::into_fd`] and keep it open for the life of the
/// loaded module.
pub struct BackingFile {
    fd: OwnedFd,
    mechanism: BackingMechanism,
    len: u64,
}

impl BackingFile {
    /// Create an anonymous file of exactly `len` bytes.
    pub fn create(name: &str, len: u64) -> Result<Self> {
        match Self::create_memfd(name, len) {
            Ok(backing) => Ok(backing),
            Err(e) => {
                log::debug!("memfd unavailable ({e}); trying ashmem");
                Self::create_ashmem(name, len)
            }
        }
    }

    fn create_memfd(name: &str, len: u64) -> Result<Self> {
        let c_name = CString::new(name)
            .map_err(|_| ShimError::Io(io::Error::other("NUL in backing file name")))?;
        let raw = unsafe { libc::memfd_create(c_name.as_ptr(), libc::MFD_CLOEXEC) };
        if raw < 0 {
            return Err(ShimError::Io(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } != 0 {
            return Err(ShimError::Io(io::Error::last_os_error()));
        }
        Ok(Self {
            fd,
            mechanism: BackingMechanism::MemFd,
            len,
        })
    }

    fn create_ashmem(name: &str, len: u64) -> Result<Self> {
        let raw = unsafe {
            libc::open(
                ASHMEM_DEVICE.as_ptr() as *const c_char,
                libc::O_RDWR | libc::O_CLOEXEC,
            )
        };
        if raw < 0 {
            return Err(ShimError::Io(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut name_buf = [0u8; ASHMEM_NAME_LEN];
        let copy_len = name.len().min(ASHMEM_NAME_LEN - 1);
        name_buf[..copy_len].copy_from_slice(&name.as_bytes()[..copy_len]);
        if unsafe { libc::ioctl(fd.as_raw_fd(), ASHMEM_SET_NAME as _, name_buf.as_ptr()) } < 0 {
            return Err(ShimError::Io(io::Error::last_os_error()));
        }
        if unsafe { libc::ioctl(fd.as_raw_fd(), ASHMEM_SET_SIZE as _, len as libc::size_t) } < 0 {
            return Err(ShimError::Io(io::Error::last_os_error()));
        }

        Ok(Self {
            fd,
            mechanism: BackingMechanism::Ashmem,
            len,
        })
    }

    /// Copy the module bytes in, verbatim and complete.
    ///
    /// Anything other than exactly `len` bytes arriving is
    /// [`ShimError::CopyIncomplete`].
    pub fn fill_from(&mut self, src: &mut File) -> Result<()> {
        match self.mechanism {
            BackingMechanism::MemFd => {
                let mut out = File::from(self.fd.try_clone()?);
                let copied = io::copy(src, &mut out)?;
                if copied != self.len {
                    return Err(ShimError::CopyIncomplete {
                        expected: self.len,
                        copied,
                    });
                }
                Ok(())
            }
            // ashmem regions are populated through a shared mapping,
            // not write(2)
            BackingMechanism::Ashmem => self.fill_via_mmap(src),
        }
    }

    fn fill_via_mmap(&mut self, src: &mut File) -> Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        let map_len = self.len as usize;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ShimError::Io(io::Error::last_os_error()));
        }

        let outcome = (|| {
            let buf = unsafe { std::slice::from_raw_parts_mut(base as *mut u8, map_len) };
            let mut copied = 0usize;
            loop {
                let n = src.read(&mut buf[copied..])?;
                if n == 0 {
                    break;
                }
                copied += n;
                if copied == map_len {
                    break;
                }
            }
            if copied as u64 != self.len {
                return Err(ShimError::CopyIncomplete {
                    expected: self.len,
                    copied: copied as u64,
                });
            }
            Ok(())
        })();

        unsafe {
            libc::munmap(base as *mut c_void, map_len);
        }
        outcome
    }

    /// Process-local path alias the dynamic loader can open.
    pub fn proc_path(&self) -> PathBuf {
        PathBuf::from(format!("/proc/self/fd/{}", self.fd.as_raw_fd()))
    }

    pub fn mechanism(&self) -> BackingMechanism {
        self.mechanism
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Keep the descriptor alive past the staging phase.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}
