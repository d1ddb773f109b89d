//! Decision module loading
//!
//! Walks an ordered list of candidate paths and tries an ordered list
//! of load strategies against each: first a memory-backed load through
//! an anonymous descriptor (bypasses path-based access-control policy
//! that would reject the on-disk location), then a direct `dlopen` of
//! the original path. The first candidate that produces a live handle
//! wins; a candidate that is not readable is skipped, not an error.
//!
//! Strategies are plain functions applied in sequence, so adding a
//! third loading mechanism is a pure extension of the table below.

pub mod backing;

use libc::c_void;
use nix::unistd::{access, AccessFlags};
use std::ffi::{CStr, CString};
use std::fs::File;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::config::types::{Result, ShimError};
use crate::loader::backing::BackingFile;

/// A loaded decision module.
///
/// Owns the dynamic-loader handle and, for a memory-backed load, the
/// anonymous descriptor the image was loaded from; that descriptor
/// must stay open for the life of the module. At most one of these
/// exists per process. In normal operation the handle is never
/// dropped: it is parked in lifecycle storage until process exit;
/// only abandoned load attempts unload.
#[derive(Debug)]
pub struct ModuleHandle {
    raw: *mut c_void,
    backing: Option<OwnedFd>,
    origin: PathBuf,
}

// The dl handle is process-global state guarded by the loader's
// write-once usage; symbol lookup through it is read-only.
unsafe impl Send for ModuleHandle {}
unsafe impl Sync for ModuleHandle {}

impl ModuleHandle {
    /// Resolve one exported symbol from this module.
    pub fn symbol(&self, name: &str) -> Option<*mut c_void> {
        let c_name = CString::new(name).ok()?;
        let addr = unsafe { libc::dlsym(self.raw, c_name.as_ptr()) };
        if addr.is_null() {
            None
        } else {
            Some(addr)
        }
    }

    /// Path the module bytes came from.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Whether the image was loaded through an anonymous descriptor.
    pub fn memory_backed(&self) -> bool {
        self.backing.is_some()
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        // Reached only when a load attempt is abandoned; the backing
        // descriptor closes after the image is unmapped (field order).
        unsafe {
            libc::dlclose(self.raw);
        }
    }
}

type LoadStrategy = fn(&Path) -> Result<ModuleHandle>;

const STRATEGIES: [(&str, LoadStrategy); 2] = [
    ("memory-backed", load_memory_backed),
    ("direct", load_direct),
];

/// Load the decision module from the first viable candidate.
pub fn load_decision_module(candidates: &[PathBuf]) -> Result<ModuleHandle> {
    for path in candidates {
        if access(path, AccessFlags::R_OK).is_err() {
            log::debug!(
                "candidate {} not present or unreadable; skipping",
                path.display()
            );
            continue;
        }
        for (label, strategy) in STRATEGIES {
            match strategy(path) {
                Ok(module) => {
                    log::info!("decision module loaded from {} ({label})", path.display());
                    return Ok(module);
                }
                Err(e) => {
                    log::debug!("{label} load of {} did not stick: {e}", path.display());
                }
            }
        }
    }
    Err(ShimError::ModuleNotFound)
}

fn load_memory_backed(path: &Path) -> Result<ModuleHandle> {
    let mut src = File::open(path)?;
    let len = src.metadata()?.len();

    let mut backing = match BackingFile::create("netshim-rules", len) {
        Ok(b) => b,
        Err(e) => {
            log::warn!(
                "no anonymous backing descriptor for {}: {e}",
                path.display()
            );
            return Err(e);
        }
    };
    if let Err(e) = backing.fill_from(&mut src) {
        log::info!("staging copy of {} abandoned: {e}", path.display());
        return Err(e);
    }
    let raw = match dlopen(&backing.proc_path()) {
        Ok(raw) => raw,
        Err(e) => {
            log::debug!(
                "load from {} alias failed: {e}",
                backing.mechanism().label()
            );
            return Err(e);
        }
    };
    Ok(ModuleHandle {
        raw,
        backing: Some(backing.into_fd()),
        origin: path.to_path_buf(),
    })
}

fn load_direct(path: &Path) -> Result<ModuleHandle> {
    let raw = dlopen(path)?;
    Ok(ModuleHandle {
        raw,
        backing: None,
        origin: path.to_path_buf(),
    })
}

fn dlopen(path: &Path) -> Result<*mut c_void> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ShimError::DynamicLoader("NUL byte in module path".to_string()))?;
    let raw = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY) };
    if raw.is_null() {
        return Err(ShimError::DynamicLoader(last_dl_error()));
    }
    Ok(raw)
}

fn last_dl_error() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn no_readable_candidate_is_module_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let candidates = vec![
            dir.path().join("missing-a.so"),
            dir.path().join("missing-b.so"),
        ];
        match load_decision_module(&candidates) {
            Err(ShimError::ModuleNotFound) => {}
            other => panic!("expected ModuleNotFound, got {other:?}"),
        }
    }

    #[test]
    fn unloadable_candidate_falls_through_every_strategy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bogus = dir.path().join("not-an-elf.so");
        std::fs::File::create(&bogus)
            .and_then(|mut f| f.write_all(b"this is not a shared object"))
            .expect("fixture");

        // Readable, so both strategies run; neither can map it.
        match load_decision_module(&[bogus]) {
            Err(ShimError::ModuleNotFound) => {}
            other => panic!("expected ModuleNotFound, got {other:?}"),
        }
    }

    #[test]
    fn empty_candidate_list_is_module_not_found() {
        match load_decision_module(&[]) {
            Err(ShimError::ModuleNotFound) => {}
            other => panic!("expected ModuleNotFound, got {other:?}"),
        }
    }
}
