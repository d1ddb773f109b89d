//! Scoped symbol resolution against a loaded library image
//!
//! The host resolver scans the mapped ELF image itself instead of
//! going through the dynamic linker, so it keeps working against
//! stripped or visibility-restricted system libraries where plain
//! `dlsym` does not. The scan is a scoped resource: opened before hook
//! installation, freed on drop no matter how installation went.

use libc::c_void;
use std::ffi::CString;

use crate::config::types::{Result, ShimError};
use crate::host::api::{HostApi, RawSymbolResolver};

/// Resolved in-process location of one exported symbol
#[derive(Debug, Clone, Copy)]
pub struct SymbolRef {
    pub addr: *mut c_void,
    pub size: usize,
}

/// One open resolver scan over a target library
pub struct SymbolScan {
    api: HostApi,
    raw: *mut RawSymbolResolver,
    library: String,
}

impl SymbolScan {
    /// Open a resolver for `library` through the host capability table.
    pub fn open(api: &HostApi, library: &str) -> Result<Self> {
        let path = CString::new(library)
            .map_err(|_| ShimError::ResolverUnavailable(library.to_string()))?;
        let raw = api.new_symbol_resolver(path.as_ptr());
        if raw.is_null() {
            return Err(ShimError::ResolverUnavailable(library.to_string()));
        }
        log::debug!("symbol resolver open for {library}");
        Ok(Self {
            api: *api,
            raw,
            library: library.to_string(),
        })
    }

    /// Look up one exported symbol.
    ///
    /// `None` means this symbol only; other lookups against the same
    /// scan remain valid.
    pub fn lookup(&self, symbol: &str) -> Option<SymbolRef> {
        let name = CString::new(symbol).ok()?;
        let mut size: usize = 0;
        let addr = self.api.symbol_lookup(self.raw, name.as_ptr(), &mut size);
        if addr.is_null() {
            log::debug!("symbol {symbol} not found in {}", self.library);
            return None;
        }
        Some(SymbolRef { addr, size })
    }

    pub fn library(&self) -> &str {
        &self.library
    }
}

impl Drop for SymbolScan {
    fn drop(&mut self) {
        self.api.free_symbol_resolver(self.raw);
    }
}
