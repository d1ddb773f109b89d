//! Inline-hook installation
//!
//! Wraps the host's inline-hook primitive behind an immutable
//! [`HookRecord`] so nothing outside this family ever holds a bare
//! code address. A process-wide registry of hooked target addresses
//! makes a second install attempt on the same address fail cleanly
//! instead of corrupting the first record's trampoline.

use libc::c_void;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use crate::config::types::{Result, ShimError};
use crate::host::api::HostApi;

/// One installed redirection.
///
/// Immutable for the process lifetime once created. The trampoline is
/// the only path back to the original code; it always reaches pre-hook
/// instructions, never the hook chain, so handlers cannot recurse into
/// themselves through it.
#[derive(Debug)]
pub struct HookRecord {
    symbol: &'static str,
    target: *mut c_void,
    replacement: *mut c_void,
    trampoline: *mut c_void,
}

// Raw code addresses; valid for as long as the hooked library stays
// mapped, which is the process lifetime.
unsafe impl Send for HookRecord {}
unsafe impl Sync for HookRecord {}

impl HookRecord {
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    pub fn target(&self) -> *mut c_void {
        self.target
    }

    pub fn replacement(&self) -> *mut c_void {
        self.replacement
    }

    /// Callable path back to the pre-hook code.
    pub fn trampoline(&self) -> *mut c_void {
        self.trampoline
    }
}

fn installed_targets() -> &'static Mutex<HashSet<usize>> {
    static INSTALLED: OnceLock<Mutex<HashSet<usize>>> = OnceLock::new();
    INSTALLED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Hook installer bound to one host capability table
pub struct HookEngine<'a> {
    api: &'a HostApi,
}

impl<'a> HookEngine<'a> {
    pub fn new(api: &'a HostApi) -> Self {
        Self { api }
    }

    /// Redirect `target` to `replacement` and return the install record.
    ///
    /// Fails cleanly if `target` is already hooked in this process or
    /// if the host rejects the redirect; a failed install leaves no
    /// registry entry behind.
    pub fn install(
        &self,
        symbol: &'static str,
        target: *mut c_void,
        replacement: *mut c_void,
    ) -> Result<HookRecord> {
        let key = target as usize;
        {
            let Ok(mut registry) = installed_targets().lock() else {
                return Err(ShimError::HookFailed {
                    symbol: symbol.to_string(),
                    reason: "hook registry poisoned".to_string(),
                });
            };
            if !registry.insert(key) {
                return Err(ShimError::HookFailed {
                    symbol: symbol.to_string(),
                    reason: format!("target {target:p} already hooked"),
                });
            }
        }

        let trampoline = match self.api.inline_hook(target, replacement) {
            Ok(t) if !t.is_null() => t,
            Ok(_) => {
                // A hook without a trampoline cannot forward; back out.
                let _ = self.api.inline_unhook(target);
                self.forget(key);
                return Err(ShimError::HookFailed {
                    symbol: symbol.to_string(),
                    reason: "host returned a null trampoline".to_string(),
                });
            }
            Err(e) => {
                self.forget(key);
                return Err(ShimError::HookFailed {
                    symbol: symbol.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        log::info!("hooked {symbol} at {target:p}");
        Ok(HookRecord {
            symbol,
            target,
            replacement,
            trampoline,
        })
    }

    /// Remove an installed redirect and release its registry entry.
    pub fn uninstall(&self, record: &HookRecord) -> Result<()> {
        self.api.inline_unhook(record.target)?;
        self.forget(record.target as usize);
        log::info!("unhooked {} at {:p}", record.symbol, record.target);
        Ok(())
    }

    fn forget(&self, key: usize) {
        if let Ok(mut registry) = installed_targets().lock() {
            registry.remove(&key);
        }
    }
}
