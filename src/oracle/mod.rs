//! Decision oracle client
//!
//! Thin binding to the decision module's three C entry points. All
//! block/allow intelligence lives on the far side of this boundary;
//! this client only guarantees the call contract: all three symbols
//! bind or none do, initialization happens exactly once, and a query
//! that cannot be asked is answered "allow" (fail open).

use libc::{c_char, c_int};
use std::ffi::CString;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::config::types::{RequestDescriptor, Result, ShimError};
use crate::loader::ModuleHandle;

/// Entry point that receives the config path; nonzero means refusal.
pub const INIT_SYMBOL: &str = "netshim_rules_init";
/// Entry point for orderly teardown.
pub const SHUTDOWN_SYMBOL: &str = "netshim_rules_shutdown";
/// The block/allow query; nonzero means block.
pub const SHOULD_BLOCK_SYMBOL: &str = "netshim_rules_should_block";

pub type InitFn = unsafe extern "C" fn(config_path: *const c_char) -> c_int;
pub type ShutdownFn = unsafe extern "C" fn() -> c_int;
pub type ShouldBlockFn = unsafe extern "C" fn(
    target: *const c_char,
    kind: *const c_char,
    origin: *const c_char,
) -> c_int;

/// Resolved decision-module entry points.
///
/// Bound at most once per process. The query side is read-only
/// function pointers, safe to invoke from any thread; the decision
/// module is contractually required to make `should_block` both
/// thread-safe and prompt; the calling handler has no timeout of its
/// own.
pub struct DecisionOracle {
    init: InitFn,
    shutdown: ShutdownFn,
    should_block: ShouldBlockFn,
}

impl DecisionOracle {
    /// Bind all three entry points from a loaded decision module.
    ///
    /// Partial bindings are not a thing: the first missing symbol
    /// fails the whole bind.
    pub fn bind(module: &ModuleHandle) -> Result<Self> {
        let init = module
            .symbol(INIT_SYMBOL)
            .ok_or_else(|| ShimError::SymbolMissing(INIT_SYMBOL.to_string()))?;
        let shutdown = module
            .symbol(SHUTDOWN_SYMBOL)
            .ok_or_else(|| ShimError::SymbolMissing(SHUTDOWN_SYMBOL.to_string()))?;
        let should_block = module
            .symbol(SHOULD_BLOCK_SYMBOL)
            .ok_or_else(|| ShimError::SymbolMissing(SHOULD_BLOCK_SYMBOL.to_string()))?;

        // Addresses came from dlsym against symbols we declare the C
        // signatures for; the decision-module ABI fixes these shapes.
        Ok(unsafe {
            Self::from_raw_parts(
                mem::transmute::<*mut libc::c_void, InitFn>(init),
                mem::transmute::<*mut libc::c_void, ShutdownFn>(shutdown),
                mem::transmute::<*mut libc::c_void, ShouldBlockFn>(should_block),
            )
        })
    }

    /// Assemble an oracle from already-resolved entry points.
    ///
    /// For hosts that link their decision logic statically instead of
    /// shipping a loadable module.
    ///
    /// # Safety
    /// The three pointers must be live C functions with the declared
    /// signatures for the rest of the process lifetime.
    pub unsafe fn from_raw_parts(
        init: InitFn,
        shutdown: ShutdownFn,
        should_block: ShouldBlockFn,
    ) -> Self {
        Self {
            init,
            shutdown,
            should_block,
        }
    }

    /// Hand the decision module its config path.
    ///
    /// A nonzero status is a refusal and poisons the whole activation:
    /// no hooks are installed after a failed initialize.
    pub fn initialize(&self, config_path: &Path) -> Result<()> {
        let c_path = CString::new(config_path.as_os_str().as_bytes())
            .map_err(|_| ShimError::OracleInitFailed(-1))?;
        let status = unsafe { (self.init)(c_path.as_ptr()) };
        if status != 0 {
            return Err(ShimError::OracleInitFailed(status));
        }
        log::info!(
            "decision oracle initialized with {}",
            config_path.display()
        );
        Ok(())
    }

    /// Ask for orderly teardown.
    ///
    /// Bound for contract completeness; the injected runtime itself
    /// never tears down before process exit.
    pub fn request_shutdown(&self) -> i32 {
        unsafe { (self.shutdown)() }
    }

    /// Should this request be denied?
    ///
    /// Pure query; an unaskable query (NUL byte in a field) answers
    /// `false` so a hostile target name can never turn into a block of
    /// everything else.
    pub fn should_block(&self, descriptor: &RequestDescriptor) -> bool {
        let (Ok(target), Ok(kind), Ok(origin)) = (
            CString::new(descriptor.target.as_str()),
            CString::new(descriptor.kind.as_tag()),
            CString::new(descriptor.origin),
        ) else {
            log::debug!("unaskable oracle query for {:?}; allowing", descriptor.target);
            return false;
        };
        let verdict =
            unsafe { (self.should_block)(target.as_ptr(), kind.as_ptr(), origin.as_ptr()) };
        verdict != 0
    }
}
