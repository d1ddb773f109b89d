//! Capability table and module exports for the host runtime
//!
//! The host (a ZygiskNext-style injection framework) loads this cdylib
//! into a target process, looks up the exported module structures, and
//! invokes the attach callback with a table of capability function
//! pointers. The table layout is the host's fixed ABI and must not be
//! reordered. None of the capabilities are assumed to succeed; every
//! wrapper surfaces failure as a typed error.

use libc::{c_char, c_int, c_void};
use std::panic;
use std::ptr;

use crate::config::settings::Settings;
use crate::config::types::{Result, ShimError};

/// Host API version this module targets
pub const HOST_API_VERSION: c_int = 3;

/// Success return code used across the host ABI
pub const HOST_SUCCESS: c_int = 0;

/// Opaque host-side symbol resolver
#[repr(C)]
pub struct RawSymbolResolver {
    _private: [u8; 0],
}

/// Capability table handed to the attach callback.
///
/// Field order is ABI. `plt_hook`, `get_base_address` and
/// `for_each_symbols` are carried for layout compatibility; this
/// module only exercises the inline-hook and resolver capabilities.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HostApiTable {
    pub plt_hook: unsafe extern "C" fn(
        base_addr: *mut c_void,
        symbol: *const c_char,
        replacement: *mut c_void,
        original: *mut *mut c_void,
    ) -> c_int,

    pub inline_hook: unsafe extern "C" fn(
        target: *mut c_void,
        replacement: *mut c_void,
        original: *mut *mut c_void,
    ) -> c_int,

    pub inline_unhook: unsafe extern "C" fn(target: *mut c_void) -> c_int,

    pub new_symbol_resolver: unsafe extern "C" fn(
        path: *const c_char,
        base_addr: *mut c_void,
    ) -> *mut RawSymbolResolver,

    pub free_symbol_resolver: unsafe extern "C" fn(resolver: *mut RawSymbolResolver),

    pub get_base_address: unsafe extern "C" fn(resolver: *mut RawSymbolResolver) -> *mut c_void,

    pub symbol_lookup: unsafe extern "C" fn(
        resolver: *mut RawSymbolResolver,
        name: *const c_char,
        prefix: bool,
        size: *mut usize,
    ) -> *mut c_void,

    pub for_each_symbols: unsafe extern "C" fn(
        resolver: *mut RawSymbolResolver,
        callback: unsafe extern "C" fn(
            name: *const c_char,
            addr: *mut c_void,
            size: usize,
            data: *mut c_void,
        ) -> bool,
        data: *mut c_void,
    ),

    pub connect_companion: unsafe extern "C" fn(handle: *mut c_void) -> c_int,
}

/// Safe wrapper over the host capability table.
///
/// The table is copied by value at attach time, so its lifetime is not
/// tied to host-owned memory.
#[derive(Clone, Copy)]
pub struct HostApi {
    table: HostApiTable,
    handle: *mut c_void,
}

// Function pointers and the opaque module handle are process-global;
// the wrapper is read-only after construction.
unsafe impl Send for HostApi {}
unsafe impl Sync for HostApi {}

impl HostApi {
    /// Copy the capability table out of host memory.
    ///
    /// # Safety
    /// `table` must point to a valid [`HostApiTable`] for the duration
    /// of this call; `handle` must be the module handle the host passed
    /// alongside it.
    pub unsafe fn new(table: *const HostApiTable, handle: *mut c_void) -> Self {
        Self {
            table: unsafe { *table },
            handle,
        }
    }

    /// Redirect `target` to `replacement`, returning the trampoline the
    /// host produced for the original code.
    ///
    /// The host populates the trampoline out-parameter before the
    /// redirect goes live, so a non-null return is callable immediately.
    pub fn inline_hook(&self, target: *mut c_void, replacement: *mut c_void) -> Result<*mut c_void> {
        let mut original: *mut c_void = ptr::null_mut();
        let status = unsafe { (self.table.inline_hook)(target, replacement, &mut original) };
        if status != HOST_SUCCESS {
            return Err(ShimError::HookFailed {
                symbol: format!("{target:p}"),
                reason: format!("host inline_hook returned {status}"),
            });
        }
        Ok(original)
    }

    /// Remove a previously installed redirect.
    pub fn inline_unhook(&self, target: *mut c_void) -> Result<()> {
        let status = unsafe { (self.table.inline_unhook)(target) };
        if status != HOST_SUCCESS {
            return Err(ShimError::HookFailed {
                symbol: format!("{target:p}"),
                reason: format!("host inline_unhook returned {status}"),
            });
        }
        Ok(())
    }

    pub(crate) fn new_symbol_resolver(&self, path: *const c_char) -> *mut RawSymbolResolver {
        unsafe { (self.table.new_symbol_resolver)(path, ptr::null_mut()) }
    }

    pub(crate) fn free_symbol_resolver(&self, resolver: *mut RawSymbolResolver) {
        unsafe { (self.table.free_symbol_resolver)(resolver) }
    }

    pub(crate) fn symbol_lookup(
        &self,
        resolver: *mut RawSymbolResolver,
        name: *const c_char,
        size: &mut usize,
    ) -> *mut c_void {
        unsafe { (self.table.symbol_lookup)(resolver, name, false, size) }
    }

    /// Open a connection to the companion process.
    pub fn connect_companion(&self) -> Result<c_int> {
        let fd = unsafe { (self.table.connect_companion)(self.handle) };
        if fd < 0 {
            return Err(ShimError::Io(std::io::Error::other(
                "companion connection rejected by host",
            )));
        }
        Ok(fd)
    }
}

/// Module structure the host looks up after loading this cdylib
#[repr(C)]
pub struct ModuleExport {
    pub target_api_version: c_int,
    pub on_module_loaded: unsafe extern "C" fn(self_handle: *mut c_void, api: *const HostApiTable),
}

/// Companion-side module structure
#[repr(C)]
pub struct CompanionExport {
    pub target_api_version: c_int,
    pub on_companion_loaded: unsafe extern "C" fn(),
    pub on_module_connected: unsafe extern "C" fn(fd: c_int),
}

/// Attach callback: the single entry point into an injected process.
///
/// Runs on whatever thread the host uses for module init. Panics are
/// contained here; an injected module must never take the host process
/// down with it.
unsafe extern "C" fn module_attach(self_handle: *mut c_void, api: *const HostApiTable) {
    let outcome = panic::catch_unwind(|| {
        if api.is_null() {
            log::error!("host passed a null capability table; staying inactive");
            return;
        }
        let api = unsafe { HostApi::new(api, self_handle) };
        let settings = Settings::from_env();
        if let Err(e) = crate::lifecycle::attach(api, settings) {
            log::error!("activation failed: {e}");
        }
    });
    if outcome.is_err() {
        log::error!("panic during attach suppressed; process continues unfiltered");
    }
}

unsafe extern "C" fn companion_loaded() {
    log::info!("companion module loaded");
}

unsafe extern "C" fn companion_connected(fd: c_int) {
    if let Err(e) = panic::catch_unwind(|| crate::lifecycle::on_companion_connection(fd)) {
        let _ = e;
        log::error!("panic in companion handler suppressed");
    }
}

#[allow(non_upper_case_globals)]
#[no_mangle]
pub static zn_module: ModuleExport = ModuleExport {
    target_api_version: HOST_API_VERSION,
    on_module_loaded: module_attach,
};

#[allow(non_upper_case_globals)]
#[no_mangle]
pub static zn_companion_module: CompanionExport = CompanionExport {
    target_api_version: HOST_API_VERSION,
    on_companion_loaded: companion_loaded,
    on_module_connected: companion_connected,
};
