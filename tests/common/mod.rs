//! Shared fixtures: an in-process host capability table and fake
//! decision-module entry points.
//!
//! The table is shaped exactly like the one a real host would pass at
//! attach time, but "installing" a hook only records the call and
//! hands back the matching fake original as the trampoline, so
//! handler forwarding is observable without patching any real code.
#![allow(dead_code)]

use libc::{addrinfo, c_char, c_int, c_void, hostent, sockaddr, socklen_t};
use netshim::host::api::{HostApi, HostApiTable, RawSymbolResolver, HOST_SUCCESS};
use netshim::oracle::DecisionOracle;
use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub static INSTALL_CALLS: AtomicUsize = AtomicUsize::new(0);
pub static UNINSTALL_CALLS: AtomicUsize = AtomicUsize::new(0);
pub static RESOLVERS_OPENED: AtomicUsize = AtomicUsize::new(0);
pub static RESOLVERS_FREED: AtomicUsize = AtomicUsize::new(0);

pub static CONNECT_FORWARDED: AtomicUsize = AtomicUsize::new(0);
pub static GETHOSTBYNAME_FORWARDED: AtomicUsize = AtomicUsize::new(0);
pub static GETADDRINFO_FORWARDED: AtomicUsize = AtomicUsize::new(0);

pub static LAST_SERVICE: Mutex<Option<String>> = Mutex::new(None);

// Distinct static bytes give every hookable symbol a stable fake
// in-process address.
static CONNECT_SITE: u8 = 1;
static GETHOSTBYNAME_SITE: u8 = 2;
static GETADDRINFO_SITE: u8 = 3;
static RESOLVER_SITE: u8 = 4;
static HOSTENT_SENTINEL: u8 = 5;

fn site(sym: &str) -> *mut c_void {
    let site: &'static u8 = match sym {
        "connect" => &CONNECT_SITE,
        "gethostbyname" => &GETHOSTBYNAME_SITE,
        "getaddrinfo" => &GETADDRINFO_SITE,
        _ => return std::ptr::null_mut(),
    };
    site as *const u8 as *mut c_void
}

/// The pointer the fake gethostbyname original returns on success.
pub fn hostent_sentinel() -> *mut hostent {
    &HOSTENT_SENTINEL as *const u8 as *mut hostent
}

unsafe extern "C" fn original_connect(
    _sockfd: c_int,
    _addr: *const sockaddr,
    _len: socklen_t,
) -> c_int {
    CONNECT_FORWARDED.fetch_add(1, Ordering::SeqCst);
    0
}

unsafe extern "C" fn original_gethostbyname(_name: *const c_char) -> *mut hostent {
    GETHOSTBYNAME_FORWARDED.fetch_add(1, Ordering::SeqCst);
    hostent_sentinel()
}

unsafe extern "C" fn original_getaddrinfo(
    _node: *const c_char,
    service: *const c_char,
    _hints: *const addrinfo,
    _res: *mut *mut addrinfo,
) -> c_int {
    GETADDRINFO_FORWARDED.fetch_add(1, Ordering::SeqCst);
    let seen = if service.is_null() {
        None
    } else {
        Some(
            unsafe { CStr::from_ptr(service) }
                .to_string_lossy()
                .into_owned(),
        )
    };
    *LAST_SERVICE.lock().unwrap() = seen;
    0
}

pub fn original_connect_ptr() -> *mut c_void {
    original_connect as *const () as *mut c_void
}

pub fn original_gethostbyname_ptr() -> *mut c_void {
    original_gethostbyname as *const () as *mut c_void
}

pub fn original_getaddrinfo_ptr() -> *mut c_void {
    original_getaddrinfo as *const () as *mut c_void
}

fn trampoline_for(target: *mut c_void) -> *mut c_void {
    if target == site("connect") {
        original_connect_ptr()
    } else if target == site("gethostbyname") {
        original_gethostbyname_ptr()
    } else if target == site("getaddrinfo") {
        original_getaddrinfo_ptr()
    } else {
        std::ptr::null_mut()
    }
}

unsafe extern "C" fn plt_hook(
    _base: *mut c_void,
    _symbol: *const c_char,
    _replacement: *mut c_void,
    _original: *mut *mut c_void,
) -> c_int {
    1
}

unsafe extern "C" fn inline_hook(
    target: *mut c_void,
    _replacement: *mut c_void,
    original: *mut *mut c_void,
) -> c_int {
    INSTALL_CALLS.fetch_add(1, Ordering::SeqCst);
    unsafe {
        *original = trampoline_for(target);
    }
    HOST_SUCCESS
}

unsafe extern "C" fn inline_unhook(_target: *mut c_void) -> c_int {
    UNINSTALL_CALLS.fetch_add(1, Ordering::SeqCst);
    HOST_SUCCESS
}

unsafe extern "C" fn new_symbol_resolver(
    _path: *const c_char,
    _base: *mut c_void,
) -> *mut RawSymbolResolver {
    RESOLVERS_OPENED.fetch_add(1, Ordering::SeqCst);
    &RESOLVER_SITE as *const u8 as *mut RawSymbolResolver
}

unsafe extern "C" fn free_symbol_resolver(_resolver: *mut RawSymbolResolver) {
    RESOLVERS_FREED.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn get_base_address(_resolver: *mut RawSymbolResolver) -> *mut c_void {
    std::ptr::null_mut()
}

unsafe extern "C" fn lookup_all(
    _resolver: *mut RawSymbolResolver,
    name: *const c_char,
    _prefix: bool,
    size: *mut usize,
) -> *mut c_void {
    unsafe {
        *size = 16;
    }
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    site(&name)
}

unsafe extern "C" fn lookup_skip_connect(
    resolver: *mut RawSymbolResolver,
    name: *const c_char,
    prefix: bool,
    size: *mut usize,
) -> *mut c_void {
    let text = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    if text == "connect" {
        return std::ptr::null_mut();
    }
    unsafe { lookup_all(resolver, name, prefix, size) }
}

unsafe extern "C" fn for_each_symbols(
    _resolver: *mut RawSymbolResolver,
    _callback: unsafe extern "C" fn(*const c_char, *mut c_void, usize, *mut c_void) -> bool,
    _data: *mut c_void,
) {
}

unsafe extern "C" fn connect_companion(_handle: *mut c_void) -> c_int {
    -1
}

fn table_with_lookup(
    lookup: unsafe extern "C" fn(
        *mut RawSymbolResolver,
        *const c_char,
        bool,
        *mut usize,
    ) -> *mut c_void,
) -> HostApiTable {
    HostApiTable {
        plt_hook,
        inline_hook,
        inline_unhook,
        new_symbol_resolver,
        free_symbol_resolver,
        get_base_address,
        symbol_lookup: lookup,
        for_each_symbols,
        connect_companion,
    }
}

/// Capability table where every hookable symbol resolves.
pub fn full_table() -> HostApiTable {
    table_with_lookup(lookup_all)
}

/// Capability table where `connect` is missing from the scan.
pub fn table_without_connect() -> HostApiTable {
    table_with_lookup(lookup_skip_connect)
}

pub fn host_api(table: &HostApiTable) -> HostApi {
    unsafe { HostApi::new(table, std::ptr::null_mut()) }
}

// Fake decision-module entry points.

pub unsafe extern "C" fn rules_init_ok(_config: *const c_char) -> c_int {
    0
}

pub unsafe extern "C" fn rules_init_refuse(_config: *const c_char) -> c_int {
    3
}

pub unsafe extern "C" fn rules_shutdown() -> c_int {
    0
}

pub unsafe extern "C" fn rules_block_blocked_example(
    target: *const c_char,
    _kind: *const c_char,
    _origin: *const c_char,
) -> c_int {
    let target = unsafe { CStr::from_ptr(target) }.to_string_lossy().into_owned();
    i32::from(target == "blocked.example")
}

/// Oracle that initializes cleanly and blocks exactly `blocked.example`.
pub fn working_oracle() -> DecisionOracle {
    unsafe { DecisionOracle::from_raw_parts(rules_init_ok, rules_shutdown, rules_block_blocked_example) }
}

/// Oracle whose initialize refuses with a nonzero status.
pub fn refusing_oracle() -> DecisionOracle {
    unsafe {
        DecisionOracle::from_raw_parts(rules_init_refuse, rules_shutdown, rules_block_blocked_example)
    }
}

/// Settings that keep all side effects inside the test process.
pub fn quiet_settings() -> netshim::Settings {
    let mut settings = netshim::Settings::default();
    settings.audit_log_path = None;
    settings
}
