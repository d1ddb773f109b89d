//! Interception handlers and the process-scoped context they read
//!
//! Three replacement functions, one per hooked libc entry point. Each
//! runs inline on whatever application thread made the call, builds an
//! ephemeral [`RequestDescriptor`], asks the oracle, and either forges
//! the matching failure result or forwards through the saved
//! trampoline. There is no handler-owned locking: the oracle binding
//! and trampoline slots are written once during activation and only
//! read afterwards.
//!
//! Fail open is the rule everywhere. No oracle bound (never loaded, or
//! its initialization failed) means every handler is a pure
//! passthrough; a broken ad-blocker must never take a process's
//! networking down with it.

use libc::{addrinfo, c_char, c_int, c_void, hostent, sockaddr, socklen_t};
use serde::Serialize;
use std::ffi::CStr;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::config::types::{RequestDescriptor, RequestKind, Result, ShimError};
use crate::observability::audit::{self, AuditEvent, AuditSeverity};
use crate::oracle::DecisionOracle;

/// Origin tag for the connect handler
pub const ORIGIN_CONNECT: &str = "connect";
/// Origin tag for the gethostbyname handler
pub const ORIGIN_GETHOSTBYNAME: &str = "gethostbyname";
/// Origin tag for the getaddrinfo handler
pub const ORIGIN_GETADDRINFO: &str = "getaddrinfo";

static ORACLE: OnceLock<DecisionOracle> = OnceLock::new();

static CONNECT_ORIG: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static GETHOSTBYNAME_ORIG: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static GETADDRINFO_ORIG: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

/// Publish the process-wide oracle binding. Write-once: a second bind
/// attempt fails without disturbing the first.
pub fn bind_oracle(oracle: DecisionOracle) -> Result<()> {
    ORACLE
        .set(oracle)
        .map_err(|_| ShimError::OracleAlreadyBound)
}

/// Whether a decision oracle is bound and ready for queries.
pub fn oracle_ready() -> bool {
    ORACLE.get().is_some()
}

fn oracle() -> Option<&'static DecisionOracle> {
    ORACLE.get()
}

fn blocked_by(oracle: Option<&DecisionOracle>, descriptor: &RequestDescriptor) -> bool {
    oracle.map_or(false, |o| o.should_block(descriptor))
}

/// Wiring description of one hook: which symbol to redirect, to what,
/// and where the resulting trampoline gets parked.
pub struct HookSpec {
    pub symbol: &'static str,
    replacement: *mut c_void,
    slot: &'static AtomicPtr<c_void>,
}

impl HookSpec {
    pub fn replacement(&self) -> *mut c_void {
        self.replacement
    }

    /// Park the trampoline for this hook's handler.
    ///
    /// The host writes the trampoline before its redirect goes live,
    /// so storing it right after install closes the wiring loop.
    pub fn record_trampoline(&self, trampoline: *mut c_void) {
        self.slot.store(trampoline, Ordering::Release);
    }
}

/// The full hook set, in install order.
pub fn hook_specs() -> [HookSpec; 3] {
    [
        HookSpec {
            symbol: "connect",
            replacement: connect_hook as *const () as *mut c_void,
            slot: &CONNECT_ORIG,
        },
        HookSpec {
            symbol: "gethostbyname",
            replacement: gethostbyname_hook as *const () as *mut c_void,
            slot: &GETHOSTBYNAME_ORIG,
        },
        HookSpec {
            symbol: "getaddrinfo",
            replacement: getaddrinfo_hook as *const () as *mut c_void,
            slot: &GETADDRINFO_ORIG,
        },
    ]
}

type ConnectFn = unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int;
type GethostbynameFn = unsafe extern "C" fn(*const c_char) -> *mut hostent;
type GetaddrinfoFn = unsafe extern "C" fn(
    *const c_char,
    *const c_char,
    *const addrinfo,
    *mut *mut addrinfo,
) -> c_int;

fn connect_trampoline() -> Option<ConnectFn> {
    let raw = CONNECT_ORIG.load(Ordering::Acquire);
    if raw.is_null() {
        return None;
    }
    Some(unsafe { mem::transmute::<*mut c_void, ConnectFn>(raw) })
}

fn gethostbyname_trampoline() -> Option<GethostbynameFn> {
    let raw = GETHOSTBYNAME_ORIG.load(Ordering::Acquire);
    if raw.is_null() {
        return None;
    }
    Some(unsafe { mem::transmute::<*mut c_void, GethostbynameFn>(raw) })
}

fn getaddrinfo_trampoline() -> Option<GetaddrinfoFn> {
    let raw = GETADDRINFO_ORIG.load(Ordering::Acquire);
    if raw.is_null() {
        return None;
    }
    Some(unsafe { mem::transmute::<*mut c_void, GetaddrinfoFn>(raw) })
}

struct KindCounters {
    intercepted: AtomicUsize,
    blocked: AtomicUsize,
}

impl KindCounters {
    const fn new() -> Self {
        Self {
            intercepted: AtomicUsize::new(0),
            blocked: AtomicUsize::new(0),
        }
    }
}

static COUNTERS: [KindCounters; 3] = [
    KindCounters::new(),
    KindCounters::new(),
    KindCounters::new(),
];

fn count_intercepted(kind: RequestKind) {
    COUNTERS[kind.index()].intercepted.fetch_add(1, Ordering::Relaxed);
}

fn count_blocked(kind: RequestKind) {
    COUNTERS[kind.index()].blocked.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time interception counters for one request kind
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KindSnapshot {
    pub intercepted: usize,
    pub blocked: usize,
}

/// Point-in-time interception counters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub dns_by_name: KindSnapshot,
    pub dns_by_addrinfo: KindSnapshot,
    pub raw_connect: KindSnapshot,
}

/// Current interception counters.
pub fn stats() -> StatsSnapshot {
    let snap = |kind: RequestKind| KindSnapshot {
        intercepted: COUNTERS[kind.index()].intercepted.load(Ordering::Relaxed),
        blocked: COUNTERS[kind.index()].blocked.load(Ordering::Relaxed),
    };
    StatsSnapshot {
        dns_by_name: snap(RequestKind::DnsByName),
        dns_by_addrinfo: snap(RequestKind::DnsByAddrinfo),
        raw_connect: snap(RequestKind::RawConnect),
    }
}

/// Replacement for `connect`.
///
/// Observation point, not an enforcement point: the peer address is
/// decoded for the record, then the call always forwards. Blocking
/// here would need an address-to-policy-identity mapping that belongs
/// to the decision module's domain.
pub unsafe extern "C" fn connect_hook(
    sockfd: c_int,
    addr: *const sockaddr,
    len: socklen_t,
) -> c_int {
    let Some(original) = connect_trampoline() else {
        // Unreachable under the host contract (trampoline is written
        // before the redirect goes live); fail the call rather than
        // jump through null.
        log::error!("connect hook fired without a trampoline");
        return -1;
    };
    if !addr.is_null() {
        count_intercepted(RequestKind::RawConnect);
        if oracle_ready() {
            if let Some(peer) = describe_peer(addr, len) {
                // debug only: the logger itself may connect() once
                log::debug!("connect({sockfd}) to {peer} observed");
            }
        }
    }
    unsafe { original(sockfd, addr, len) }
}

/// Replacement for `gethostbyname`.
///
/// Blocked names get a "host not found" result; the trampoline is not
/// touched on the blocked path.
pub unsafe extern "C" fn gethostbyname_hook(name: *const c_char) -> *mut hostent {
    let Some(original) = gethostbyname_trampoline() else {
        log::error!("gethostbyname hook fired without a trampoline");
        return ptr::null_mut();
    };
    if !name.is_null() {
        count_intercepted(RequestKind::DnsByName);
        let hostname = unsafe { CStr::from_ptr(name) }.to_string_lossy();
        let descriptor = RequestDescriptor::new(
            hostname.into_owned(),
            RequestKind::DnsByName,
            ORIGIN_GETHOSTBYNAME,
        );
        if blocked_by(oracle(), &descriptor) {
            count_blocked(RequestKind::DnsByName);
            log::info!("blocked name resolution for {}", descriptor.target);
            audit::emit(
                AuditSeverity::Info,
                AuditEvent::RequestBlocked {
                    target: descriptor.target,
                    kind: descriptor.kind,
                    origin: descriptor.origin,
                },
            );
            return ptr::null_mut();
        }
    }
    unsafe { original(name) }
}

/// Replacement for `getaddrinfo`.
///
/// Blocked nodes get `EAI_NONAME`; allowed calls forward with node,
/// service and hints untouched.
pub unsafe extern "C" fn getaddrinfo_hook(
    node: *const c_char,
    service: *const c_char,
    hints: *const addrinfo,
    res: *mut *mut addrinfo,
) -> c_int {
    let Some(original) = getaddrinfo_trampoline() else {
        log::error!("getaddrinfo hook fired without a trampoline");
        return libc::EAI_AGAIN;
    };
    if !node.is_null() {
        count_intercepted(RequestKind::DnsByAddrinfo);
        let target = unsafe { CStr::from_ptr(node) }.to_string_lossy();
        let descriptor = RequestDescriptor::new(
            target.into_owned(),
            RequestKind::DnsByAddrinfo,
            ORIGIN_GETADDRINFO,
        );
        if blocked_by(oracle(), &descriptor) {
            count_blocked(RequestKind::DnsByAddrinfo);
            log::info!("blocked address resolution for {}", descriptor.target);
            audit::emit(
                AuditSeverity::Info,
                AuditEvent::RequestBlocked {
                    target: descriptor.target,
                    kind: descriptor.kind,
                    origin: descriptor.origin,
                },
            );
            return libc::EAI_NONAME;
        }
    }
    unsafe { original(node, service, hints, res) }
}

/// Render a peer socket address as text, for the observation log.
fn describe_peer(addr: *const sockaddr, len: socklen_t) -> Option<String> {
    if addr.is_null() {
        return None;
    }
    unsafe {
        match i32::from((*addr).sa_family) {
            libc::AF_INET if len as usize >= mem::size_of::<libc::sockaddr_in>() => {
                let sin = &*(addr as *const libc::sockaddr_in);
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                Some(format!("{}:{}", ip, u16::from_be(sin.sin_port)))
            }
            libc::AF_INET6 if len as usize >= mem::size_of::<libc::sockaddr_in6>() => {
                let sin6 = &*(addr as *const libc::sockaddr_in6);
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                Some(format!("[{}]:{}", ip, u16::from_be(sin6.sin6_port)))
            }
            family => Some(format!("af={family}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_oracle_means_no_blocking() {
        let descriptor =
            RequestDescriptor::new("ads.example", RequestKind::DnsByName, ORIGIN_GETHOSTBYNAME);
        assert!(!blocked_by(None, &descriptor));
    }

    #[test]
    fn describe_peer_renders_ipv4() {
        let sin = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 443u16.to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from(std::net::Ipv4Addr::new(93, 184, 216, 34)).to_be(),
            },
            sin_zero: [0; 8],
        };
        let text = describe_peer(
            &sin as *const libc::sockaddr_in as *const sockaddr,
            mem::size_of::<libc::sockaddr_in>() as socklen_t,
        );
        assert_eq!(text.as_deref(), Some("93.184.216.34:443"));
    }

    #[test]
    fn describe_peer_falls_back_on_unknown_family() {
        let sa = libc::sockaddr {
            sa_family: libc::AF_UNIX as libc::sa_family_t,
            sa_data: [0; 14],
        };
        let text = describe_peer(&sa as *const sockaddr, mem::size_of::<libc::sockaddr>() as socklen_t);
        assert_eq!(text.as_deref(), Some("af=1"));
    }

    #[test]
    fn hook_specs_cover_the_three_entry_points() {
        let specs = hook_specs();
        let symbols: Vec<_> = specs.iter().map(|s| s.symbol).collect();
        assert_eq!(symbols, vec!["connect", "gethostbyname", "getaddrinfo"]);
        assert!(specs.iter().all(|s| !s.replacement().is_null()));
    }
}
