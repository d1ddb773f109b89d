//! Full activation against an in-process host table
//!
//! Drives the whole lifecycle with a working oracle, then exercises
//! the live handlers end to end: blocked targets get forged failures
//! without the trampoline ever firing, allowed targets forward
//! unchanged, and the connect hook observes but never denies.

mod common;

use common::{
    full_table, host_api, hostent_sentinel, working_oracle, CONNECT_FORWARDED,
    GETADDRINFO_FORWARDED, GETHOSTBYNAME_FORWARDED, INSTALL_CALLS, LAST_SERVICE,
};
use libc::{c_int, sockaddr, socklen_t};
use netshim::intercept::{connect_hook, getaddrinfo_hook, gethostbyname_hook, stats};
use netshim::lifecycle::{attach_with_oracle, current_state};
use netshim::LifecycleState;
use std::ffi::CString;
use std::mem;
use std::ptr;
use std::sync::atomic::Ordering;

fn resolve_name(name: &str) -> *mut libc::hostent {
    let c_name = CString::new(name).expect("hostname");
    unsafe { gethostbyname_hook(c_name.as_ptr()) }
}

fn resolve_addrinfo(node: Option<&str>, service: &str) -> (c_int, *mut libc::addrinfo) {
    let c_node = node.map(|n| CString::new(n).expect("node"));
    let c_service = CString::new(service).expect("service");
    let mut res: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe {
        getaddrinfo_hook(
            c_node.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
            c_service.as_ptr(),
            ptr::null(),
            &mut res,
        )
    };
    (rc, res)
}

#[test]
fn activation_and_enforcement_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();

    let table = full_table();
    let api = host_api(&table);

    attach_with_oracle(api, common::quiet_settings(), working_oracle()).expect("activation");
    assert_eq!(current_state(), LifecycleState::Active);
    assert!(netshim::intercept::oracle_ready());
    assert_eq!(INSTALL_CALLS.load(Ordering::SeqCst), 3);

    // Blocked name: "host not found", trampoline untouched.
    assert!(resolve_name("blocked.example").is_null());
    assert_eq!(GETHOSTBYNAME_FORWARDED.load(Ordering::SeqCst), 0);

    // Allowed name: whatever the original returns comes back unchanged.
    assert_eq!(resolve_name("allowed.example"), hostent_sentinel());
    assert_eq!(GETHOSTBYNAME_FORWARDED.load(Ordering::SeqCst), 1);

    // Null hostname is not a query; it forwards untouched.
    assert_eq!(
        unsafe { gethostbyname_hook(ptr::null()) },
        hostent_sentinel()
    );
    assert_eq!(GETHOSTBYNAME_FORWARDED.load(Ordering::SeqCst), 2);

    // Blocked node: exactly EAI_NONAME, nothing written, no forward.
    let (rc, res) = resolve_addrinfo(Some("blocked.example"), "443");
    assert_eq!(rc, libc::EAI_NONAME);
    assert!(res.is_null());
    assert_eq!(GETADDRINFO_FORWARDED.load(Ordering::SeqCst), 0);
    assert!(LAST_SERVICE.lock().unwrap().is_none());

    // Allowed node: forwards with the service string unchanged.
    let (rc, _) = resolve_addrinfo(Some("allowed.example"), "443");
    assert_eq!(rc, 0);
    assert_eq!(GETADDRINFO_FORWARDED.load(Ordering::SeqCst), 1);
    assert_eq!(LAST_SERVICE.lock().unwrap().as_deref(), Some("443"));

    // Service-only lookup: nothing to ask the oracle about.
    let (rc, _) = resolve_addrinfo(None, "80");
    assert_eq!(rc, 0);
    assert_eq!(GETADDRINFO_FORWARDED.load(Ordering::SeqCst), 2);
    assert_eq!(LAST_SERVICE.lock().unwrap().as_deref(), Some("80"));

    // connect is an observation point: always forwards, even to a peer
    // the oracle would block by name.
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 443u16.to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from(std::net::Ipv4Addr::new(10, 1, 2, 3)).to_be(),
        },
        sin_zero: [0; 8],
    };
    let rc = unsafe {
        connect_hook(
            7,
            &sin as *const libc::sockaddr_in as *const sockaddr,
            mem::size_of::<libc::sockaddr_in>() as socklen_t,
        )
    };
    assert_eq!(rc, 0);
    assert_eq!(CONNECT_FORWARDED.load(Ordering::SeqCst), 1);

    let snapshot = stats();
    assert_eq!(snapshot.dns_by_name.intercepted, 2);
    assert_eq!(snapshot.dns_by_name.blocked, 1);
    assert_eq!(snapshot.dns_by_addrinfo.intercepted, 2);
    assert_eq!(snapshot.dns_by_addrinfo.blocked, 1);
    assert_eq!(snapshot.raw_connect.intercepted, 1);
    assert_eq!(snapshot.raw_connect.blocked, 0);
}
