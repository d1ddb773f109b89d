//! netshim: in-process network interception and policy enforcement
//!
//! netshim is a loadable module (cdylib) that a ZygiskNext-style host
//! runtime injects into application processes at attach time. Once
//! active it intercepts outbound name resolution and socket connects,
//! asks a separately loaded decision module whether each target should
//! be blocked, and forges the matching failure result for blocked
//! targets instead of performing the network operation.
//!
//! # Architecture
//!
//! Organized by responsibility, leaves first:
//!
//! - [`host`]: FFI boundary to the host runtime: the capability
//!   table, the scoped symbol resolver, and the inline-hook installer.
//!   All raw address manipulation lives here.
//! - [`loader`]: locates and loads the decision module, preferring a
//!   memory-backed load that sidesteps path-based access policy, with
//!   a direct load as ordered fallback.
//! - [`oracle`]: binds the decision module's three C entry points and
//!   exposes the block/allow query.
//! - [`intercept`]: the three interception handlers and the
//!   process-scoped, write-once context they read.
//! - [`lifecycle`]: drives attach-time activation through its stages
//!   and owns the loaded module for the process lifetime.
//! - [`observability`]: structured audit events and the kernel
//!   diagnostic sink.
//! - [`config`]: error taxonomy, shared types, and runtime settings.
//!
//! # Design principles
//!
//! 1. **Fail open**: any failure in this module degrades to normal,
//!    unfiltered networking; the host process never breaks because
//!    filtering is unavailable.
//! 2. **Write once, read many**: all shared state is published
//!    exactly once during single-threaded activation and is read-only
//!    afterwards; steady state takes no locks.
//! 3. **Minimal unsafe**: thin wrappers with explicit preconditions;
//!    handler code never touches raw addresses directly.

pub mod config;
pub mod host;
pub mod intercept;
pub mod lifecycle;
pub mod loader;
pub mod observability;
pub mod oracle;

// Re-export commonly used types for convenience
pub use config::settings::Settings;
pub use config::types::{
    LifecycleStage, LifecycleState, RequestDescriptor, RequestKind, Result, ShimError,
};
pub use oracle::DecisionOracle;
