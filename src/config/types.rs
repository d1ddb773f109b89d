/// Shared type definitions and error taxonomy for netshim
///
/// Everything here is constructed during the single-threaded activation
/// sequence and treated as immutable afterwards. Enums are closed: the
/// set of request kinds and lifecycle stages is fixed by the hook set.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind tag attached to every intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Hostname lookup through `gethostbyname`
    DnsByName,
    /// Hostname lookup through `getaddrinfo`
    DnsByAddrinfo,
    /// Raw socket connect
    RawConnect,
}

impl RequestKind {
    /// Stable tag passed across the decision-module FFI boundary.
    ///
    /// Both resolution paths share the `dns` tag; the origin field of
    /// the descriptor distinguishes them.
    pub fn as_tag(self) -> &'static str {
        match self {
            RequestKind::DnsByName | RequestKind::DnsByAddrinfo => "dns",
            RequestKind::RawConnect => "connect",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            RequestKind::DnsByName => 0,
            RequestKind::DnsByAddrinfo => 1,
            RequestKind::RawConnect => 2,
        }
    }
}

/// Identifying context for one intercepted call.
///
/// Built fresh on every interception, queried, then dropped; never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDescriptor {
    /// Target identifier (hostname or peer address text)
    pub target: String,
    /// Which operation was intercepted
    pub kind: RequestKind,
    /// Name of the hooked entry point that produced this descriptor
    pub origin: &'static str,
}

impl RequestDescriptor {
    pub fn new(target: impl Into<String>, kind: RequestKind, origin: &'static str) -> Self {
        Self {
            target: target.into(),
            kind,
            origin,
        }
    }
}

/// Activation stages, in the order the lifecycle controller runs them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Unloaded,
    ModuleLoaded,
    OracleInitialized,
    HooksInstalled,
    Active,
}

/// Observable lifecycle state.
///
/// `Failed` is terminal and carries the stage that could not be
/// completed; the process then runs with whatever capability was
/// achieved before the failure (fail-open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unloaded,
    ModuleLoaded,
    OracleInitialized,
    HooksInstalled,
    Active,
    Failed(LifecycleStage),
}

/// Custom error types for netshim
#[derive(Error, Debug)]
pub enum ShimError {
    #[error("decision module not found in any candidate location")]
    ModuleNotFound,

    #[error("decision module is missing required symbol: {0}")]
    SymbolMissing(String),

    #[error("decision module initialization returned status {0}")]
    OracleInitFailed(i32),

    #[error("decision oracle already bound for this process")]
    OracleAlreadyBound,

    #[error("symbol resolver unavailable for {0}")]
    ResolverUnavailable(String),

    #[error("failed to hook {symbol}: {reason}")]
    HookFailed { symbol: String, reason: String },

    #[error("short copy into anonymous backing file: copied {copied} of {expected} bytes")]
    CopyIncomplete { expected: u64, copied: u64 },

    #[error("dynamic loader error: {0}")]
    DynamicLoader(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for netshim operations
pub type Result<T> = std::result::Result<T, ShimError>;

impl From<nix::errno::Errno> for ShimError {
    fn from(err: nix::errno::Errno) -> Self {
        ShimError::Io(std::io::Error::from_raw_os_error(err as i32))
    }
}
