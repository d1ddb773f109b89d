//! Lifecycle controller
//!
//! Drives activation through its stages in strict order, exactly once
//! per process attach:
//!
//! ```text
//! Unloaded -> ModuleLoaded -> OracleInitialized -> HooksInstalled -> Active
//! ```
//!
//! A failure at any stage parks the process in `Failed(stage)` and
//! forward progress stops; there is no retry loop. Module-load and oracle-init
//! failures are fatal to activation; hook installation is best-effort
//! per symbol, so a process can go `Active` with a partial hook set
//! and the handlers for missing symbols simply never fire. Either way
//! the worst case is "this process gets less or no filtering", never a
//! broken process.

use libc::c_int;
use std::sync::{Mutex, OnceLock};

use crate::config::settings::Settings;
use crate::config::types::{LifecycleStage, LifecycleState, Result, ShimError};
use crate::host::api::HostApi;
use crate::host::hooks::{HookEngine, HookRecord};
use crate::host::resolver::SymbolScan;
use crate::intercept;
use crate::loader::{self, ModuleHandle};
use crate::observability::audit::{self, AuditEvent, AuditSeverity};
use crate::observability::diag;
use crate::oracle::DecisionOracle;

static ATTACHED: OnceLock<()> = OnceLock::new();
static STATE: Mutex<LifecycleState> = Mutex::new(LifecycleState::Unloaded);

// Written once during activation, held until process exit. The module
// must outlive every oracle function pointer resolved from it, and the
// hook records pin the trampolines the handlers forward through.
static MODULE: OnceLock<ModuleHandle> = OnceLock::new();
static HOOKS: OnceLock<Vec<HookRecord>> = OnceLock::new();

/// Current lifecycle state, for diagnostics and tests.
pub fn current_state() -> LifecycleState {
    STATE.lock().map(|guard| *guard).unwrap_or(LifecycleState::Unloaded)
}

fn set_state(state: LifecycleState) {
    if let Ok(mut guard) = STATE.lock() {
        *guard = state;
    }
}

fn reach(stage: LifecycleStage, state: LifecycleState) {
    set_state(state);
    audit::emit(AuditSeverity::Info, AuditEvent::StageReached { stage });
}

fn fail(stage: LifecycleStage, error: &ShimError) {
    set_state(LifecycleState::Failed(stage));
    audit::emit(
        AuditSeverity::Error,
        AuditEvent::ActivationFailed {
            stage,
            error: error.to_string(),
        },
    );
}

/// Full activation for one process attach: load the decision module,
/// bind and initialize the oracle, install the network hooks.
///
/// Runs at most once; a second call is a warned no-op.
pub fn attach(api: HostApi, settings: Settings) -> Result<()> {
    if ATTACHED.set(()).is_err() {
        log::warn!("attach requested twice; lifecycle runs once per process");
        return Ok(());
    }
    begin(&settings);

    let module = match loader::load_decision_module(&settings.module_candidates) {
        Ok(module) => module,
        Err(e) => {
            log::warn!("no decision module; process stays unfiltered: {e}");
            fail(LifecycleStage::ModuleLoaded, &e);
            return Err(e);
        }
    };
    audit::emit(
        AuditSeverity::Info,
        AuditEvent::DecisionModuleLoaded {
            path: module.origin().display().to_string(),
            memory_backed: module.memory_backed(),
        },
    );
    reach(LifecycleStage::ModuleLoaded, LifecycleState::ModuleLoaded);

    let oracle = match DecisionOracle::bind(&module) {
        Ok(oracle) => oracle,
        Err(e) => {
            log::error!("decision module is unusable: {e}");
            fail(LifecycleStage::OracleInitialized, &e);
            return Err(e);
        }
    };
    if MODULE.set(module).is_err() {
        log::error!("decision module already parked; refusing to continue");
        let e = ShimError::OracleAlreadyBound;
        fail(LifecycleStage::OracleInitialized, &e);
        return Err(e);
    }

    finish_activation(api, &settings, oracle)
}

/// Activation for hosts that link their decision logic statically:
/// same stage order, minus the module-loading stage.
pub fn attach_with_oracle(api: HostApi, settings: Settings, oracle: DecisionOracle) -> Result<()> {
    if ATTACHED.set(()).is_err() {
        log::warn!("attach requested twice; lifecycle runs once per process");
        return Ok(());
    }
    begin(&settings);
    finish_activation(api, &settings, oracle)
}

fn begin(settings: &Settings) {
    audit::init(settings.audit_log_path.as_deref());
    audit::emit(
        AuditSeverity::Info,
        AuditEvent::ActivationStarted {
            candidates: settings
                .module_candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            target_library: settings.target_library.clone(),
        },
    );
}

fn finish_activation(api: HostApi, settings: &Settings, oracle: DecisionOracle) -> Result<()> {
    if let Err(e) = oracle.initialize(&settings.oracle_config_path) {
        log::error!("oracle refused initialization; no hooks will be installed: {e}");
        fail(LifecycleStage::OracleInitialized, &e);
        return Err(e);
    }
    if let Err(e) = intercept::bind_oracle(oracle) {
        fail(LifecycleStage::OracleInitialized, &e);
        return Err(e);
    }
    reach(
        LifecycleStage::OracleInitialized,
        LifecycleState::OracleInitialized,
    );

    let records = install_network_hooks(&api, settings);
    let live = records.len();
    let total = intercept::hook_specs().len();
    let _ = HOOKS.set(records);
    reach(LifecycleStage::HooksInstalled, LifecycleState::HooksInstalled);

    reach(LifecycleStage::Active, LifecycleState::Active);
    audit::emit(
        AuditSeverity::Info,
        AuditEvent::ActivationComplete { hooks_live: live },
    );
    diag::announce_activation(live, total);
    log::info!("netshim active: {live}/{total} network hooks live");
    Ok(())
}

/// Install the three network hooks, best-effort and independently:
/// one symbol failing to resolve or hook never stops the others.
///
/// Returns the records for the hooks that actually went live. The
/// resolver scan is released when this returns, success or not.
pub fn install_network_hooks(api: &HostApi, settings: &Settings) -> Vec<HookRecord> {
    let scan = match SymbolScan::open(api, &settings.target_library) {
        Ok(scan) => scan,
        Err(e) => {
            log::error!("cannot scan {} for symbols: {e}", settings.target_library);
            for spec in intercept::hook_specs() {
                audit::emit(
                    AuditSeverity::Warning,
                    AuditEvent::HookSkipped {
                        symbol: spec.symbol,
                        reason: e.to_string(),
                    },
                );
            }
            return Vec::new();
        }
    };

    let engine = HookEngine::new(api);
    let mut records = Vec::new();
    for spec in intercept::hook_specs() {
        let Some(symbol) = scan.lookup(spec.symbol) else {
            log::warn!(
                "symbol {} not found in {}; its handler stays dormant",
                spec.symbol,
                scan.library()
            );
            audit::emit(
                AuditSeverity::Warning,
                AuditEvent::HookSkipped {
                    symbol: spec.symbol,
                    reason: "symbol not found".to_string(),
                },
            );
            continue;
        };
        match engine.install(spec.symbol, symbol.addr, spec.replacement()) {
            Ok(record) => {
                spec.record_trampoline(record.trampoline());
                audit::emit(
                    AuditSeverity::Info,
                    AuditEvent::HookInstalled { symbol: spec.symbol },
                );
                records.push(record);
            }
            Err(e) => {
                log::warn!("hook install for {} failed: {e}", spec.symbol);
                audit::emit(
                    AuditSeverity::Warning,
                    AuditEvent::HookSkipped {
                        symbol: spec.symbol,
                        reason: e.to_string(),
                    },
                );
            }
        }
    }
    records
}

/// Companion-process connection handler.
///
/// There is no companion protocol yet: acknowledge the connection for
/// the audit trail and release the descriptor.
pub fn on_companion_connection(fd: c_int) {
    log::info!("companion connected on fd {fd}");
    audit::emit(AuditSeverity::Info, AuditEvent::CompanionConnected);
    if let Err(e) = nix::unistd::close(fd) {
        log::debug!("companion fd close: {e}");
    }
}
