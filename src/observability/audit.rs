/// Structured audit trail for the interception runtime
///
/// One JSON line per security-relevant event: activation stages,
/// per-symbol hook outcomes, blocked requests. Events mirror to the
/// `log` facade at their severity and, when a sink file is
/// configured, append to it. The sink is a write-once global wired
/// during activation; losing it (unwritable path, locked rotation)
/// downgrades audit to log-only and is never an error.
use log::{error, info, warn};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::types::{LifecycleStage, RequestKind};

/// Audit event severity
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
}

/// The events this runtime records
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ActivationStarted {
        candidates: Vec<String>,
        target_library: String,
    },
    StageReached {
        stage: LifecycleStage,
    },
    ActivationFailed {
        stage: LifecycleStage,
        error: String,
    },
    DecisionModuleLoaded {
        path: String,
        memory_backed: bool,
    },
    HookInstalled {
        symbol: &'static str,
    },
    HookSkipped {
        symbol: &'static str,
        reason: String,
    },
    ActivationComplete {
        hooks_live: usize,
    },
    RequestBlocked {
        target: String,
        kind: RequestKind,
        origin: &'static str,
    },
    CompanionConnected,
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    timestamp_ms: u64,
    pid: u32,
    severity: AuditSeverity,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

static SINK: OnceLock<Option<Mutex<File>>> = OnceLock::new();

/// Wire the audit sink. `None` keeps events log-only. First call wins.
pub fn init(path: Option<&Path>) {
    SINK.get_or_init(|| {
        let path = path?;
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                warn!(
                    "audit file {} unavailable: {e}; events stay log-only",
                    path.display()
                );
                None
            }
        }
    });
}

/// Record one event.
pub fn emit(severity: AuditSeverity, event: AuditEvent) {
    let record = AuditRecord {
        timestamp_ms: now_millis(),
        pid: std::process::id(),
        severity,
        event: &event,
    };
    let line = match serde_json::to_string(&record) {
        Ok(line) => line,
        Err(e) => {
            error!("audit event serialization failed: {e}");
            return;
        }
    };

    match severity {
        AuditSeverity::Info => info!("audit: {line}"),
        AuditSeverity::Warning => warn!("audit: {line}"),
        AuditSeverity::Error => error!("audit: {line}"),
    }

    if let Some(Some(sink)) = SINK.get() {
        if let Ok(mut file) = sink.lock() {
            let _ = writeln!(file, "{line}");
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
