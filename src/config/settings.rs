/// Runtime settings for the interception runtime
///
/// netshim carries no configuration file of its own: the decision
/// module owns its config format, and this module only needs to know
/// where to find things. Defaults are fixed install locations;
/// environment variables override them for development and tests.
use std::env;
use std::path::PathBuf;

/// Ordered candidate locations for the decision module.
/// First existing and loadable candidate wins.
pub const DEFAULT_MODULE_CANDIDATES: [&str; 2] = [
    "/data/adb/modules/netshim/lib/libnetshim_rules.so",
    "/data/adb/netshim/libnetshim_rules.so",
];

/// Configuration file handed verbatim to the decision module.
pub const DEFAULT_ORACLE_CONFIG: &str = "/data/adb/netshim/rules.toml";

/// Library whose entry points get hooked.
pub const DEFAULT_TARGET_LIBRARY: &str = "libc.so";

/// Default location for the JSON-line audit trail.
pub const DEFAULT_AUDIT_LOG: &str = "/data/adb/netshim/audit.jsonl";

/// Environment override: extra decision-module candidate, tried first.
pub const ENV_RULES_PATH: &str = "NETSHIM_RULES_PATH";
/// Environment override: decision-module config path.
pub const ENV_CONFIG: &str = "NETSHIM_CONFIG";
/// Environment override: audit log path; empty value disables the file sink.
pub const ENV_AUDIT_LOG: &str = "NETSHIM_AUDIT_LOG";

/// Resolved settings for one process attach
#[derive(Debug, Clone)]
pub struct Settings {
    /// Ordered decision-module candidate paths
    pub module_candidates: Vec<PathBuf>,
    /// Path passed verbatim to the decision module's initialize entry
    pub oracle_config_path: PathBuf,
    /// Library the network hooks target
    pub target_library: String,
    /// Audit file location; `None` keeps audit events log-only
    pub audit_log_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            module_candidates: DEFAULT_MODULE_CANDIDATES.iter().map(PathBuf::from).collect(),
            oracle_config_path: PathBuf::from(DEFAULT_ORACLE_CONFIG),
            target_library: DEFAULT_TARGET_LIBRARY.to_string(),
            audit_log_path: Some(PathBuf::from(DEFAULT_AUDIT_LOG)),
        }
    }
}

impl Settings {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(path) = env::var(ENV_RULES_PATH) {
            if !path.is_empty() {
                settings.module_candidates.insert(0, PathBuf::from(path));
            }
        }
        if let Ok(path) = env::var(ENV_CONFIG) {
            if !path.is_empty() {
                settings.oracle_config_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = env::var(ENV_AUDIT_LOG) {
            settings.audit_log_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        settings
    }
}
