use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_INEXACT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_RESCAN_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_FIRED_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_DISPLAY_DURATION_SECS: u32 = 30;
pub const DEFAULT_LAUNCH_QUEUE_CAPACITY: usize = 64;

/// Top-level config (fakecall.toml + FAKECALL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FakecallConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub presentation: PresentationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// What a recovery pass does with active calls whose time passed while
/// nothing was running to fire them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MissedPolicy {
    /// Deactivate the call and log it as missed.
    #[default]
    Discard,
    /// Ring right away.
    FireImmediately,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ask for exact timers when the host allows it.
    /// Override with env var: FAKECALL_SCHEDULER__EXACT_ALARMS=false
    #[serde(default = "bool_true")]
    pub exact_alarms: bool,
    /// Inexact timers are batched to the next multiple of this window.
    #[serde(default = "default_inexact_window_secs")]
    pub inexact_window_secs: u64,
    #[serde(default)]
    pub missed_policy: MissedPolicy,
    /// How often the daemon picks up calls saved by other processes.
    #[serde(default = "default_rescan_interval_secs")]
    pub rescan_interval_secs: u64,
    #[serde(default = "default_fired_queue_capacity")]
    pub fired_queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            exact_alarms: true,
            inexact_window_secs: DEFAULT_INEXACT_WINDOW_SECS,
            missed_policy: MissedPolicy::default(),
            rescan_interval_secs: DEFAULT_RESCAN_INTERVAL_SECS,
            fired_queue_capacity: DEFAULT_FIRED_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationConfig {
    /// Used by `fakecall add` when `--duration` is omitted.
    #[serde(default = "default_display_duration_secs")]
    pub default_display_duration_secs: u32,
    #[serde(default = "default_launch_queue_capacity")]
    pub launch_queue_capacity: usize,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            default_display_duration_secs: DEFAULT_DISPLAY_DURATION_SECS,
            launch_queue_capacity: DEFAULT_LAUNCH_QUEUE_CAPACITY,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_inexact_window_secs() -> u64 {
    DEFAULT_INEXACT_WINDOW_SECS
}
fn default_rescan_interval_secs() -> u64 {
    DEFAULT_RESCAN_INTERVAL_SECS
}
fn default_fired_queue_capacity() -> usize {
    DEFAULT_FIRED_QUEUE_CAPACITY
}
fn default_display_duration_secs() -> u32 {
    DEFAULT_DISPLAY_DURATION_SECS
}
fn default_launch_queue_capacity() -> usize {
    DEFAULT_LAUNCH_QUEUE_CAPACITY
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.fakecall/fakecall.db", home)
}

impl FakecallConfig {
    /// Load config from a TOML file with FAKECALL_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `FAKECALL_SCHEDULER__MISSED_POLICY=fire-immediately`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::extract(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("FAKECALL_").split("__")),
        )
    }

    fn extract(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.fakecall/fakecall.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = FakecallConfig::extract(Figment::from(Toml::string(""))).unwrap();
        assert!(cfg.scheduler.exact_alarms);
        assert_eq!(cfg.scheduler.missed_policy, MissedPolicy::Discard);
        assert_eq!(cfg.scheduler.inexact_window_secs, DEFAULT_INEXACT_WINDOW_SECS);
        assert_eq!(
            cfg.presentation.default_display_duration_secs,
            DEFAULT_DISPLAY_DURATION_SECS
        );
        assert!(cfg.database.path.ends_with("fakecall.db"));
    }

    #[test]
    fn toml_overrides_scheduler_section() {
        let doc = r#"
            [database]
            path = "/tmp/calls.db"

            [scheduler]
            exact_alarms = false
            missed_policy = "fire-immediately"
            rescan_interval_secs = 2
        "#;
        let cfg = FakecallConfig::extract(Figment::from(Toml::string(doc))).unwrap();
        assert_eq!(cfg.database.path, "/tmp/calls.db");
        assert!(!cfg.scheduler.exact_alarms);
        assert_eq!(cfg.scheduler.missed_policy, MissedPolicy::FireImmediately);
        assert_eq!(cfg.scheduler.rescan_interval_secs, 2);
        assert_eq!(
            cfg.scheduler.fired_queue_capacity,
            DEFAULT_FIRED_QUEUE_CAPACITY
        );
    }

    #[test]
    fn unknown_missed_policy_is_config_error() {
        let doc = "[scheduler]\nmissed_policy = \"retry-forever\"\n";
        let err = FakecallConfig::extract(Figment::from(Toml::string(doc))).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
