//! Configuration types for Flowgate.
//!
//! `FlowgateConfig` represents the top-level `config.toml` in the Flowgate
//! home directory. Every field has a default so an empty file is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowgateConfig {
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub directories: DirectoriesConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-module defaults merged under each action step's input.
    #[serde(default)]
    pub module_defaults: BTreeMap<String, Value>,
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Public base URL used to build approval and webform links.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory names skipped while discovering workflows.
    #[serde(default)]
    pub ignored_workflow_dirs: Vec<String>,
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            host: default_host(),
            port: default_port(),
            ignored_workflow_dirs: Vec::new(),
        }
    }
}

/// On-disk locations. Relative paths resolve against the Flowgate home.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoriesConfig {
    #[serde(default = "default_workflows_dir")]
    pub workflows: PathBuf,

    #[serde(default = "default_modules_dir")]
    pub modules: PathBuf,

    #[serde(default = "default_lifetimes_dir")]
    pub lifetimes: PathBuf,
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from("workflows")
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}

fn default_lifetimes_dir() -> PathBuf {
    PathBuf::from("lifetimes")
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            workflows: default_workflows_dir(),
            modules: default_modules_dir(),
            lifetimes: default_lifetimes_dir(),
        }
    }
}

impl DirectoriesConfig {
    /// Resolve every directory against `home`, leaving absolute paths alone.
    pub fn resolve(&self, home: &Path) -> Self {
        let join = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                home.join(p)
            }
        };
        Self {
            workflows: join(&self.workflows),
            modules: join(&self.modules),
            lifetimes: join(&self.lifetimes),
        }
    }
}

/// Run-loop and persistence tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded wait for referenced context keys before an action step.
    #[serde(default = "default_context_wait_secs")]
    pub context_wait_secs: u64,

    /// Hard ceiling on approval waits.
    #[serde(default = "default_approval_ceiling_hours")]
    pub approval_ceiling_hours: u64,

    /// Idle interval while a run is paused.
    #[serde(default = "default_pause_poll_millis")]
    pub pause_poll_millis: u64,

    /// Cron tick interval.
    #[serde(default = "default_cron_tick_secs")]
    pub cron_tick_secs: u64,

    /// Delay before moving a finished record to the completed set.
    #[serde(default = "default_settle_delay_millis")]
    pub settle_delay_millis: u64,

    /// How long archiving is retried on I/O failure.
    #[serde(default = "default_archive_retry_secs")]
    pub archive_retry_secs: u64,
}

fn default_context_wait_secs() -> u64 {
    5
}

fn default_approval_ceiling_hours() -> u64 {
    24
}

fn default_pause_poll_millis() -> u64 {
    1000
}

fn default_cron_tick_secs() -> u64 {
    5
}

fn default_settle_delay_millis() -> u64 {
    100
}

fn default_archive_retry_secs() -> u64 {
    2
}

impl EngineConfig {
    /// `approval_ceiling_hours` as a duration, saturating on huge values.
    pub fn approval_ceiling(&self) -> Duration {
        Duration::from_secs(self.approval_ceiling_hours.saturating_mul(3600))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_wait_secs: default_context_wait_secs(),
            approval_ceiling_hours: default_approval_ceiling_hours(),
            pause_poll_millis: default_pause_poll_millis(),
            cron_tick_secs: default_cron_tick_secs(),
            settle_delay_millis: default_settle_delay_millis(),
            archive_retry_secs: default_archive_retry_secs(),
        }
    }
}
