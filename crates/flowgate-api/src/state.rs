//! Application state shared by every HTTP handler.
//!
//! AppState pins the engine services to the concrete infra adapters: the
//! YAML lifetime repository for the status read path, the run launcher for
//! trigger and control routes, and the approval transport for link clicks
//! and form submissions.

use std::path::PathBuf;
use std::sync::Arc;

use flowgate_core::workflow::registry::RunLauncher;
use flowgate_core::workflow::scheduler::CronTable;
use flowgate_infra::filesystem::YamlLifetimeRepository;
use flowgate_types::config::FlowgateConfig;

use crate::transport::ApprovalTransport;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FlowgateConfig>,
    /// Resolved workflows directory; `{repo}/{name}.yaml` lives below it.
    pub workflows_dir: PathBuf,
    pub launcher: RunLauncher,
    pub transport: Arc<ApprovalTransport>,
    pub lifetimes: Arc<YamlLifetimeRepository>,
    pub cron: Arc<CronTable>,
}
