//! Boot-time recovery of runs from the active lifetime collection.

use uuid::Uuid;

use flowgate_types::error::StoreError;

use crate::repository::lifetime::LifetimeRepository;

use super::engine::EngineError;
use super::registry::RunLauncher;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("failed to list active lifetime records: {0}")]
    Store(#[from] StoreError),

    #[error("malformed lifetime record {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to rebuild run {uid}: {source}")]
    Rebuild {
        uid: Uuid,
        #[source]
        source: EngineError,
    },
}

/// What happened to each active record.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Runs spawned again from their checkpoint.
    pub resumed: Vec<Uuid>,
    /// Records already marked completed, moved to the completed set.
    pub archived: Vec<Uuid>,
    /// Records that could not be recovered. The rest are unaffected.
    pub skipped: Vec<RecoveryError>,
}

/// Resume every in-flight run found in `repo`.
pub async fn recover_runs<R: LifetimeRepository>(
    repo: &R,
    launcher: &RunLauncher,
) -> Result<RecoveryReport, RecoveryError> {
    let mut report = RecoveryReport::default();

    for entry in repo.list_active().await? {
        let record = match entry.record {
            Ok(record) => record,
            Err(source) => {
                tracing::error!(key = %entry.key, error = %source, "skipping malformed lifetime record");
                report.skipped.push(RecoveryError::Malformed {
                    key: entry.key,
                    source,
                });
                continue;
            }
        };

        let uid = record.uid;
        if record.is_completed() {
            tracing::info!(run_id = %uid, "recovered record already completed, archiving");
            launcher.deps().lifetime.mark_complete(uid);
            report.archived.push(uid);
            continue;
        }

        match launcher.resume(record) {
            Ok(run_id) => report.resumed.push(run_id),
            Err(source) => {
                tracing::error!(run_id = %uid, error = %source, "failed to recover run");
                report.skipped.push(RecoveryError::Rebuild { uid, source });
            }
        }
    }

    tracing::info!(
        resumed = report.resumed.len(),
        archived = report.archived.len(),
        skipped = report.skipped.len(),
        "recovery finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::Map;

    use flowgate_types::approval::ApprovalResult;
    use flowgate_types::lifetime::{CheckpointReason, LifetimeRecord};
    use flowgate_types::workflow::WorkflowDocument;

    use crate::repository::memory::InMemoryLifetimeRepository;
    use crate::workflow::approval::ApprovalCoordinator;
    use crate::workflow::capability::CapabilityRegistry;
    use crate::workflow::engine::{EngineDeps, EngineSettings};
    use crate::workflow::lifetime::{LifetimeStore, WriterSettings};
    use crate::workflow::registry::RunRegistry;

    fn record(current_step: &str, reason: CheckpointReason) -> LifetimeRecord {
        let doc: WorkflowDocument = serde_yaml_ng::from_str(
            "workflow:\n  name: r\n  steps:\n    - { id: hold, type: approval }\n    - { id: gone, type: approval }\n",
        )
        .unwrap();
        LifetimeRecord {
            uid: uuid::Uuid::now_v7(),
            workflow: doc.workflow,
            current_step: Some(current_step.to_string()),
            context: Map::new(),
            started_at: Utc::now(),
            last_updated: Utc::now(),
            reason,
            access_key: None,
            failure: None,
        }
    }

    #[tokio::test]
    async fn completed_records_are_archived_others_resumed() {
        let repo = Arc::new(InMemoryLifetimeRepository::default());
        let (lifetime, _writer) = LifetimeStore::spawn(
            Arc::clone(&repo),
            WriterSettings {
                settle_delay: Duration::from_millis(1),
                archive_retry: Duration::from_secs(1),
            },
        );
        let (approvals, _requests) = ApprovalCoordinator::channel();
        let approvals = Arc::new(approvals);
        let launcher = RunLauncher::new(
            EngineDeps {
                lifetime: lifetime.clone(),
                approvals: Arc::clone(&approvals),
                capabilities: Arc::new(CapabilityRegistry::default()),
                settings: Arc::new(EngineSettings::default()),
            },
            Arc::new(RunRegistry::new()),
        );

        let done = record("gone", CheckpointReason::Completed);
        let pending = record("hold", CheckpointReason::PreDeliveryContextSnapshot);
        let mut broken = record("hold", CheckpointReason::StepStart);
        broken.current_step = Some("missing".into());
        let (done_id, pending_id, broken_id) = (done.uid, pending.uid, broken.uid);
        for r in [done, pending, broken] {
            repo.insert_active(r);
        }
        repo.malformed.lock().unwrap().push("garbage.yaml".into());

        let report = recover_runs(repo.as_ref(), &launcher).await.unwrap();
        assert_eq!(report.archived, vec![done_id]);
        assert_eq!(report.resumed, vec![pending_id]);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped.iter().any(
            |e| matches!(e, RecoveryError::Rebuild { uid, .. } if *uid == broken_id)
        ));

        // The completed record was never executed.
        lifetime.flush().await;
        assert!(repo.completed(done_id).is_some());
        assert!(repo.reasons(done_id).is_empty());

        // The resumed run waits on its rehydrated ticket.
        assert!(approvals.is_pending(pending_id, "hold"));
        assert!(launcher.registry().is_live(pending_id));
        assert!(approvals.resolve(pending_id, "hold", ApprovalResult::Approved));
    }
}
