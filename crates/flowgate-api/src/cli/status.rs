//! `flowgate status <uid>`: read a run's status from the lifetime store.

use std::path::Path;

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use flowgate_core::repository::lifetime::{LifetimeRepository, RecordLocation};
use flowgate_infra::config::load_config;
use flowgate_infra::filesystem::YamlLifetimeRepository;
use flowgate_types::lifetime::{RunStatus, RunStatusView};

/// Print the status of run `uid`.
pub async fn status(home: &Path, uid: &str, json: bool) -> Result<()> {
    let run_id: Uuid = uid.parse().with_context(|| format!("'{uid}' is not a valid run id"))?;
    let config = load_config(home).await;
    let repo = YamlLifetimeRepository::new(config.directories.resolve(home).lifetimes);

    let Some(stored) = repo.get(run_id).await? else {
        bail!("run {run_id} not found");
    };
    let view = RunStatusView::from(&stored.record);

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let status = match view.status {
        RunStatus::InProgress => "in progress",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
    };
    let location = match stored.location {
        RecordLocation::Active => "active",
        RecordLocation::Completed => "completed",
    };

    println!();
    println!("  Run {}  ({})", view.uid, stored.record.workflow.name);
    println!("  Status:       {status}");
    println!("  Record:       {location}");
    if let Some(step) = &view.current_step {
        match view.current_step_type {
            Some(kind) => println!("  Current step: {step} ({kind:?})"),
            None => println!("  Current step: {step}"),
        }
    }
    if let Some(failure) = &view.failure {
        println!(
            "  Failed at:    {} ({})",
            failure.step_id.as_deref().unwrap_or("-"),
            failure.reason.as_deref().unwrap_or("no reason recorded")
        );
    }
    if let Some(results) = view.step_results.as_object().filter(|r| !r.is_empty()) {
        println!("  Steps run:    {}", results.keys().cloned().collect::<Vec<_>>().join(", "));
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use flowgate_core::workflow::definition::parse_workflow_yaml;
    use flowgate_types::lifetime::{CheckpointReason, LifetimeRecord};

    #[tokio::test]
    async fn reads_active_records() {
        let home = TempDir::new().unwrap();
        let repo = YamlLifetimeRepository::new(home.path().join("lifetimes"));
        let uid = Uuid::now_v7();
        repo.save(&LifetimeRecord {
            uid,
            workflow: parse_workflow_yaml(
                "workflow:\n  name: s\n  steps:\n    - { id: gate, type: approval }\n",
            )
            .unwrap(),
            current_step: Some("gate".into()),
            context: Default::default(),
            started_at: chrono::Utc::now(),
            last_updated: chrono::Utc::now(),
            reason: CheckpointReason::StepStart,
            access_key: None,
            failure: None,
        })
        .await
        .unwrap();

        assert!(status(home.path(), &uid.to_string(), true).await.is_ok());
        assert!(status(home.path(), &uid.to_string(), false).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_fail() {
        let home = TempDir::new().unwrap();
        assert!(status(home.path(), &Uuid::now_v7().to_string(), false).await.is_err());
        assert!(status(home.path(), "nope", false).await.is_err());
    }
}
