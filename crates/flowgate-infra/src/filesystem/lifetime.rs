//! YAML-file implementation of `LifetimeRepository`.
//!
//! Layout under the lifetimes directory:
//! ```text
//! lifetimes/
//!   {uid}.yaml            active records
//!   ~{uid}.yaml           in-progress write, renamed over {uid}.yaml
//!   completed/{uid}.yaml  terminal records
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use flowgate_core::repository::lifetime::{ActiveEntry, LifetimeRepository, RecordLocation, StoredRecord};
use flowgate_types::error::StoreError;
use flowgate_types::lifetime::LifetimeRecord;

const COMPLETED_DIR: &str = "completed";
const TEMP_PREFIX: char = '~';

/// Lifetime records stored as one YAML file per run.
#[derive(Debug, Clone)]
pub struct YamlLifetimeRepository {
    root: PathBuf,
}

impl YamlLifetimeRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn active_path(&self, uid: Uuid) -> PathBuf {
        self.root.join(format!("{uid}.yaml"))
    }

    fn temp_path(&self, uid: Uuid) -> PathBuf {
        self.root.join(format!("{TEMP_PREFIX}{uid}.yaml"))
    }

    fn completed_path(&self, uid: Uuid) -> PathBuf {
        self.root.join(COMPLETED_DIR).join(format!("{uid}.yaml"))
    }
}

fn io_err(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Io(format!("{}: {err}", path.display()))
}

fn parse_record(text: &str) -> Result<LifetimeRecord, StoreError> {
    serde_yaml_ng::from_str(text).map_err(|e| StoreError::Serialization(e.to_string()))
}

async fn read_record(path: &Path) -> Result<Option<LifetimeRecord>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => parse_record(&text).map(Some),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

impl LifetimeRepository for YamlLifetimeRepository {
    async fn save(&self, record: &LifetimeRecord) -> Result<(), StoreError> {
        let yaml =
            serde_yaml_ng::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_err(&self.root, e))?;

        // Readers never see a half-written record.
        let temp = self.temp_path(record.uid);
        tokio::fs::write(&temp, yaml).await.map_err(|e| io_err(&temp, e))?;
        let target = self.active_path(record.uid);
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|e| io_err(&target, e))
    }

    async fn archive(&self, uid: Uuid) -> Result<(), StoreError> {
        let source = self.active_path(uid);
        let target = self.completed_path(uid);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        match tokio::fs::rename(&source, &target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(run_id = %uid, "no active record to archive");
                Ok(())
            }
            Err(err) => Err(io_err(&source, err)),
        }
    }

    async fn get(&self, uid: Uuid) -> Result<Option<StoredRecord>, StoreError> {
        if let Some(record) = read_record(&self.active_path(uid)).await? {
            return Ok(Some(StoredRecord {
                record,
                location: RecordLocation::Active,
            }));
        }
        Ok(read_record(&self.completed_path(uid))
            .await?
            .map(|record| StoredRecord {
                record,
                location: RecordLocation::Completed,
            }))
    }

    async fn list_active(&self) -> Result<Vec<ActiveEntry>, StoreError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&self.root, err)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_err(&self.root, e))? {
            let path = entry.path();
            let key = entry.file_name().to_string_lossy().into_owned();
            if key.starts_with(TEMP_PREFIX) || !key.ends_with(".yaml") || !path.is_file() {
                continue;
            }
            let record = match tokio::fs::read_to_string(&path).await {
                Ok(text) => parse_record(&text),
                Err(err) => Err(io_err(&path, err)),
            };
            entries.push(ActiveEntry { key, record });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{Map, json};
    use tempfile::TempDir;

    use flowgate_types::lifetime::CheckpointReason;
    use flowgate_types::workflow::WorkflowDocument;

    fn record(reason: CheckpointReason) -> LifetimeRecord {
        let doc: WorkflowDocument = serde_yaml_ng::from_str(
            "workflow:\n  name: deploy\n  steps:\n    - { id: notify, type: action, action: logger.Logger.info, input: { message: hi } }\n",
        )
        .unwrap();
        let mut context = Map::new();
        context.insert("env".into(), json!("prod"));
        context.insert("step_results".into(), json!({"notify": {"status": "ok"}}));
        LifetimeRecord {
            uid: Uuid::now_v7(),
            workflow: doc.workflow,
            current_step: Some("notify".into()),
            context,
            started_at: Utc::now(),
            last_updated: Utc::now(),
            reason,
            access_key: Some("agent-0badc0de".into()),
            failure: None,
        }
    }

    #[tokio::test]
    async fn save_get_archive() {
        let tmp = TempDir::new().unwrap();
        let repo = YamlLifetimeRepository::new(tmp.path().join("lifetimes"));
        let rec = record(CheckpointReason::StepStart);

        repo.save(&rec).await.unwrap();
        let stored = repo.get(rec.uid).await.unwrap().unwrap();
        assert_eq!(stored.location, RecordLocation::Active);
        assert_eq!(stored.record.context["env"], "prod");
        assert_eq!(stored.record.access_key.as_deref(), Some("agent-0badc0de"));
        assert!(!repo.temp_path(rec.uid).exists());

        repo.archive(rec.uid).await.unwrap();
        let stored = repo.get(rec.uid).await.unwrap().unwrap();
        assert_eq!(stored.location, RecordLocation::Completed);
        assert!(repo.list_active().await.unwrap().is_empty());

        // Archiving twice is harmless.
        repo.archive(rec.uid).await.unwrap();
        assert!(repo.get(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_active_reports_malformed_and_skips_temp_files() {
        let tmp = TempDir::new().unwrap();
        let repo = YamlLifetimeRepository::new(tmp.path());
        let rec = record(CheckpointReason::Completed);
        repo.save(&rec).await.unwrap();
        std::fs::write(tmp.path().join("broken.yaml"), "uid: [").unwrap();
        std::fs::write(tmp.path().join("~partial.yaml"), "uid: ").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let entries = repo.list_active().await.unwrap();
        assert_eq!(entries.len(), 2);
        let broken = entries.iter().find(|e| e.key == "broken.yaml").unwrap();
        assert!(matches!(broken.record, Err(StoreError::Serialization(_))));
        let good = entries.iter().find(|e| e.key != "broken.yaml").unwrap();
        assert_eq!(good.record.as_ref().unwrap().uid, rec.uid);
    }

    #[tokio::test]
    async fn missing_root_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let repo = YamlLifetimeRepository::new(tmp.path().join("nope"));
        assert!(repo.list_active().await.unwrap().is_empty());
    }
}
