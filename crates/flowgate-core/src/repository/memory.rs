//! In-memory `LifetimeRepository` for engine tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use flowgate_types::error::StoreError;
use flowgate_types::lifetime::{CheckpointReason, LifetimeRecord};
use uuid::Uuid;

use super::lifetime::{ActiveEntry, LifetimeRepository, RecordLocation, StoredRecord};

#[derive(Default)]
pub struct InMemoryLifetimeRepository {
    active: Mutex<HashMap<Uuid, LifetimeRecord>>,
    completed: Mutex<HashMap<Uuid, LifetimeRecord>>,
    /// Every (uid, reason) written, in write order.
    pub writes: Mutex<Vec<(Uuid, CheckpointReason)>>,
    /// Number of leading archive calls that fail with an I/O error.
    pub failing_archives: AtomicUsize,
    /// Raw entries returned as malformed by `list_active`.
    pub malformed: Mutex<Vec<String>>,
}

impl InMemoryLifetimeRepository {
    pub fn reasons(&self, uid: Uuid) -> Vec<CheckpointReason> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == uid)
            .map(|(_, r)| *r)
            .collect()
    }

    pub fn active(&self, uid: Uuid) -> Option<LifetimeRecord> {
        self.active.lock().unwrap().get(&uid).cloned()
    }

    pub fn completed(&self, uid: Uuid) -> Option<LifetimeRecord> {
        self.completed.lock().unwrap().get(&uid).cloned()
    }

    pub fn insert_active(&self, record: LifetimeRecord) {
        self.active.lock().unwrap().insert(record.uid, record);
    }
}

impl LifetimeRepository for InMemoryLifetimeRepository {
    async fn save(&self, record: &LifetimeRecord) -> Result<(), StoreError> {
        self.writes.lock().unwrap().push((record.uid, record.reason));
        self.active.lock().unwrap().insert(record.uid, record.clone());
        Ok(())
    }

    async fn archive(&self, uid: Uuid) -> Result<(), StoreError> {
        let remaining = self.failing_archives.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_archives.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Io("simulated failure".into()));
        }
        if let Some(record) = self.active.lock().unwrap().remove(&uid) {
            self.completed.lock().unwrap().insert(uid, record);
        }
        Ok(())
    }

    async fn get(&self, uid: Uuid) -> Result<Option<StoredRecord>, StoreError> {
        if let Some(record) = self.active(uid) {
            return Ok(Some(StoredRecord {
                record,
                location: RecordLocation::Active,
            }));
        }
        Ok(self.completed(uid).map(|record| StoredRecord {
            record,
            location: RecordLocation::Completed,
        }))
    }

    async fn list_active(&self) -> Result<Vec<ActiveEntry>, StoreError> {
        let mut entries: Vec<ActiveEntry> = self
            .active
            .lock()
            .unwrap()
            .values()
            .map(|r| ActiveEntry {
                key: format!("{}.yaml", r.uid),
                record: Ok(r.clone()),
            })
            .collect();
        for key in self.malformed.lock().unwrap().iter() {
            entries.push(ActiveEntry {
                key: key.clone(),
                record: Err(StoreError::Serialization("malformed record".into())),
            });
        }
        Ok(entries)
    }
}
