//! Lifetime record repository trait definition.
//!
//! Records are split into an active collection (runs in flight) and a
//! completed collection (terminal runs), one record per run id. The
//! infrastructure layer (flowgate-infra) implements this with YAML files.

use flowgate_types::error::StoreError;
use flowgate_types::lifetime::LifetimeRecord;
use uuid::Uuid;

/// Which collection a stored record was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLocation {
    Active,
    Completed,
}

/// A record read back from storage.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record: LifetimeRecord,
    pub location: RecordLocation,
}

/// One entry of the active collection. A malformed record surfaces as an
/// error for that entry only, so the rest can still be recovered.
#[derive(Debug)]
pub struct ActiveEntry {
    /// Storage key (file name, row id) used in logs.
    pub key: String,
    pub record: Result<LifetimeRecord, StoreError>,
}

/// Repository trait for lifetime record persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait LifetimeRepository: Send + Sync + 'static {
    /// Write (or overwrite) the active record for `record.uid`.
    fn save(
        &self,
        record: &LifetimeRecord,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Move the active record for `uid` to the completed collection.
    ///
    /// A missing active record is not an error.
    fn archive(&self, uid: Uuid) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Read a record, looking in the active collection first.
    fn get(
        &self,
        uid: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StoredRecord>, StoreError>> + Send;

    /// Every record in the active collection.
    fn list_active(&self) -> impl std::future::Future<Output = Result<Vec<ActiveEntry>, StoreError>> + Send;
}
