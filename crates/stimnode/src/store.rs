//! The metadata store as the engine sees it.

use anyhow::Result;
use boothproto::{Collection, LogRowId, TechObsRecord};
use obslog::ObsLogDb;

pub trait MetadataStore: Send + Sync {
    /// Ordered task descriptors and device requirements of a collection.
    fn resolve_collection(&self, collection_id: &str) -> Result<Collection>;

    fn allocate_log_row(&self, subject_id: &str) -> Result<LogRowId>;

    /// Persist a completed row. Each row is written once.
    fn fill_log_row(&self, id: LogRowId, record: &TechObsRecord) -> Result<()>;
}

impl MetadataStore for ObsLogDb {
    fn resolve_collection(&self, collection_id: &str) -> Result<Collection> {
        Ok(ObsLogDb::resolve_collection(self, collection_id)?)
    }

    fn allocate_log_row(&self, subject_id: &str) -> Result<LogRowId> {
        Ok(ObsLogDb::allocate_log_row(self, subject_id)?)
    }

    fn fill_log_row(&self, id: LogRowId, record: &TechObsRecord) -> Result<()> {
        Ok(ObsLogDb::fill_log_row(self, id, record)?)
    }
}
