//! Storage collaborator for fields and NDVI history.
//!
//! - [`MemoryStore`]: in-process maps, used by tests and dry runs
//! - [`RedbStore`]: embedded redb file, used by the `fieldsat` binary
//!
//! The sync core treats every call as a simple keyed read/write and adds no
//! caching or retries around it.

pub mod memory;
pub mod redb_store;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Field, NdviAcquisition};

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

#[async_trait]
pub trait FieldStore: Send + Sync {
    /// Human-readable backend name (e.g., "memory", "redb").
    fn backend_name(&self) -> &str;

    async fn get_field_by_id(&self, id: &str) -> Result<Option<Field>>;

    /// Fields that carry a boundary. The boundary may still be unusable;
    /// callers validate it.
    async fn get_fields_with_boundary(&self) -> Result<Vec<Field>>;

    async fn update_field_polygon_id(&self, id: &str, polygon_id: &str) -> Result<()>;

    /// Stamp `last_sync_at`; `ndvi` replaces `current_ndvi` only when present.
    async fn update_field_ndvi(
        &self,
        id: &str,
        ndvi: Option<i32>,
        synced_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn create_ndvi_acquisition(&self, acquisition: &NdviAcquisition) -> Result<()>;

    /// Most recent acquisitions first.
    async fn get_ndvi_history(&self, field_id: &str, limit: usize)
        -> Result<Vec<NdviAcquisition>>;

    /// Insert or replace a field record (seeding / import).
    async fn upsert_field(&self, field: &Field) -> Result<()>;
}

fn has_boundary(field: &Field) -> bool {
    field.boundary.as_ref().is_some_and(|b| !b.is_empty())
}
