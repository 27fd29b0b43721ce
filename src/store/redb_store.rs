//! Field records and NDVI history backed by redb.
//!
//! Two tables:
//!   fields:       field_id                → Field (JSON)
//!   acquisitions: (field_id, captured_ms) → NdviAcquisition (JSON)
//!
//! Acquisitions are append-only; a key collision bumps the millisecond.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use super::{has_boundary, FieldStore};
use crate::model::{Field, NdviAcquisition};

const FIELDS: TableDefinition<&str, &[u8]> = TableDefinition::new("fields");
const ACQUISITIONS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("acquisitions");

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database and make sure both tables exist.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let db = Database::create(path)
            .with_context(|| format!("failed to open field store at {}", path.display()))?;
        {
            let txn = db.begin_write()?;
            txn.open_table(FIELDS)?;
            txn.open_table(ACQUISITIONS)?;
            txn.commit()?;
        }
        Ok(Self { db })
    }

    /// Default path: <data_dir>/fieldsat/fields.redb
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join("fieldsat");
        Ok(data_dir.join("fields.redb"))
    }

    fn read_field(&self, id: &str) -> Result<Option<Field>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FIELDS)?;
        match table.get(id)? {
            Some(data) => {
                let field: Field =
                    serde_json::from_slice(data.value()).context("corrupt field record in redb")?;
                Ok(Some(field))
            }
            None => Ok(None),
        }
    }

    fn modify_field<F: FnOnce(&mut Field)>(&self, id: &str, f: F) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FIELDS)?;
            let mut field: Field = match table.get(id)? {
                Some(data) => serde_json::from_slice(data.value())
                    .context("corrupt field record in redb")?,
                None => return Err(anyhow!("field {id} does not exist")),
            };
            f(&mut field);
            let json = serde_json::to_vec(&field)?;
            table.insert(id, json.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl FieldStore for RedbStore {
    fn backend_name(&self) -> &str {
        "redb"
    }

    async fn get_field_by_id(&self, id: &str) -> Result<Option<Field>> {
        self.read_field(id)
    }

    async fn get_fields_with_boundary(&self) -> Result<Vec<Field>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FIELDS)?;
        let mut fields = Vec::new();
        for item in table.iter()? {
            let (key, val) = item?;
            match serde_json::from_slice::<Field>(val.value()) {
                Ok(field) if has_boundary(&field) => fields.push(field),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping corrupt field record {}: {}", key.value(), e),
            }
        }
        Ok(fields)
    }

    async fn update_field_polygon_id(&self, id: &str, polygon_id: &str) -> Result<()> {
        self.modify_field(id, |f| f.provider_polygon_id = Some(polygon_id.to_string()))
    }

    async fn update_field_ndvi(
        &self,
        id: &str,
        ndvi: Option<i32>,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        self.modify_field(id, |f| {
            if ndvi.is_some() {
                f.current_ndvi = ndvi;
            }
            f.last_sync_at = Some(synced_at);
        })
    }

    async fn create_ndvi_acquisition(&self, acquisition: &NdviAcquisition) -> Result<()> {
        let json = serde_json::to_vec(acquisition)?;
        let field_id = acquisition.field_id.as_str();
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ACQUISITIONS)?;
            let mut key = acquisition.acquisition_date.timestamp_millis().max(0) as u64;
            while table.get((field_id, key))?.is_some() {
                key += 1;
            }
            table.insert((field_id, key), json.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    async fn get_ndvi_history(
        &self,
        field_id: &str,
        limit: usize,
    ) -> Result<Vec<NdviAcquisition>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ACQUISITIONS)?;
        let mut history = Vec::with_capacity(limit.min(256));
        // Reverse iterate (newest first)
        for item in table.range((field_id, 0u64)..=(field_id, u64::MAX))?.rev() {
            if history.len() >= limit {
                break;
            }
            let (_, val) = item?;
            let row: NdviAcquisition = serde_json::from_slice(val.value())
                .context("corrupt acquisition record in redb")?;
            history.push(row);
        }
        Ok(history)
    }

    async fn upsert_field(&self, field: &Field) -> Result<()> {
        let json = serde_json::to_vec(field)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FIELDS)?;
            table.insert(field.id.as_str(), json.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}
