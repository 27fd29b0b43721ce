use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{has_boundary, FieldStore};
use crate::model::{Field, NdviAcquisition};

#[derive(Default)]
pub struct MemoryStore {
    fields: Mutex<BTreeMap<String, Field>>,
    acquisitions: Mutex<Vec<NdviAcquisition>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        let store = Self::new();
        {
            let mut map = store.fields.lock().unwrap_or_else(|p| p.into_inner());
            for field in fields {
                map.insert(field.id.clone(), field);
            }
        }
        store
    }

    fn update<F: FnOnce(&mut Field)>(&self, id: &str, f: F) -> Result<()> {
        let mut fields = self.fields.lock().map_err(|e| anyhow!("lock poisoned: {e}"))?;
        let field = fields
            .get_mut(id)
            .ok_or_else(|| anyhow!("field {id} does not exist"))?;
        f(field);
        Ok(())
    }
}

#[async_trait]
impl FieldStore for MemoryStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn get_field_by_id(&self, id: &str) -> Result<Option<Field>> {
        let fields = self.fields.lock().map_err(|e| anyhow!("lock poisoned: {e}"))?;
        Ok(fields.get(id).cloned())
    }

    async fn get_fields_with_boundary(&self) -> Result<Vec<Field>> {
        let fields = self.fields.lock().map_err(|e| anyhow!("lock poisoned: {e}"))?;
        Ok(fields.values().filter(|f| has_boundary(f)).cloned().collect())
    }

    async fn update_field_polygon_id(&self, id: &str, polygon_id: &str) -> Result<()> {
        self.update(id, |f| f.provider_polygon_id = Some(polygon_id.to_string()))
    }

    async fn update_field_ndvi(
        &self,
        id: &str,
        ndvi: Option<i32>,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(id, |f| {
            if ndvi.is_some() {
                f.current_ndvi = ndvi;
            }
            f.last_sync_at = Some(synced_at);
        })
    }

    async fn create_ndvi_acquisition(&self, acquisition: &NdviAcquisition) -> Result<()> {
        let mut rows = self
            .acquisitions
            .lock()
            .map_err(|e| anyhow!("lock poisoned: {e}"))?;
        rows.push(acquisition.clone());
        Ok(())
    }

    async fn get_ndvi_history(
        &self,
        field_id: &str,
        limit: usize,
    ) -> Result<Vec<NdviAcquisition>> {
        let rows = self
            .acquisitions
            .lock()
            .map_err(|e| anyhow!("lock poisoned: {e}"))?;
        let mut history: Vec<NdviAcquisition> = rows
            .iter()
            .filter(|a| a.field_id == field_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.acquisition_date.cmp(&a.acquisition_date));
        history.truncate(limit);
        Ok(history)
    }

    async fn upsert_field(&self, field: &Field) -> Result<()> {
        let mut fields = self.fields.lock().map_err(|e| anyhow!("lock poisoned: {e}"))?;
        fields.insert(field.id.clone(), field.clone());
        Ok(())
    }
}
