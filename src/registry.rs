use std::sync::Arc;

use crate::error::SyncError;
use crate::geometry::PolygonRing;
use crate::model::Field;
use crate::provider::SatelliteProvider;
use crate::store::FieldStore;

/// Ensures every field has a provider-side polygon id.
pub struct PolygonRegistry {
    provider: Arc<dyn SatelliteProvider>,
    store: Arc<dyn FieldStore>,
}

impl PolygonRegistry {
    pub fn new(provider: Arc<dyn SatelliteProvider>, store: Arc<dyn FieldStore>) -> Self {
        Self { provider, store }
    }

    /// Return the field's polygon id, registering one on first use.
    ///
    /// Idempotent: a field that already has an id causes no network call.
    /// Concurrent first calls may both register; the last stored id wins.
    pub async fn ensure_polygon(&self, field: &Field) -> Result<String, SyncError> {
        if let Some(id) = &field.provider_polygon_id {
            return Ok(id.clone());
        }

        let ring = PolygonRing::for_field(field)?;
        let polygon_id = self.provider.create_polygon(&field.name, &ring).await?;
        self.store
            .update_field_polygon_id(&field.id, &polygon_id)
            .await?;
        tracing::info!(
            field_id = %field.id,
            polygon_id = %polygon_id,
            provider = %self.provider.kind(),
            "Field polygon registered"
        );
        Ok(polygon_id)
    }

    /// Existing polygon id only; absence is `NotFound`.
    pub fn lookup(field: &Field) -> Result<&str, SyncError> {
        field
            .provider_polygon_id
            .as_deref()
            .ok_or_else(|| SyncError::NotFound(format!("no polygon registered for field {}", field.id)))
    }
}
