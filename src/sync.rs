//! One field's satellite sync: polygon → catalog search → selection →
//! history row → current value.

use std::sync::Arc;

use chrono::DateTime;

use crate::clock::Clock;
use crate::error::SyncError;
use crate::geometry::PolygonRing;
use crate::model::{ndvi_to_hundredths, DateWindow, Field, NdviAcquisition};
use crate::provider::{ImageCandidate, NdviStats, PolygonRef, SatelliteProvider};
use crate::registry::PolygonRegistry;
use crate::selector::{select, Selection, SelectionPolicy};
use crate::store::FieldStore;

pub const DEFAULT_WINDOW_DAYS: i64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub window_days: i64,
    pub policy: SelectionPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            policy: SelectionPolicy::default(),
        }
    }
}

/// Result of one completed sync attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Boundary missing or unusable; nothing was attempted.
    Skipped,
    /// The provider has no passes in the window. `last_sync_at` was stamped.
    NoImagery,
    Updated {
        acquisition: NdviAcquisition,
        /// Set when a pass above the cloud ceiling had to be used.
        warning: Option<String>,
    },
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        !matches!(self, SyncOutcome::Skipped)
    }
}

pub struct FieldSyncer {
    provider: Arc<dyn SatelliteProvider>,
    store: Arc<dyn FieldStore>,
    registry: PolygonRegistry,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
}

impl FieldSyncer {
    pub fn new(
        provider: Arc<dyn SatelliteProvider>,
        store: Arc<dyn FieldStore>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        let registry = PolygonRegistry::new(provider.clone(), store.clone());
        Self {
            provider,
            store,
            registry,
            clock,
            settings,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub fn store(&self) -> &Arc<dyn FieldStore> {
        &self.store
    }

    /// Sync over the trailing `window_days`.
    pub async fn sync(&self, field: &Field) -> Result<SyncOutcome, SyncError> {
        let window = DateWindow::trailing(self.clock.now(), self.settings.window_days);
        self.sync_window(field, window).await
    }

    /// Sync over a caller-supplied window.
    pub async fn sync_window(
        &self,
        field: &Field,
        window: DateWindow,
    ) -> Result<SyncOutcome, SyncError> {
        if !self.provider.is_configured() {
            return Err(SyncError::NotConfigured);
        }

        let ring = match PolygonRing::for_field(field) {
            Ok(ring) => ring,
            Err(e) => {
                tracing::debug!(field_id = %field.id, "Skipping sync: {}", e);
                return Ok(SyncOutcome::Skipped);
            }
        };

        let polygon_id = self.registry.ensure_polygon(field).await?;
        let polygon = PolygonRef {
            id: &polygon_id,
            ring: &ring,
        };
        let candidates = self.provider.search(&polygon, &window).await?;

        let selection = select(&candidates, &self.settings.policy);
        let (candidate, warning) = match &selection {
            Selection::NoImagery => {
                tracing::info!(
                    field_id = %field.id,
                    "No imagery between {} and {}",
                    window.from.date_naive(),
                    window.to.date_naive()
                );
                self.store
                    .update_field_ndvi(&field.id, None, self.clock.now())
                    .await?;
                return Ok(SyncOutcome::NoImagery);
            }
            Selection::Preferred(c) => (c, None),
            Selection::Fallback { candidate, warning } => {
                tracing::warn!(field_id = %field.id, "Using fallback {}", warning);
                (candidate, Some(warning.clone()))
            }
        };

        let stats = self.provider.statistics(candidate).await?;
        let acquisition = acquisition_for(field, candidate, &stats)?;
        self.store.create_ndvi_acquisition(&acquisition).await?;
        self.store
            .update_field_ndvi(&field.id, Some(acquisition.value), self.clock.now())
            .await?;

        tracing::info!(
            field_id = %field.id,
            ndvi = acquisition.value,
            cloud = candidate.cloud_coverage_pct,
            "Field NDVI updated"
        );
        Ok(SyncOutcome::Updated {
            acquisition,
            warning,
        })
    }
}

fn acquisition_for(
    field: &Field,
    candidate: &ImageCandidate,
    stats: &NdviStats,
) -> Result<NdviAcquisition, SyncError> {
    let acquisition_date = DateTime::from_timestamp(candidate.captured_at, 0).ok_or_else(|| {
        SyncError::Decode(format!("capture time {} out of range", candidate.captured_at))
    })?;
    Ok(NdviAcquisition {
        field_id: field.id.clone(),
        value: ndvi_to_hundredths(stats.mean),
        min: ndvi_to_hundredths(stats.min),
        max: ndvi_to_hundredths(stats.max),
        cloud_coverage_pct: candidate.cloud_coverage_pct,
        satellite_source: candidate.satellite.clone(),
        acquisition_date,
    })
}
