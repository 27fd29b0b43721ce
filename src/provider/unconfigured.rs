use async_trait::async_trait;

use super::{ImageCandidate, NdviStats, PolygonRef, ProviderKind, SatelliteProvider};
use crate::error::SyncError;
use crate::geometry::PolygonRing;
use crate::model::DateWindow;

/// Stand-in used when the selected provider has no credentials.
pub struct Unconfigured {
    kind: ProviderKind,
}

impl Unconfigured {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl SatelliteProvider for Unconfigured {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn create_polygon(&self, _name: &str, _ring: &PolygonRing) -> Result<String, SyncError> {
        Err(SyncError::NotConfigured)
    }

    async fn search(
        &self,
        _polygon: &PolygonRef<'_>,
        _window: &DateWindow,
    ) -> Result<Vec<ImageCandidate>, SyncError> {
        Err(SyncError::NotConfigured)
    }

    async fn statistics(&self, _candidate: &ImageCandidate) -> Result<NdviStats, SyncError> {
        Err(SyncError::NotConfigured)
    }
}
