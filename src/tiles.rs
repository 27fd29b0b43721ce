//! On-demand NDVI imagery for map clients.
//!
//! Every request re-resolves the field's current best pass, so a tile is
//! always drawn from the same pass the last sync would have picked.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as HttpClient, Url};

use crate::clock::Clock;
use crate::error::SyncError;
use crate::geometry::PolygonRing;
use crate::model::DateWindow;
use crate::provider::{check_status, force_https, PolygonRef, SatelliteProvider};
use crate::registry::PolygonRegistry;
use crate::selector::select;
use crate::store::FieldStore;
use crate::sync::SyncSettings;

/// Which rendering of the selected pass to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileRequest {
    Image,
    Tile { z: u32, x: u32, y: u32 },
}

/// An upstream asset ready to be streamed to the caller.
pub struct FetchedAsset {
    pub content_type: String,
    pub body: BoxStream<'static, Result<Bytes, std::io::Error>>,
}

impl std::fmt::Debug for FetchedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedAsset")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedAsset, SyncError>;
}

/// Streams assets straight from the provider's image host.
pub struct HttpAssetFetcher {
    http_client: HttpClient,
}

impl HttpAssetFetcher {
    pub fn new(http_client: HttpClient) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedAsset, SyncError> {
        let response = self.http_client.get(url.clone()).send().await?;
        let response = check_status(response).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();
        Ok(FetchedAsset { content_type, body })
    }
}

pub struct TileProxy {
    store: Arc<dyn FieldStore>,
    provider: Arc<dyn SatelliteProvider>,
    fetcher: Arc<dyn AssetFetcher>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    palette: Option<String>,
}

impl TileProxy {
    pub fn new(
        store: Arc<dyn FieldStore>,
        provider: Arc<dyn SatelliteProvider>,
        fetcher: Arc<dyn AssetFetcher>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            provider,
            fetcher,
            clock,
            settings,
            palette: None,
        }
    }

    /// Palette id appended to every asset URL as `paletteid=`.
    pub fn with_palette(mut self, palette: Option<String>) -> Self {
        self.palette = palette.filter(|p| !p.is_empty());
        self
    }

    /// Resolve the provider URL for a field's current best pass.
    pub async fn resolve(&self, field_id: &str, request: TileRequest) -> Result<Url, SyncError> {
        let field = self
            .store
            .get_field_by_id(field_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("field {field_id}")))?;
        let polygon_id = PolygonRegistry::lookup(&field)?;
        let ring = PolygonRing::for_field(&field)
            .map_err(|e| SyncError::NotFound(e.to_string()))?;

        let window = DateWindow::trailing(self.clock.now(), self.settings.window_days);
        let polygon = PolygonRef {
            id: polygon_id,
            ring: &ring,
        };
        let candidates = self.provider.search(&polygon, &window).await?;
        let selection = select(&candidates, &self.settings.policy);
        let candidate = selection
            .candidate()
            .ok_or_else(|| SyncError::NotFound(format!("no imagery for field {field_id}")))?;

        let layers = match request {
            TileRequest::Image => candidate.image.as_ref(),
            TileRequest::Tile { .. } => candidate.tile.as_ref(),
        };
        let template = layers.map(|l| l.ndvi.as_str()).ok_or_else(|| {
            SyncError::NotFound(format!(
                "{} pass for field {field_id} has no NDVI rendering",
                self.provider.kind()
            ))
        })?;

        let raw = match request {
            TileRequest::Image => template.to_string(),
            TileRequest::Tile { z, x, y } => template
                .replace("{z}", &z.to_string())
                .replace("{x}", &x.to_string())
                .replace("{y}", &y.to_string()),
        };

        let mut url = force_https(&raw)?;
        if let Some(palette) = &self.palette {
            url.query_pairs_mut().append_pair("paletteid", palette);
        }
        Ok(url)
    }

    pub async fn fetch(&self, field_id: &str, request: TileRequest) -> Result<FetchedAsset, SyncError> {
        let url = self.resolve(field_id, request).await?;
        tracing::debug!(field_id, "Proxying NDVI asset {}", url.path());
        self.fetcher.fetch(&url).await
    }
}
