use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    decode_json, force_https, CandidateStats, ImageCandidate, LayerUrls, NdviStats, PolygonRef,
    ProviderKind, SatelliteProvider,
};
use crate::error::SyncError;
use crate::geometry::PolygonRing;
use crate::model::DateWindow;

pub const DEFAULT_BASE_URL: &str = "https://api.agromonitoring.com/agro/1.0";

// API Response models
#[derive(Debug, Deserialize)]
struct PolygonResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    dt: i64,
    #[serde(rename = "type")]
    satellite: Option<String>,
    dc: f64,
    cl: f64,
    image: LayerSet,
    tile: LayerSet,
    stats: Option<StatsLinks>,
}

#[derive(Debug, Deserialize)]
struct LayerSet {
    ndvi: String,
    truecolor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatsLinks {
    ndvi: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsResponse {
    mean: f64,
    min: f64,
    max: f64,
    median: Option<f64>,
}

impl From<ImageItem> for ImageCandidate {
    fn from(item: ImageItem) -> Self {
        let stats = match item.stats.and_then(|s| s.ndvi) {
            Some(url) => CandidateStats::Url(url),
            None => CandidateStats::None,
        };
        ImageCandidate {
            captured_at: item.dt,
            cloud_coverage_pct: item.cl,
            data_coverage_pct: item.dc,
            satellite: item.satellite.unwrap_or_else(|| "unknown".to_string()),
            image: Some(LayerUrls {
                ndvi: item.image.ndvi,
                truecolor: item.image.truecolor,
            }),
            tile: Some(LayerUrls {
                ndvi: item.tile.ndvi,
                truecolor: item.tile.truecolor,
            }),
            stats,
        }
    }
}

/// Decode an image-search body into candidates.
fn parse_search(body: &str) -> Result<Vec<ImageCandidate>, SyncError> {
    let items: Vec<ImageItem> =
        serde_json::from_str(body).map_err(|e| SyncError::decode("image/search", e))?;
    Ok(items.into_iter().map(ImageCandidate::from).collect())
}

/// Polygon registry and imagery catalog keyed by an API key.
pub struct AgroClient {
    http_client: HttpClient,
    base_url: String,
    api_key: String,
}

impl AgroClient {
    pub fn new(http_client: HttpClient, base_url: &str, api_key: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl SatelliteProvider for AgroClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Agro
    }

    async fn create_polygon(&self, name: &str, ring: &PolygonRing) -> Result<String, SyncError> {
        let url = format!("{}/polygons", self.base_url);
        let body = json!({
            "name": name,
            "geo_json": ring.to_feature(),
        });

        let response = self
            .http_client
            .post(&url)
            .query(&[("appid", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let created: PolygonResponse = decode_json(response, "polygons").await?;
        tracing::info!(polygon_id = %created.id, "Registered polygon for {}", name);
        Ok(created.id)
    }

    async fn search(
        &self,
        polygon: &PolygonRef<'_>,
        window: &DateWindow,
    ) -> Result<Vec<ImageCandidate>, SyncError> {
        let url = format!("{}/image/search", self.base_url);
        let start = window.from.timestamp().to_string();
        let end = window.to.timestamp().to_string();

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("polyid", polygon.id),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("appid", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let response = super::check_status(response).await?;
        let body = response.text().await?;
        let candidates = parse_search(&body)?;
        tracing::debug!(
            polygon_id = polygon.id,
            "Image search returned {} passes",
            candidates.len()
        );
        Ok(candidates)
    }

    async fn statistics(&self, candidate: &ImageCandidate) -> Result<NdviStats, SyncError> {
        let url = match &candidate.stats {
            CandidateStats::Inline(stats) => return Ok(*stats),
            CandidateStats::Url(url) => force_https(url)?,
            CandidateStats::None => {
                return Err(SyncError::NotFound(format!(
                    "statistics link for pass at {}",
                    candidate.captured_at
                )))
            }
        };

        let response = self.http_client.get(url).send().await?;
        let stats: StatsResponse = decode_json(response, "stats").await?;
        Ok(NdviStats {
            mean: stats.mean,
            min: stats.min,
            max: stats.max,
            median: stats.median,
        })
    }
}
