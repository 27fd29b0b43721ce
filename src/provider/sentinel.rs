//! Statistics provider authenticated with OAuth client credentials.
//!
//! This backend has no polygon registry and no tile templates. Polygon ids
//! are derived locally from the ring, and each daily statistics interval
//! with valid samples becomes one candidate carrying inline NDVI stats.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client as HttpClient};
use serde::{Deserialize, Deserializer};
use serde_json::json;

use super::{
    CandidateStats, ImageCandidate, NdviStats, PolygonRef, ProviderKind,
    SatelliteProvider,
};
use crate::clock::Clock;
use crate::error::SyncError;
use crate::geometry::PolygonRing;
use crate::model::DateWindow;
use crate::token::{ClientCredentials, TokenCache};

pub const DEFAULT_BASE_URL: &str = "https://services.sentinel-hub.com";
pub const DEFAULT_TOKEN_URL: &str =
    "https://services.sentinel-hub.com/auth/realms/main/protocol/openid-connect/token";

const SATELLITE: &str = "Sentinel-2 L2A";
const AGGREGATION_INTERVAL: &str = "P1D";
const RESOLUTION_METERS: u32 = 10;

const EVALSCRIPT: &str = r#"//VERSION=3
function setup() {
  return {
    input: [{ bands: ["B04", "B08", "CLM", "dataMask"] }],
    output: [
      { id: "ndvi", bands: 1, sampleType: "FLOAT32" },
      { id: "clouds", bands: 1, sampleType: "FLOAT32" },
      { id: "dataMask", bands: 1 }
    ]
  };
}

function evaluatePixel(s) {
  let ndvi = (s.B08 - s.B04) / (s.B08 + s.B04);
  return { ndvi: [ndvi], clouds: [s.CLM], dataMask: [s.dataMask] };
}
"#;

// API Response models
#[derive(Debug, Deserialize)]
struct StatisticsResponse {
    data: Vec<IntervalResult>,
}

#[derive(Debug, Deserialize)]
struct IntervalResult {
    interval: Interval,
    outputs: Option<Outputs>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Interval {
    from: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Outputs {
    ndvi: Output,
    clouds: Option<Output>,
}

#[derive(Debug, Deserialize)]
struct Output {
    bands: Bands,
}

#[derive(Debug, Deserialize)]
struct Bands {
    #[serde(rename = "B0")]
    b0: BandStats,
}

#[derive(Debug, Deserialize)]
struct BandStats {
    stats: Stats,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    #[serde(deserialize_with = "lenient_f64")]
    min: f64,
    #[serde(deserialize_with = "lenient_f64")]
    max: f64,
    #[serde(deserialize_with = "lenient_f64")]
    mean: f64,
    sample_count: u64,
    no_data_count: u64,
    percentiles: Option<Percentiles>,
}

#[derive(Debug, Deserialize)]
struct Percentiles {
    #[serde(rename = "50.0")]
    p50: Option<f64>,
}

/// The statistics API reports empty aggregates as the string "NaN".
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(s) => Ok(s.parse().unwrap_or(f64::NAN)),
    }
}

impl IntervalResult {
    fn into_candidate(self) -> Option<ImageCandidate> {
        if self.error.is_some() {
            return None;
        }
        let outputs = self.outputs?;
        let ndvi = outputs.ndvi.bands.b0.stats;
        let valid = ndvi.sample_count.saturating_sub(ndvi.no_data_count);
        if valid == 0 || !ndvi.mean.is_finite() {
            return None;
        }

        let cloud_fraction = outputs
            .clouds
            .map(|c| c.bands.b0.stats.mean)
            .filter(|m| m.is_finite())
            .unwrap_or(0.0);

        Some(ImageCandidate {
            captured_at: self.interval.from.timestamp(),
            cloud_coverage_pct: (cloud_fraction * 100.0).clamp(0.0, 100.0),
            data_coverage_pct: valid as f64 / ndvi.sample_count as f64 * 100.0,
            satellite: SATELLITE.to_string(),
            image: None,
            tile: None,
            stats: CandidateStats::Inline(NdviStats {
                mean: ndvi.mean,
                min: ndvi.min,
                max: ndvi.max,
                median: ndvi.percentiles.and_then(|p| p.p50),
            }),
        })
    }
}

fn parse_statistics(body: &str) -> Result<Vec<ImageCandidate>, SyncError> {
    let response: StatisticsResponse =
        serde_json::from_str(body).map_err(|e| SyncError::decode("statistics", e))?;
    Ok(response
        .data
        .into_iter()
        .filter_map(IntervalResult::into_candidate)
        .collect())
}

fn statistics_request(ring: &PolygonRing, window: &DateWindow) -> serde_json::Value {
    json!({
        "input": {
            "bounds": {
                "geometry": ring.to_geometry(),
                "properties": { "crs": "http://www.opengis.net/def/crs/OGC/1.3/CRS84" }
            },
            "data": [{
                "type": "sentinel-2-l2a",
                "dataFilter": { "mosaickingOrder": "leastCC" }
            }]
        },
        "aggregation": {
            "timeRange": {
                "from": window.from.to_rfc3339_opts(SecondsFormat::Secs, true),
                "to": window.to.to_rfc3339_opts(SecondsFormat::Secs, true)
            },
            "aggregationInterval": { "of": AGGREGATION_INTERVAL },
            "evalscript": EVALSCRIPT,
            "resx": RESOLUTION_METERS,
            "resy": RESOLUTION_METERS
        },
        "calculations": {
            "ndvi": { "statistics": { "default": { "percentiles": { "k": [50] } } } }
        }
    })
}

pub struct SentinelClient {
    http_client: HttpClient,
    statistics_url: String,
    tokens: TokenCache,
}

impl SentinelClient {
    pub fn new(
        http_client: HttpClient,
        base_url: &str,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let exchange =
            ClientCredentials::new(http_client.clone(), token_url, client_id, client_secret);
        Self {
            http_client,
            statistics_url: format!("{}/api/v1/statistics", base_url.trim_end_matches('/')),
            tokens: TokenCache::new(Box::new(exchange), clock),
        }
    }
}

#[async_trait]
impl SatelliteProvider for SentinelClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sentinel
    }

    async fn create_polygon(&self, _name: &str, ring: &PolygonRing) -> Result<String, SyncError> {
        Ok(format!("sh-{}", ring.fingerprint()))
    }

    async fn search(
        &self,
        polygon: &PolygonRef<'_>,
        window: &DateWindow,
    ) -> Result<Vec<ImageCandidate>, SyncError> {
        let token = self.tokens.get_token().await?;
        let response = self
            .http_client
            .post(&self.statistics_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .json(&statistics_request(polygon.ring, window))
            .send()
            .await?;

        let response = super::check_status(response).await?;
        let body = response.text().await?;
        let candidates = parse_statistics(&body)?;
        tracing::debug!(
            polygon_id = polygon.id,
            "Statistics returned {} usable intervals",
            candidates.len()
        );
        Ok(candidates)
    }
}
