pub mod agro;
pub mod sentinel;
pub mod unconfigured;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Response, Url};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::{Credentials, ProviderConfig};
use crate::error::SyncError;
use crate::geometry::PolygonRing;
use crate::model::DateWindow;

/// Identifies which satellite backend a candidate or polygon comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Agro,
    Sentinel,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Agro => write!(f, "agro"),
            ProviderKind::Sentinel => write!(f, "sentinel"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agro" | "agromonitoring" => Ok(ProviderKind::Agro),
            "sentinel" | "sentinelhub" | "sentinel_hub" => Ok(ProviderKind::Sentinel),
            _ => Err(anyhow::anyhow!("Unknown provider kind: {}", s)),
        }
    }
}

/// NDVI and true-colour renderings of one satellite pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerUrls {
    pub ndvi: String,
    pub truecolor: Option<String>,
}

/// Aggregate NDVI statistics over a polygon, in raw NDVI units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NdviStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: Option<f64>,
}

/// Where the statistics for a candidate live
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateStats {
    /// Provider endpoint that must be fetched
    Url(String),
    /// Already computed by the search call
    Inline(NdviStats),
    None,
}

/// One satellite pass returned by a catalog search. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCandidate {
    /// Unix seconds
    pub captured_at: i64,
    pub cloud_coverage_pct: f64,
    pub data_coverage_pct: f64,
    pub satellite: String,
    pub image: Option<LayerUrls>,
    /// Contains literal `{z}`, `{x}`, `{y}` placeholders
    pub tile: Option<LayerUrls>,
    pub stats: CandidateStats,
}

/// A provider-side polygon together with the geometry it was built from.
pub struct PolygonRef<'a> {
    pub id: &'a str,
    pub ring: &'a PolygonRing,
}

/// The capability set every satellite backend offers.
#[async_trait]
pub trait SatelliteProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// False when credentials are missing; every call then fails with
    /// `NotConfigured` without touching the network.
    fn is_configured(&self) -> bool {
        true
    }

    /// Register a polygon and return its provider-side id.
    async fn create_polygon(&self, name: &str, ring: &PolygonRing) -> Result<String, SyncError>;

    /// Raw candidates over the polygon in the window, unfiltered and unsorted.
    /// An empty list is a legitimate answer.
    async fn search(
        &self,
        polygon: &PolygonRef<'_>,
        window: &DateWindow,
    ) -> Result<Vec<ImageCandidate>, SyncError>;

    /// Resolve the statistics attached to a selected candidate.
    async fn statistics(&self, candidate: &ImageCandidate) -> Result<NdviStats, SyncError> {
        match &candidate.stats {
            CandidateStats::Inline(stats) => Ok(*stats),
            CandidateStats::Url(_) | CandidateStats::None => Err(SyncError::NotFound(format!(
                "statistics for pass at {}",
                candidate.captured_at
            ))),
        }
    }
}

/// Build the provider selected by configuration.
///
/// Missing credentials for the selected kind produce the unconfigured
/// stand-in rather than an error, so the binary can still serve history.
pub fn from_config(
    config: &ProviderConfig,
    credentials: &Credentials,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn SatelliteProvider>> {
    let http_client = HttpClient::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;

    let provider: Arc<dyn SatelliteProvider> = match config.kind {
        ProviderKind::Agro => match credentials.agro_api_key.as_deref() {
            Some(key) => Arc::new(agro::AgroClient::new(
                http_client,
                &config.agro_base_url,
                key,
            )),
            None => {
                tracing::warn!("AGRO_API_KEY not set; satellite sync disabled");
                Arc::new(unconfigured::Unconfigured::new(ProviderKind::Agro))
            }
        },
        ProviderKind::Sentinel => match credentials.sentinel_client() {
            Some((id, secret)) => Arc::new(sentinel::SentinelClient::new(
                http_client,
                &config.sentinel_base_url,
                &config.sentinel_token_url,
                id,
                secret,
                clock,
            )),
            None => {
                tracing::warn!("SENTINEL_CLIENT_ID/SECRET not set; satellite sync disabled");
                Arc::new(unconfigured::Unconfigured::new(ProviderKind::Sentinel))
            }
        },
    };
    Ok(provider)
}

/// Return the response if it is 2xx, otherwise a `Provider` error carrying
/// the body for diagnostics.
pub(crate) async fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Provider {
        status: status.as_u16(),
        body,
    })
}

/// Read a 2xx body and decode it into `T`.
pub(crate) async fn decode_json<T: serde::de::DeserializeOwned>(
    response: Response,
    endpoint: &str,
) -> Result<T, SyncError> {
    let response = check_status(response).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| SyncError::decode(endpoint, e))
}

/// Providers hand out `http://` links; everything is fetched over HTTPS.
pub fn force_https(raw: &str) -> Result<Url, SyncError> {
    let mut url =
        Url::parse(raw).map_err(|e| SyncError::Decode(format!("invalid url {raw}: {e}")))?;
    if url.scheme() != "https" && url.set_scheme("https").is_err() {
        return Err(SyncError::Decode(format!("cannot use https for {raw}")));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("agro".parse::<ProviderKind>().unwrap(), ProviderKind::Agro);
        assert_eq!(
            "SentinelHub".parse::<ProviderKind>().unwrap(),
            ProviderKind::Sentinel
        );
        assert!("landsat".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Sentinel.to_string(), "sentinel");
    }

    #[test]
    fn test_force_https() {
        let url = force_https("http://api.example.com/image/1.0/abc?appid=k").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/image/1.0/abc?appid=k");

        let url = force_https("https://api.example.com/x").unwrap();
        assert_eq!(url.scheme(), "https");

        assert!(force_https("not a url").is_err());
    }

    #[test]
    fn test_from_config_without_credentials_is_unconfigured() {
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        let provider =
            from_config(&ProviderConfig::default(), &Credentials::default(), clock).unwrap();
        assert!(!provider.is_configured());
        assert_eq!(provider.kind(), ProviderKind::Agro);
    }

    #[test]
    fn test_from_config_selects_by_kind_not_by_key() {
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        let config = ProviderConfig {
            kind: ProviderKind::Sentinel,
            ..ProviderConfig::default()
        };
        // An agro key alone does not configure the sentinel provider.
        let credentials = Credentials {
            agro_api_key: Some("k".to_string()),
            ..Credentials::default()
        };
        let provider = from_config(&config, &credentials, clock).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Sentinel);
        assert!(!provider.is_configured());
    }
}
