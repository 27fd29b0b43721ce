//! Scripted collaborators shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use reqwest::Url;
use tokio::sync::Semaphore;

use crate::error::SyncError;
use crate::geometry::PolygonRing;
use crate::model::{DateWindow, Field, GeoPoint};
use crate::provider::{
    CandidateStats, ImageCandidate, LayerUrls, NdviStats, PolygonRef, ProviderKind,
    SatelliteProvider,
};
use crate::tiles::{AssetFetcher, FetchedAsset};

/// One request as seen by a [`serve_stub`] router.
#[derive(Debug, Clone, Default)]
pub struct RecordedRequest {
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// Shared log the stub handlers append to.
pub type RequestLog = Arc<Mutex<Vec<RecordedRequest>>>;

pub fn record(
    log: &RequestLog,
    uri: &axum::http::Uri,
    headers: &axum::http::HeaderMap,
    body: String,
) {
    log.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        authorization: headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn field_with_boundary(id: &str, points: usize) -> Field {
    let square = [
        GeoPoint::new(50.0, 8.0),
        GeoPoint::new(50.0, 8.01),
        GeoPoint::new(50.01, 8.01),
        GeoPoint::new(50.01, 8.0),
        GeoPoint::new(50.005, 7.995),
    ];
    Field {
        id: id.to_string(),
        name: format!("Field {id}"),
        boundary: Some(square.iter().copied().cycle().take(points).collect()),
        provider_polygon_id: None,
        current_ndvi: None,
        last_sync_at: None,
    }
}

pub fn candidate(cloud: f64, captured_at: i64, mean: f64) -> ImageCandidate {
    ImageCandidate {
        captured_at,
        cloud_coverage_pct: cloud,
        data_coverage_pct: 100.0,
        satellite: "Sentinel 2".to_string(),
        image: Some(LayerUrls {
            ndvi: format!("http://img.example.com/image/{captured_at}?appid=k"),
            truecolor: None,
        }),
        tile: Some(LayerUrls {
            ndvi: format!("http://img.example.com/tile/{{z}}/{{x}}/{{y}}/{captured_at}?appid=k"),
            truecolor: None,
        }),
        stats: CandidateStats::Inline(NdviStats {
            mean,
            min: mean - 0.2,
            max: mean + 0.2,
            median: None,
        }),
    }
}

/// In-memory provider that records every call.
#[derive(Default)]
pub struct FakeProvider {
    create_calls: AtomicUsize,
    search_calls: AtomicUsize,
    stats_calls: AtomicUsize,
    candidates: Mutex<Vec<ImageCandidate>>,
    candidates_by_polygon: Mutex<HashMap<String, Vec<ImageCandidate>>>,
    failing_polygons: Mutex<HashSet<String>>,
    panicking_polygons: Mutex<HashSet<String>>,
    create_failure: Mutex<Option<(u16, String)>>,
    last_ring: Mutex<Option<PolygonRing>>,
    last_window: Mutex<Option<DateWindow>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidates(candidates: Vec<ImageCandidate>) -> Self {
        let provider = Self::new();
        *provider.candidates.lock().unwrap() = candidates;
        provider
    }

    pub fn set_candidates_for(&self, polygon_id: &str, candidates: Vec<ImageCandidate>) {
        self.candidates_by_polygon
            .lock()
            .unwrap()
            .insert(polygon_id.to_string(), candidates);
    }

    pub fn fail_search_for(&self, polygon_id: &str) {
        self.failing_polygons
            .lock()
            .unwrap()
            .insert(polygon_id.to_string());
    }

    pub fn panic_search_for(&self, polygon_id: &str) {
        self.panicking_polygons
            .lock()
            .unwrap()
            .insert(polygon_id.to_string());
    }

    pub fn fail_create(&self, status: u16, body: &str) {
        *self.create_failure.lock().unwrap() = Some((status, body.to_string()));
    }

    /// Make every search wait for a permit on the returned semaphore.
    pub fn gate_searches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn last_ring(&self) -> Option<PolygonRing> {
        self.last_ring.lock().unwrap().clone()
    }

    pub fn last_window(&self) -> Option<DateWindow> {
        *self.last_window.lock().unwrap()
    }
}

#[async_trait]
impl SatelliteProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Agro
    }

    async fn create_polygon(&self, name: &str, ring: &PolygonRing) -> Result<String, SyncError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_ring.lock().unwrap() = Some(ring.clone());
        if let Some((status, body)) = self.create_failure.lock().unwrap().clone() {
            return Err(SyncError::Provider { status, body });
        }
        Ok(format!("poly-{}", name.replace(' ', "-").to_lowercase()))
    }

    async fn search(
        &self,
        polygon: &PolygonRef<'_>,
        window: &DateWindow,
    ) -> Result<Vec<ImageCandidate>, SyncError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_window.lock().unwrap() = Some(*window);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let should_panic = self.panicking_polygons.lock().unwrap().contains(polygon.id);
        if should_panic {
            panic!("scripted panic for {}", polygon.id);
        }
        let should_fail = self.failing_polygons.lock().unwrap().contains(polygon.id);
        if should_fail {
            return Err(SyncError::Provider {
                status: 503,
                body: "upstream unavailable".to_string(),
            });
        }
        if let Some(c) = self.candidates_by_polygon.lock().unwrap().get(polygon.id) {
            return Ok(c.clone());
        }
        Ok(self.candidates.lock().unwrap().clone())
    }

    async fn statistics(&self, candidate: &ImageCandidate) -> Result<NdviStats, SyncError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        match &candidate.stats {
            CandidateStats::Inline(stats) => Ok(*stats),
            _ => Err(SyncError::NotFound("stats".to_string())),
        }
    }
}

/// Asset fetcher that returns canned bytes and records requested URLs.
#[derive(Default)]
pub struct FakeFetcher {
    requested: Mutex<Vec<String>>,
    failure: Mutex<Option<u16>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, status: u16) {
        *self.failure.lock().unwrap() = Some(status);
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedAsset, SyncError> {
        self.requested.lock().unwrap().push(url.to_string());
        if let Some(status) = *self.failure.lock().unwrap() {
            return Err(SyncError::Provider {
                status,
                body: "asset unavailable".to_string(),
            });
        }
        let chunks = vec![
            Ok(Bytes::from_static(b"\x89PNG")),
            Ok(Bytes::from_static(b"tile-bytes")),
        ];
        Ok(FetchedAsset {
            content_type: "image/png".to_string(),
            body: stream::iter(chunks).boxed(),
        })
    }
}
