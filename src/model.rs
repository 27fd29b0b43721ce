//! Records the sync core reads and writes.
//!
//! `Field` is owned by the surrounding CRUD layer; only the subset the
//! satellite sync touches is modelled here.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A boundary vertex as entered by the farmer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub boundary: Option<Vec<GeoPoint>>,
    #[serde(default)]
    pub provider_polygon_id: Option<String>,
    /// NDVI x 100
    #[serde(default)]
    pub current_ndvi: Option<i32>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Field {
    pub fn boundary_points(&self) -> &[GeoPoint] {
        self.boundary.as_deref().unwrap_or(&[])
    }
}

/// One accepted acquisition. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NdviAcquisition {
    pub field_id: String,
    /// Mean NDVI x 100
    pub value: i32,
    /// Minimum NDVI x 100
    pub min: i32,
    /// Maximum NDVI x 100
    pub max: i32,
    pub cloud_coverage_pct: f64,
    pub satellite_source: String,
    pub acquisition_date: DateTime<Utc>,
}

/// Scale an NDVI value in [-1, 1] to the stored integer form.
pub fn ndvi_to_hundredths(value: f64) -> i32 {
    (value.clamp(-1.0, 1.0) * 100.0).round() as i32
}

/// Process-wide scheduler counters. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunStats {
    pub last_run_at: Option<DateTime<Utc>>,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub total_count: usize,
    pub is_running: bool,
}

/// Longest window a catalog search may span.
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Inclusive time range used for catalog queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// `[now - days, now]`, with `days` clamped to `1..=MAX_WINDOW_DAYS`.
    pub fn trailing(now: DateTime<Utc>, days: i64) -> Self {
        let days = days.clamp(1, MAX_WINDOW_DAYS);
        let from = Duration::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { from, to: now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndvi_scaling_rounds_and_clamps() {
        assert_eq!(ndvi_to_hundredths(0.734), 73);
        assert_eq!(ndvi_to_hundredths(0.736), 74);
        assert_eq!(ndvi_to_hundredths(-0.2), -20);
        assert_eq!(ndvi_to_hundredths(1.7), 100);
    }

    #[test]
    fn test_trailing_window() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let window = DateWindow::trailing(now, 60);
        assert_eq!(window.to, now);
        assert_eq!((window.to - window.from).num_days(), 60);
    }

    #[test]
    fn test_trailing_window_clamps_out_of_range_days() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let huge = DateWindow::trailing(now, 200_000_000);
        assert_eq!((huge.to - huge.from).num_days(), MAX_WINDOW_DAYS);

        let negative = DateWindow::trailing(now, -5);
        assert_eq!((negative.to - negative.from).num_days(), 1);

        let far_past = DateWindow::trailing(DateTime::<Utc>::MIN_UTC, 60);
        assert_eq!(far_past.from, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_field_json_uses_camel_case_and_defaults() {
        let json = r#"{"id":"f1","name":"North","boundary":[{"lat":1.0,"lng":2.0}]}"#;
        let field: Field = serde_json::from_str(json).unwrap();
        assert_eq!(field.boundary_points().len(), 1);
        assert!(field.provider_polygon_id.is_none());
        assert!(field.current_ndvi.is_none());

        let out = serde_json::to_string(&field).unwrap();
        assert!(out.contains("providerPolygonId"));
    }
}
