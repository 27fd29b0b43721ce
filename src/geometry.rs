//! Field boundary → provider polygon geometry.
//!
//! Providers expect GeoJSON order (longitude, latitude) and a closed ring;
//! farmers enter `{lat, lng}` points and rarely repeat the first vertex.

use geojson::{Feature, Geometry, JsonObject, Value as GeoValue};

use crate::error::SyncError;
use crate::model::{Field, GeoPoint};

const MIN_DISTINCT_POINTS: usize = 3;

/// A closed linear ring in `[lng, lat]` order.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRing {
    coords: Vec<[f64; 2]>,
}

impl PolygonRing {
    /// Build a ring from boundary points, closing it if needed.
    ///
    /// Returns `None` when fewer than three distinct vertices remain or any
    /// coordinate is not finite.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points
            .iter()
            .any(|p| !p.lat.is_finite() || !p.lng.is_finite())
        {
            return None;
        }

        let mut coords: Vec<[f64; 2]> = points.iter().map(|p| [p.lng, p.lat]).collect();
        let first = *coords.first()?;
        let last = *coords.last()?;
        if first != last {
            coords.push(first);
        }

        // The closing vertex duplicates the first one.
        if coords.len() - 1 < MIN_DISTINCT_POINTS {
            return None;
        }
        Some(Self { coords })
    }

    pub fn for_field(field: &Field) -> Result<Self, SyncError> {
        let points = field.boundary_points();
        Self::from_points(points).ok_or_else(|| SyncError::InvalidGeometry {
            field_id: field.id.clone(),
            points: points.len(),
        })
    }

    pub fn coords(&self) -> &[[f64; 2]] {
        &self.coords
    }

    pub fn to_geometry(&self) -> Geometry {
        let ring = self.coords.iter().map(|c| c.to_vec()).collect();
        Geometry::new(GeoValue::Polygon(vec![ring]))
    }

    pub fn to_feature(&self) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(self.to_geometry()),
            id: None,
            properties: Some(JsonObject::new()),
            foreign_members: None,
        }
    }

    /// Stable fingerprint of the ring, used as a local polygon id by
    /// providers that have no polygon registry.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for [lng, lat] in &self.coords {
            hasher.update(&lng.to_le_bytes());
            hasher.update(&lat.to_le_bytes());
        }
        hasher.finalize().to_hex()[..16].to_string()
    }
}
