//! Area of interest: the bounded region a twin is generated for, and the
//! local origin that keeps every downstream vertex coordinate small.

use std::path::Path;

use anyhow::{Context, Result};
use geo_types::{coord, Rect};
use glam::DVec2;
use glbtile::proj::TransverseMercator;
use serde::{Deserialize, Serialize};

/// AOI descriptor. The origin is the projected planar coordinate of the
/// centre, computed exactly once when the descriptor is created; every
/// stage of a run translates through the same value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aoi {
    pub centre_lat: f64,
    pub centre_lon: f64,
    pub side_length_m: f64,
    pub buffer_m: f64,
    /// Planar (easting, northing) of the centre.
    pub origin: [f64; 2],
}

impl Aoi {
    /// Build a descriptor, resolving the local origin through `tm`.
    pub fn derive(
        centre_lat: f64,
        centre_lon: f64,
        side_length_m: f64,
        buffer_m: f64,
        tm: &TransverseMercator,
    ) -> Aoi {
        let (x, y) = tm.project(centre_lon, centre_lat);
        Aoi {
            centre_lat,
            centre_lon,
            side_length_m,
            buffer_m,
            origin: [x, y],
        }
    }

    /// Load the descriptor written by the AOI step. Its absence is fatal:
    /// nothing downstream can place geometry without the origin.
    pub fn load(path: &Path) -> Result<Aoi> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("AOI descriptor {} is required", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing AOI descriptor {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("writing AOI descriptor {}", path.display()))
    }

    /// Geographic point to planar coordinates (easting, northing).
    pub fn to_planar(&self, tm: &TransverseMercator, lon: f64, lat: f64) -> DVec2 {
        let (x, y) = tm.project(lon, lat);
        DVec2::new(x, y)
    }

    /// Planar coordinates to origin-relative local coordinates.
    pub fn to_local(&self, planar: DVec2) -> DVec2 {
        planar - DVec2::new(self.origin[0], self.origin[1])
    }

    pub fn half_side(&self) -> f64 {
        self.side_length_m / 2.0
    }

    /// Exact AOI square in local coordinates, used for clipping.
    pub fn clip_rect(&self) -> Rect<f64> {
        let h = self.half_side();
        Rect::new(coord! { x: -h, y: -h }, coord! { x: h, y: h })
    }
}
