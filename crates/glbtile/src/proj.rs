//! Planar projection math shared by the pipeline and its consumers.
//!
//! Geometry is generated in a transverse-Mercator plane so distances and
//! areas are metres near the project area, then shifted by the per-project
//! local origin recorded in the manifest. The same parameters let a viewer
//! run the inverse and recover geographic coordinates.

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;

    /// Flattening factor (1 / 298.257223563).
    pub const F: f64 = 1.0 / 298.257_223_563;

    /// First eccentricity squared.
    pub const E2: f64 = F * (2.0 - F);

    /// Semi-minor axis (polar radius) in meters.
    pub const B: f64 = A * (1.0 - F);
}

/// A transverse-Mercator projection on the WGS-84 ellipsoid.
///
/// The defaults mirror a national mapping grid (2°W central meridian,
/// 49°N origin, 0.9996012717 scale, 400 km / −100 km false offsets) so
/// projected coordinates look like familiar easting/northing pairs.
/// Serializable so the asset manifest can declare the exact projection
/// used for the local origin.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TransverseMercator {
    pub lat0_deg: f64,
    pub lon0_deg: f64,
    pub scale: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl Default for TransverseMercator {
    fn default() -> Self {
        Self {
            lat0_deg: 49.0,
            lon0_deg: -2.0,
            scale: 0.999_601_271_7,
            false_easting: 400_000.0,
            false_northing: -100_000.0,
        }
    }
}

impl TransverseMercator {
    /// Meridional arc length from the origin latitude to `lat`, scaled.
    fn meridional_arc(&self, lat: f64) -> f64 {
        let lat0 = self.lat0_deg.to_radians();
        let n = (wgs84::A - wgs84::B) / (wgs84::A + wgs84::B);
        let n2 = n * n;
        let n3 = n2 * n;

        let dlat = lat - lat0;
        let slat = lat + lat0;

        self.scale
            * wgs84::B
            * ((1.0 + n + 1.25 * n2 + 1.25 * n3) * dlat
                - (3.0 * n + 3.0 * n2 + 2.625 * n3) * dlat.sin() * slat.cos()
                + (1.875 * n2 + 1.875 * n3) * (2.0 * dlat).sin() * (2.0 * slat).cos()
                - (35.0 / 24.0) * n3 * (3.0 * dlat).sin() * (3.0 * slat).cos())
    }

    /// Geographic (lon, lat in degrees) to planar (easting, northing in metres).
    pub fn project(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let dlon = (lon_deg - self.lon0_deg).to_radians();

        let (sin_lat, cos_lat) = lat.sin_cos();
        let tan_lat = sin_lat / cos_lat;
        let tan2 = tan_lat * tan_lat;
        let tan4 = tan2 * tan2;

        let nu = self.scale * wgs84::A / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();
        let rho = self.scale * wgs84::A * (1.0 - wgs84::E2)
            / (1.0 - wgs84::E2 * sin_lat * sin_lat).powf(1.5);
        let eta2 = nu / rho - 1.0;

        let m = self.meridional_arc(lat);

        let i = m + self.false_northing;
        let ii = (nu / 2.0) * sin_lat * cos_lat;
        let iii = (nu / 24.0) * sin_lat * cos_lat.powi(3) * (5.0 - tan2 + 9.0 * eta2);
        let iiia = (nu / 720.0) * sin_lat * cos_lat.powi(5) * (61.0 - 58.0 * tan2 + tan4);
        let iv = nu * cos_lat;
        let v = (nu / 6.0) * cos_lat.powi(3) * (nu / rho - tan2);
        let vi = (nu / 120.0)
            * cos_lat.powi(5)
            * (5.0 - 18.0 * tan2 + tan4 + 14.0 * eta2 - 58.0 * tan2 * eta2);

        let northing = i + ii * dlon.powi(2) + iii * dlon.powi(4) + iiia * dlon.powi(6);
        let easting = self.false_easting + iv * dlon + v * dlon.powi(3) + vi * dlon.powi(5);

        (easting, northing)
    }

    /// Planar (easting, northing) back to geographic (lon, lat in degrees).
    pub fn unproject(&self, easting: f64, northing: f64) -> (f64, f64) {
        let lat0 = self.lat0_deg.to_radians();
        let ak = wgs84::A * self.scale;

        // Iterate the footpoint latitude until the residual arc is < 0.01 mm.
        let mut lat = (northing - self.false_northing) / ak + lat0;
        for _ in 0..32 {
            let m = self.meridional_arc(lat);
            let residual = northing - self.false_northing - m;
            lat += residual / ak;
            if residual.abs() < 1e-5 {
                break;
            }
        }

        let (sin_lat, cos_lat) = lat.sin_cos();
        let sec_lat = 1.0 / cos_lat;
        let tan_lat = sin_lat / cos_lat;
        let tan2 = tan_lat * tan_lat;
        let tan4 = tan2 * tan2;
        let tan6 = tan4 * tan2;

        let nu = self.scale * wgs84::A / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();
        let rho = self.scale * wgs84::A * (1.0 - wgs84::E2)
            / (1.0 - wgs84::E2 * sin_lat * sin_lat).powf(1.5);
        let eta2 = nu / rho - 1.0;

        let vii = tan_lat / (2.0 * rho * nu);
        let viii = tan_lat / (24.0 * rho * nu.powi(3))
            * (5.0 + 3.0 * tan2 + eta2 - 9.0 * tan2 * eta2);
        let ix = tan_lat / (720.0 * rho * nu.powi(5)) * (61.0 + 90.0 * tan2 + 45.0 * tan4);
        let x = sec_lat / nu;
        let xi = sec_lat / (6.0 * nu.powi(3)) * (nu / rho + 2.0 * tan2);
        let xii = sec_lat / (120.0 * nu.powi(5)) * (5.0 + 28.0 * tan2 + 24.0 * tan4);
        let xiia = sec_lat / (5040.0 * nu.powi(7))
            * (61.0 + 662.0 * tan2 + 1320.0 * tan4 + 720.0 * tan6);

        let de = easting - self.false_easting;
        let out_lat = lat - vii * de.powi(2) + viii * de.powi(4) - ix * de.powi(6);
        let out_lon = self.lon0_deg.to_radians()
            + x * de
            - xi * de.powi(3)
            + xii * de.powi(5)
            - xiia * de.powi(7);

        (out_lon.to_degrees(), out_lat.to_degrees())
    }
}
