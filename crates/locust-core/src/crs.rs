//! Coordinate reference tags and reprojection.
//! Every geometry handled by the pipeline carries its `Crs`; reprojection is
//! a pure function of (geometry, target CRS). All coordinate math uses f64.

use geo::{Coord, MapCoords};
use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// WGS84 semi-major axis (m).
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// UTM scale factor on the central meridian.
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

// ── CRS tag ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    North,
    South,
}

/// Coordinate reference system of a geometry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Crs {
    /// Geographic lon/lat degrees (EPSG:4326). The storage CRS.
    Wgs84,
    /// Universal Transverse Mercator, metres.
    Utm { zone: u8, hemisphere: Hemisphere },
}

impl Crs {
    /// UTM zone 36 north (EPSG:32636), the planar CRS of the East Africa runs.
    pub const UTM_36N: Crs = Crs::Utm { zone: 36, hemisphere: Hemisphere::North };

    /// The UTM zone containing (lon, lat).
    pub fn utm_for(lon: f64, lat: f64) -> Crs {
        let zone = (((lon + 180.0) / 6.0).floor() as i32).clamp(0, 59) + 1;
        let hemisphere = if lat >= 0.0 { Hemisphere::North } else { Hemisphere::South };
        Crs::Utm { zone: zone as u8, hemisphere }
    }

    pub fn is_geographic(self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    /// EPSG code.
    pub fn epsg(self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::Utm { zone, hemisphere: Hemisphere::North } => 32600 + zone as u32,
            Crs::Utm { zone, hemisphere: Hemisphere::South } => 32700 + zone as u32,
        }
    }
}

// ── Tagged geometry ──────────────────────────────────────────────────────────

/// A geometry value together with the CRS its coordinates are expressed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged<G> {
    geometry: G,
    crs: Crs,
}

impl<G> Tagged<G> {
    pub fn new(geometry: G, crs: Crs) -> Self {
        Self { geometry, crs }
    }

    pub fn wgs84(geometry: G) -> Self {
        Self::new(geometry, Crs::Wgs84)
    }

    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn into_inner(self) -> G {
        self.geometry
    }

    /// Apply a CRS-preserving geometric operation (buffer, union, ...).
    pub fn map<H>(self, f: impl FnOnce(G) -> H) -> Tagged<H> {
        Tagged { geometry: f(self.geometry), crs: self.crs }
    }
}

impl<G> Tagged<G>
where
    G: MapCoords<f64, f64, Output = G>,
{
    /// Reproject into `to`. Identity when the CRS already matches.
    pub fn reproject(&self, to: Crs) -> Tagged<G> {
        let from = self.crs;
        let geometry = self.geometry.map_coords(|c| transform(c, from, to));
        Tagged { geometry, crs: to }
    }
}

/// Transform one coordinate between two CRSs, pivoting through WGS84.
pub fn transform(c: Coord<f64>, from: Crs, to: Crs) -> Coord<f64> {
    if from == to {
        return c;
    }
    let (lon, lat) = match from {
        Crs::Wgs84 => (c.x, c.y),
        Crs::Utm { zone, hemisphere } => utm_inverse(c.x, c.y, zone, hemisphere),
    };
    match to {
        Crs::Wgs84 => Coord { x: lon, y: lat },
        Crs::Utm { zone, hemisphere } => {
            let (x, y) = utm_forward(lon, lat, zone, hemisphere);
            Coord { x, y }
        }
    }
}

// ── Transverse Mercator ──────────────────────────────────────────────────────

fn central_meridian_deg(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

fn eccentricity_sq() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

/// Meridional arc length from the equator to latitude `phi` (radians).
fn meridian_arc(phi: f64) -> f64 {
    let e2 = eccentricity_sq();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// (lon, lat) degrees → (easting, northing) metres.
/// Snyder's series; sub-metre within the zone, degrading smoothly outside it.
pub fn utm_forward(lon: f64, lat: f64, zone: u8, hemisphere: Hemisphere) -> (f64, f64) {
    let e2 = eccentricity_sq();
    let ep2 = e2 / (1.0 - e2);
    let phi = lat.to_radians();
    let dlam = (lon - central_meridian_deg(zone)).to_radians();

    let (sin_phi, cos_phi) = phi.sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * cos_phi * cos_phi;
    let a = dlam * cos_phi;
    let m = meridian_arc(phi);

    let x = UTM_K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;
    let mut y = UTM_K0
        * (m + n
            * phi.tan()
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if hemisphere == Hemisphere::South {
        y += UTM_FALSE_NORTHING_SOUTH;
    }
    (x, y)
}

/// (easting, northing) metres → (lon, lat) degrees.
pub fn utm_inverse(x: f64, y: f64, zone: u8, hemisphere: Hemisphere) -> (f64, f64) {
    let e2 = eccentricity_sq();
    let ep2 = e2 / (1.0 - e2);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let northing = match hemisphere {
        Hemisphere::North => y,
        Hemisphere::South => y - UTM_FALSE_NORTHING_SOUTH,
    };

    let m = northing / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    // Footpoint latitude.
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin1, cos1) = phi1.sin_cos();
    let n1 = WGS84_A / (1.0 - e2 * sin1 * sin1).sqrt();
    let t1 = phi1.tan().powi(2);
    let c1 = ep2 * cos1 * cos1;
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
    let d = (x - UTM_FALSE_EASTING) / (n1 * UTM_K0);

    let phi = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);
    let lam = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
            / 120.0)
        / cos1;

    (central_meridian_deg(zone) + lam.to_degrees(), phi.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use geo::{point, Point};

    #[test]
    fn central_meridian_maps_to_false_easting() {
        let (x, y) = utm_forward(33.0, 0.0, 36, Hemisphere::North);
        assert_abs_diff_eq!(x, 500_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn known_point_nairobi() {
        // Nairobi (36.8219E, 1.2921S) in zone 37S: ~ (257_000, 9_857_000).
        let (x, y) = utm_forward(36.8219, -1.2921, 37, Hemisphere::South);
        assert_abs_diff_eq!(x, 257_000.0, epsilon = 1_500.0);
        assert_abs_diff_eq!(y, 9_857_000.0, epsilon = 1_500.0);
    }

    #[test]
    fn roundtrip_within_tolerance() {
        let mut rng_state: u64 = 42;
        for _ in 0..1000 {
            rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let lat = (rng_state as f64 / u64::MAX as f64) * 30.0 - 10.0;
            rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let lon = 33.0 + (rng_state as f64 / u64::MAX as f64) * 6.0 - 3.0;

            let (x, y) = utm_forward(lon, lat, 36, Hemisphere::North);
            let (lon2, lat2) = utm_inverse(x, y, 36, Hemisphere::North);
            assert!((lon - lon2).abs() < 1e-5, "lon {lon} -> {lon2}");
            assert!((lat - lat2).abs() < 1e-5, "lat {lat} -> {lat2}");
        }
    }

    #[test]
    fn reproject_is_pure_and_retags() {
        let p: Tagged<Point<f64>> = Tagged::wgs84(point!(x: 38.0, y: 5.0));
        let planar = p.reproject(Crs::UTM_36N);
        assert_eq!(planar.crs(), Crs::UTM_36N);
        assert_eq!(p.crs(), Crs::Wgs84);
        let back = planar.reproject(Crs::Wgs84);
        assert_abs_diff_eq!(back.geometry().x(), 38.0, epsilon = 1e-5);
        assert_abs_diff_eq!(back.geometry().y(), 5.0, epsilon = 1e-5);
    }

    #[test]
    fn zone_lookup() {
        assert_eq!(Crs::utm_for(36.8, -1.3), Crs::Utm { zone: 37, hemisphere: Hemisphere::South });
        assert_eq!(Crs::utm_for(33.0, 4.0), Crs::UTM_36N);
        assert_eq!(Crs::UTM_36N.epsg(), 32636);
    }
}
