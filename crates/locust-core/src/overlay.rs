//! District Overlay Engine: intersect affected zones with district
//! boundaries, one fragment per overlapping (zone, district) pair.

use chrono::NaiveDate;
use geo::{Area, BooleanOps, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::buffering::CohortKey;
use crate::crs::Tagged;
use crate::dissolve::AffectedZone;
use crate::geom::{self, AREA_EPSILON};

/// Administrative district (GADM level 2). Static reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct District {
    /// GID, e.g. `KEN.1.2_1`.
    pub id: String,
    /// ISO3 country code.
    pub country: String,
    pub boundary: Tagged<MultiPolygon<f64>>,
}

/// Intersection of one affected zone with one district.
#[derive(Debug, Clone)]
pub struct AffectedZoneFragment {
    pub district_id: String,
    pub cohort: CohortKey,
    pub date: NaiveDate,
    pub geometry: Tagged<MultiPolygon<f64>>,
    /// Area in the storage CRS (degrees²), comparable with the baseline.
    pub area: f64,
}

impl AffectedZoneFragment {
    /// `district@date`, the subject used in audit records.
    pub fn subject(&self) -> String {
        format!("{}@{}", self.district_id, self.date)
    }
}

/// Result of one overlay pass.
#[derive(Debug, Default)]
pub struct OverlayOutcome {
    pub fragments: Vec<AffectedZoneFragment>,
    /// Pairs that produced no fragment.
    pub empty_pairs: usize,
}

struct IndexedDistrict<'a> {
    district: &'a District,
    bbox: Option<Rect<f64>>,
}

/// Intersect one zone with one district. `None` when they do not overlap.
pub fn intersect(zone: &AffectedZone, district: &District) -> Option<AffectedZoneFragment> {
    let crs = district.boundary.crs();
    let zone_geom = Tagged::new(zone.as_multi(), zone.geometry.crs()).reproject(crs);
    let shared = zone_geom.geometry().intersection(district.boundary.geometry());
    let area = shared.unsigned_area();
    if shared.0.is_empty() || area <= AREA_EPSILON {
        return None;
    }
    Some(AffectedZoneFragment {
        district_id: district.id.clone(),
        cohort: zone.cohort,
        date: zone.date,
        geometry: Tagged::new(shared, crs),
        area,
    })
}

fn overlay_zone(zone: &AffectedZone, districts: &[IndexedDistrict<'_>]) -> (Vec<AffectedZoneFragment>, usize) {
    let zone_bbox = geom::bbox(&zone.as_multi());
    let mut fragments = Vec::new();
    let mut empty = 0usize;
    for d in districts {
        let candidate = match (&zone_bbox, &d.bbox) {
            (Some(a), Some(b)) => geom::rects_intersect(a, b),
            _ => false,
        };
        match candidate.then(|| intersect(zone, d.district)).flatten() {
            Some(f) => fragments.push(f),
            None => empty += 1,
        }
    }
    (fragments, empty)
}

/// Overlay every zone with every district.
pub fn overlay(zones: &[AffectedZone], districts: &[District]) -> OverlayOutcome {
    let indexed: Vec<IndexedDistrict<'_>> = districts
        .iter()
        .map(|d| IndexedDistrict { district: d, bbox: geom::bbox(d.boundary.geometry()) })
        .collect();

    #[cfg(feature = "threading")]
    let per_zone: Vec<(Vec<AffectedZoneFragment>, usize)> =
        zones.par_iter().map(|z| overlay_zone(z, &indexed)).collect();
    #[cfg(not(feature = "threading"))]
    let per_zone: Vec<(Vec<AffectedZoneFragment>, usize)> =
        zones.iter().map(|z| overlay_zone(z, &indexed)).collect();

    per_zone.into_iter().fold(OverlayOutcome::default(), |mut acc, (frags, empty)| {
        acc.fragments.extend(frags);
        acc.empty_pairs += empty;
        acc
    })
}
