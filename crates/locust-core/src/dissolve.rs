//! Cohort Dissolver: union each cohort's buffers and explode the union into
//! disjoint affected zones, tagged with the cohort's first day of month.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use geo::{MultiPolygon, Polygon};

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::buffering::{CohortKey, TemporalCohort};
use crate::crs::{Crs, Tagged};
use crate::geom;

/// One disjoint polygon of a cohort's dissolved buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct AffectedZone {
    pub cohort: CohortKey,
    /// First day of the cohort month.
    pub date: NaiveDate,
    pub geometry: Tagged<Polygon<f64>>,
}

impl AffectedZone {
    pub fn as_multi(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![self.geometry.geometry().clone()])
    }
}

/// Union a set of same-cohort polygons and explode the result.
fn dissolve_parts(key: CohortKey, crs: Crs, parts: Vec<MultiPolygon<f64>>) -> Vec<AffectedZone> {
    let date = key.representative_date();
    geom::explode(geom::union_all(parts))
        .into_iter()
        .map(|p| AffectedZone { cohort: key, date, geometry: Tagged::new(p, crs) })
        .collect()
}

/// Dissolve one cohort. Buffers are brought into the CRS of the first one.
pub fn dissolve_cohort(cohort: &TemporalCohort) -> Vec<AffectedZone> {
    let Some(first) = cohort.zones.first() else {
        return Vec::new();
    };
    let crs = first.geometry.crs();
    let parts = cohort
        .zones
        .iter()
        .map(|z| z.geometry.reproject(crs).into_inner())
        .collect();
    dissolve_parts(cohort.key, crs, parts)
}

/// Dissolve every cohort independently.
pub fn dissolve_all(cohorts: &[TemporalCohort]) -> Vec<AffectedZone> {
    #[cfg(feature = "threading")]
    let per_cohort: Vec<Vec<AffectedZone>> = cohorts.par_iter().map(dissolve_cohort).collect();
    #[cfg(not(feature = "threading"))]
    let per_cohort: Vec<Vec<AffectedZone>> = cohorts.iter().map(dissolve_cohort).collect();

    per_cohort.into_iter().flatten().collect()
}

/// Re-dissolve existing zones, cohort by cohort. A no-op on dissolver output.
pub fn redissolve(zones: &[AffectedZone]) -> Vec<AffectedZone> {
    let mut by_key: BTreeMap<CohortKey, (Crs, Vec<MultiPolygon<f64>>)> = BTreeMap::new();
    for z in zones {
        let entry = by_key.entry(z.cohort).or_insert_with(|| (z.geometry.crs(), Vec::new()));
        let crs = entry.0;
        entry.1.push(MultiPolygon::new(vec![z.geometry.reproject(crs).into_inner()]));
    }
    by_key
        .into_iter()
        .flat_map(|(key, (crs, parts))| dissolve_parts(key, crs, parts))
        .collect()
}
