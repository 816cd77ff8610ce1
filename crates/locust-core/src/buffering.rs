//! Temporal Buffering Engine: buffer each observation in a planar CRS and
//! group the buffers into (month, year) cohorts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use geo::{Area, Centroid, Coord, CoordsIter, Geometry, MultiPolygon};
use tracing::debug;

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::config::BufferProjection;
use crate::crs::{Crs, Tagged};
use crate::error::{DropReason, DropRecord, Stage};
use crate::geom::{self, AREA_EPSILON};
use crate::observation::SwarmObservation;

/// Buffer parameters resolved from the pipeline config.
#[derive(Debug, Clone, Copy)]
pub struct BufferSettings {
    pub radius_m: f64,
    pub quadrant_segments: usize,
    pub projection: BufferProjection,
}

/// One observation expanded by the buffer radius.
#[derive(Debug, Clone)]
pub struct BufferZone {
    pub observation_id: String,
    pub start: NaiveDate,
    /// Buffer polygon in the storage CRS.
    pub geometry: Tagged<MultiPolygon<f64>>,
    /// Area in the planar CRS, m².
    pub area_m: f64,
    /// Area in the storage CRS, degrees².
    pub area_d: f64,
}

// ── Cohort key ───────────────────────────────────────────────────────────────

/// Calendar (year, month) bucket. Ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CohortKey {
    pub year: i32,
    pub month: u32,
}

impl CohortKey {
    pub fn of(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    /// First day of the month: the date every zone of the cohort is tagged with.
    pub fn representative_date(self) -> NaiveDate {
        // year/month come from a valid NaiveDate, so day 1 always exists.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }
}

impl fmt::Display for CohortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Buffers sharing one cohort key.
#[derive(Debug, Clone)]
pub struct TemporalCohort {
    pub key: CohortKey,
    pub zones: Vec<BufferZone>,
}

// ── Buffering ────────────────────────────────────────────────────────────────

fn planar_crs_for(obs: &SwarmObservation, projection: BufferProjection) -> Crs {
    match projection {
        BufferProjection::Fixed(crs) => crs,
        BufferProjection::LocalUtm => {
            let g = obs.geometry.geometry();
            let anchor = g
                .centroid()
                .map(|p| p.0)
                .or_else(|| g.coords_iter().next())
                .unwrap_or(Coord { x: 0.0, y: 0.0 });
            Crs::utm_for(anchor.x, anchor.y)
        }
    }
}

/// Buffer one observation: storage → planar, buffer, measure, planar → storage.
pub fn buffer_observation(obs: &SwarmObservation, settings: &BufferSettings) -> Option<BufferZone> {
    let planar = planar_crs_for(obs, settings.projection);
    let projected: Tagged<Geometry<f64>> = obs.geometry.reproject(planar);
    let buffered = projected.map(|g| geom::buffer(&g, settings.radius_m, settings.quadrant_segments));
    let area_m = buffered.geometry().unsigned_area();
    if buffered.geometry().0.is_empty() || area_m <= AREA_EPSILON {
        return None;
    }
    let storage = buffered.reproject(obs.geometry.crs());
    let area_d = storage.geometry().unsigned_area();
    Some(BufferZone {
        observation_id: obs.id.clone(),
        start: obs.start,
        geometry: storage,
        area_m,
        area_d,
    })
}

/// Buffer every observation. Observations whose buffer is empty are dropped.
pub fn buffer_all(
    observations: &[SwarmObservation],
    settings: &BufferSettings,
) -> (Vec<BufferZone>, Vec<DropRecord>) {
    let run = |obs: &SwarmObservation| buffer_observation(obs, settings).ok_or_else(|| obs.id.clone());

    #[cfg(feature = "threading")]
    let results: Vec<Result<BufferZone, String>> = observations.par_iter().map(run).collect();
    #[cfg(not(feature = "threading"))]
    let results: Vec<Result<BufferZone, String>> = observations.iter().map(run).collect();

    let mut zones = Vec::with_capacity(results.len());
    let mut dropped = Vec::new();
    for r in results {
        match r {
            Ok(z) => zones.push(z),
            Err(id) => {
                debug!(observation = %id, "degenerate buffer");
                dropped.push(DropRecord::new(Stage::Buffer, id, DropReason::DegenerateBuffer));
            }
        }
    }
    (zones, dropped)
}

/// Group buffers by the calendar month of their observation's start date.
/// Geometry plays no part in the key.
pub fn group_by_month(zones: Vec<BufferZone>) -> Vec<TemporalCohort> {
    let mut by_key: BTreeMap<CohortKey, Vec<BufferZone>> = BTreeMap::new();
    for z in zones {
        by_key.entry(CohortKey::of(z.start)).or_default().push(z);
    }
    by_key
        .into_iter()
        .map(|(key, zones)| TemporalCohort { key, zones })
        .collect()
}
