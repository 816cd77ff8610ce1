//! JSON loading of observations, district boundaries and baselines.
//!
//! Field names of the source layers (`OBJECTID`, `GID_2`, ...) are accepted
//! alongside the plain ones.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use geo::{Geometry, MultiPolygon};
use locust_core::{District, GeometryStore, LocustError, RawObservation, Tagged};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, StoreError};

/// One district as stored on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct DistrictRecord {
    #[serde(alias = "GID_2")]
    pub id: String,
    #[serde(alias = "GID_0")]
    pub country: String,
    pub geometry: Geometry<f64>,
}

impl TryFrom<DistrictRecord> for District {
    type Error = LocustError;

    fn try_from(r: DistrictRecord) -> std::result::Result<Self, Self::Error> {
        let boundary = match r.geometry {
            Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            Geometry::MultiPolygon(mp) => mp,
            other => {
                return Err(LocustError::GeometryStore(format!(
                    "district {} boundary is not areal: {other:?}",
                    r.id
                )))
            }
        };
        Ok(District { id: r.id, country: r.country, boundary: Tagged::wgs84(boundary) })
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| StoreError::Io { path: path.to_path_buf(), source })
}

pub fn parse_observations(json: &str) -> Result<Vec<RawObservation>> {
    Ok(serde_json::from_str(json)?)
}

pub fn parse_districts(json: &str) -> Result<Vec<District>> {
    let records: Vec<DistrictRecord> = serde_json::from_str(json)?;
    Ok(records.into_iter().map(District::try_from).collect::<std::result::Result<_, _>>()?)
}

/// Baselines as a JSON object of district id → area.
pub fn parse_baselines(json: &str) -> Result<BTreeMap<String, f64>> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_observations(path: impl AsRef<Path>) -> Result<Vec<RawObservation>> {
    parse_observations(&read(path.as_ref())?)
}

pub fn load_districts(path: impl AsRef<Path>) -> Result<Vec<District>> {
    parse_districts(&read(path.as_ref())?)
}

pub fn load_baselines(path: impl AsRef<Path>) -> Result<BTreeMap<String, f64>> {
    parse_baselines(&read(path.as_ref())?)
}

// ── File-backed Geometry Store ───────────────────────────────────────────────

/// Geometry Store reading one district file per country and one
/// observation file.
#[derive(Debug, Clone)]
pub struct JsonGeometryStore {
    root: PathBuf,
    /// File name with a `{country}` placeholder.
    district_template: String,
    observations: PathBuf,
}

impl JsonGeometryStore {
    pub fn new(root: impl Into<PathBuf>, district_template: impl Into<String>, observations: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), district_template: district_template.into(), observations: observations.into() }
    }

    /// Level-2 boundaries named `gadm36_{country}_2.json`.
    pub fn gadm(root: impl Into<PathBuf>, observations: impl Into<PathBuf>) -> Self {
        Self::new(root, "gadm36_{country}_2.json", observations)
    }

    fn district_path(&self, country: &str) -> PathBuf {
        self.root.join(self.district_template.replace("{country}", country))
    }
}

impl GeometryStore for JsonGeometryStore {
    fn load_districts(&self, countries: &[String]) -> locust_core::Result<Vec<District>> {
        let mut all = Vec::new();
        for c in countries {
            let districts = load_districts(self.district_path(c))?;
            debug!(country = %c, districts = districts.len(), "districts loaded");
            all.extend(districts);
        }
        Ok(all)
    }

    fn load_observations(&self) -> locust_core::Result<Vec<RawObservation>> {
        Ok(load_observations(self.root.join(&self.observations))?)
    }
}
