//! Geometry Store seam: where districts and raw observations come from.

use std::collections::BTreeMap;

use crate::error::{LocustError, Result};
use crate::observation::RawObservation;
use crate::overlay::District;

pub trait GeometryStore {
    /// Districts of every country in `countries`, concatenated in that order.
    fn load_districts(&self, countries: &[String]) -> Result<Vec<District>>;

    fn load_observations(&self) -> Result<Vec<RawObservation>>;
}

/// Geometry Store over values already in memory, districts keyed by country.
#[derive(Debug, Clone, Default)]
pub struct MemoryGeometryStore {
    districts: BTreeMap<String, Vec<District>>,
    observations: Vec<RawObservation>,
}

impl MemoryGeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add districts, grouped by their own country code.
    pub fn with_districts(mut self, districts: impl IntoIterator<Item = District>) -> Self {
        for d in districts {
            self.districts.entry(d.country.clone()).or_default().push(d);
        }
        self
    }

    pub fn with_observations(mut self, observations: impl IntoIterator<Item = RawObservation>) -> Self {
        self.observations.extend(observations);
        self
    }
}

impl GeometryStore for MemoryGeometryStore {
    fn load_districts(&self, countries: &[String]) -> Result<Vec<District>> {
        countries.iter().try_fold(Vec::new(), |mut all, c| {
            let districts = self
                .districts
                .get(c)
                .ok_or_else(|| LocustError::GeometryStore(format!("no districts for country {c}")))?;
            all.extend(districts.iter().cloned());
            Ok(all)
        })
    }

    fn load_observations(&self) -> Result<Vec<RawObservation>> {
        Ok(self.observations.clone())
    }
}
