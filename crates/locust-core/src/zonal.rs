//! Zonal Estimator: proportional affected land-cover area per fragment.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error};

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::crs::Crs;
use crate::error::{DropReason, DropRecord, LocustError, Stage};
use crate::geom;
use crate::overlay::AffectedZoneFragment;
use crate::raster::RasterStore;

/// Estimated land-cover area of one fragment, with the counts behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZonalEstimate {
    pub district_id: String,
    pub date: NaiveDate,
    /// Pixels of the land cover of interest under the fragment.
    pub category_pixels: u64,
    /// Every sampled (non-nodata) pixel under the fragment.
    pub total_pixels: u64,
    /// Fragment area, degrees².
    pub fragment_area: f64,
    /// `category_pixels * fragment_area / total_pixels`, degrees².
    pub estimated_area: f64,
}

/// Result of estimating a batch of fragments.
#[derive(Debug, Default)]
pub struct EstimateOutcome {
    pub estimates: Vec<ZonalEstimate>,
    pub dropped: Vec<DropRecord>,
}

/// Estimate one fragment, or the reason it yields nothing.
///
/// Every tile under the fragment bounding box contributes. Category pixels
/// are counted with each tile's own category value; totals are summed.
pub fn estimate_fragment<S: RasterStore + ?Sized>(
    fragment: &AffectedZoneFragment,
    store: &S,
) -> Result<ZonalEstimate, DropReason> {
    let geometry = fragment.geometry.reproject(Crs::Wgs84).into_inner();
    let Some(bbox) = geom::bbox(&geometry) else {
        return Err(DropReason::NoCategoryPixels);
    };

    let mut category_pixels = 0u64;
    let mut total_pixels = 0u64;
    for tile in store.tiles_for(&bbox) {
        let hist = store.pixel_histogram(&tile, &geometry).map_err(|e| match e {
            LocustError::RasterUnavailable { tile, reason } => DropReason::RasterUnavailable { tile, reason },
            other => DropReason::RasterUnavailable { tile: tile.clone(), reason: other.to_string() },
        })?;
        if let Some(category) = store.category_of_interest(&tile) {
            category_pixels += hist.count_of(category);
        }
        total_pixels += hist.total;
    }

    if category_pixels == 0 || total_pixels == 0 {
        return Err(DropReason::NoCategoryPixels);
    }
    let estimated_area = category_pixels as f64 * fragment.area / total_pixels as f64;
    Ok(ZonalEstimate {
        district_id: fragment.district_id.clone(),
        date: fragment.date,
        category_pixels,
        total_pixels,
        fragment_area: fragment.area,
        estimated_area,
    })
}

/// Estimate every fragment. Fragments without evidence are dropped and
/// audited; unreadable rasters are surfaced at error level.
pub fn estimate_all<S: RasterStore + ?Sized>(
    fragments: &[AffectedZoneFragment],
    store: &S,
) -> EstimateOutcome {
    let run = |f: &AffectedZoneFragment| estimate_fragment(f, store).map_err(|reason| (f.subject(), reason));

    #[cfg(feature = "threading")]
    let results: Vec<Result<ZonalEstimate, (String, DropReason)>> = fragments.par_iter().map(run).collect();
    #[cfg(not(feature = "threading"))]
    let results: Vec<Result<ZonalEstimate, (String, DropReason)>> = fragments.iter().map(run).collect();

    results.into_iter().fold(EstimateOutcome::default(), |mut acc, r| {
        match r {
            Ok(e) => acc.estimates.push(e),
            Err((subject, reason)) => {
                match &reason {
                    DropReason::RasterUnavailable { .. } => error!(fragment = %subject, "{reason}"),
                    _ => debug!(fragment = %subject, "{reason}"),
                }
                acc.dropped.push(DropRecord::new(Stage::Estimate, subject, reason));
            }
        }
        acc
    })
}
