//! Baseline Reconciler: cap each estimate at its district's baseline area.
//!
//! The baseline join is a left join with an explicit branch per outcome, so
//! "no baseline" and "baseline of zero" stay distinguishable.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DropReason, DropRecord, Stage};
use crate::zonal::ZonalEstimate;

/// Baseline land-cover area per district id, in the same units as
/// fragment areas.
pub trait BaselineStore: Sync {
    fn baseline(&self, district_id: &str) -> Option<f64>;
}

impl<S: BuildHasher + Sync> BaselineStore for HashMap<String, f64, S> {
    fn baseline(&self, district_id: &str) -> Option<f64> {
        self.get(district_id).copied()
    }
}

impl BaselineStore for BTreeMap<String, f64> {
    fn baseline(&self, district_id: &str) -> Option<f64> {
        self.get(district_id).copied()
    }
}

/// How an estimate related to its baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Reconciliation {
    WithinBaseline,
    Clamped { raw: f64, baseline: f64 },
    /// No baseline for the district: the raw estimate passed through.
    BaselineMissing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledEstimate {
    pub district_id: String,
    pub date: NaiveDate,
    pub value: f64,
    pub reconciliation: Reconciliation,
}

/// Apply the baseline cap to one raw estimate. The value is never negative.
pub fn clamp_to_baseline(raw: f64, baseline: Option<f64>) -> (f64, Reconciliation) {
    let raw = raw.max(0.0);
    match baseline {
        None => (raw, Reconciliation::BaselineMissing),
        Some(b) => {
            let b = b.max(0.0);
            if raw > b {
                (b, Reconciliation::Clamped { raw, baseline: b })
            } else {
                (raw, Reconciliation::WithinBaseline)
            }
        }
    }
}

/// Reconcile every estimate against `baselines`. Missing baselines are
/// logged and audited; nothing is removed.
pub fn reconcile<B: BaselineStore + ?Sized>(
    estimates: Vec<ZonalEstimate>,
    baselines: &B,
) -> (Vec<ReconciledEstimate>, Vec<DropRecord>) {
    let mut flagged = Vec::new();
    let reconciled = estimates
        .into_iter()
        .map(|e| {
            let (value, reconciliation) = clamp_to_baseline(e.estimated_area, baselines.baseline(&e.district_id));
            match reconciliation {
                Reconciliation::BaselineMissing => {
                    warn!(district = %e.district_id, date = %e.date, "no baseline, estimate passed through");
                    flagged.push(DropRecord::new(
                        Stage::Reconcile,
                        format!("{}@{}", e.district_id, e.date),
                        DropReason::BaselineMissing,
                    ));
                }
                Reconciliation::Clamped { raw, baseline } => {
                    debug!(district = %e.district_id, date = %e.date, raw, baseline, "clamped to baseline");
                }
                Reconciliation::WithinBaseline => {}
            }
            ReconciledEstimate { district_id: e.district_id, date: e.date, value, reconciliation }
        })
        .collect();
    (reconciled, flagged)
}
