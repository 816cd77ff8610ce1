//! Error and skip taxonomy for the impact pipeline.
//!
//! `LocustError` is a hard failure of one record or of a collaborator.
//! `DropReason` covers rules that remove a record without being an error;
//! every drop is kept in a `DropAudit` so omissions stay auditable.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocustError {
    /// Missing or unparseable start date on a raw observation.
    #[error("malformed observation {id}: {reason}")]
    MalformedObservation { id: String, reason: String },

    /// A raster tile could not be opened or decoded.
    #[error("raster tile {tile} unavailable: {reason}")]
    RasterUnavailable { tile: String, reason: String },

    /// Raised by a geometry collaborator before the core runs.
    #[error("geometry store: {0}")]
    GeometryStore(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LocustError>;

// ── Drop audit ────────────────────────────────────────────────────────────────

/// Pipeline stage at which a record was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Stage {
    Filter,
    Buffer,
    Overlay,
    Estimate,
    Reconcile,
}

/// Why a record was removed (or, for `BaselineMissing`, flagged).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DropReason {
    CountryNotSelected { country: String },
    OutsideDateWindow { date: String },
    MalformedObservation { reason: String },
    /// Buffering produced no usable polygon.
    DegenerateBuffer,
    /// The fragment histogram holds no pixel of the land cover of interest.
    NoCategoryPixels,
    RasterUnavailable { tile: String, reason: String },
    /// Not a drop: the raw estimate passed through unclamped.
    BaselineMissing,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::CountryNotSelected { country } => {
                write!(f, "country {country} not in allow-list")
            }
            DropReason::OutsideDateWindow { date } => write!(f, "start date {date} outside window"),
            DropReason::MalformedObservation { reason } => write!(f, "malformed: {reason}"),
            DropReason::DegenerateBuffer => write!(f, "buffer produced no polygon"),
            DropReason::NoCategoryPixels => write!(f, "no land-cover pixels of interest"),
            DropReason::RasterUnavailable { tile, reason } => {
                write!(f, "raster {tile} unavailable: {reason}")
            }
            DropReason::BaselineMissing => write!(f, "no baseline, estimate passed through"),
        }
    }
}

/// One audited record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropRecord {
    pub stage: Stage,
    /// Observation id, or `district@YYYY-MM-DD` for fragment-level records.
    pub subject: String,
    pub reason: DropReason,
}

impl DropRecord {
    pub fn new(stage: Stage, subject: impl Into<String>, reason: DropReason) -> Self {
        Self { stage, subject: subject.into(), reason }
    }
}

/// Every record removed or flagged during one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DropAudit {
    pub records: Vec<DropRecord>,
    /// (zone, district) pairs with no overlap. Counted only: the cross
    /// product is large and these are the normal case.
    pub empty_intersections: usize,
}

impl DropAudit {
    pub fn extend(&mut self, records: impl IntoIterator<Item = DropRecord>) {
        self.records.extend(records);
    }

    pub fn count_at(&self, stage: Stage) -> usize {
        self.records.iter().filter(|r| r.stage == stage).count()
    }

    pub fn count_where(&self, pred: impl Fn(&DropReason) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.reason)).count()
    }
}
