//! Swarm observations and the Event Filter.
//!
//! Raw records arrive with their start timestamp as text. The filter keeps
//! records from allowed countries whose start date falls in `[start, end)`,
//! projecting them to (id, start date, geometry).

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use geo::Geometry;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::crs::Tagged;
use crate::error::{DropReason, DropRecord, LocustError, Stage};

/// One swarm report as delivered by the observation source (WGS84).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    #[serde(alias = "OBJECTID", deserialize_with = "text_or_number")]
    pub id: String,
    #[serde(alias = "COUNTRYID")]
    pub country: String,
    #[serde(alias = "STARTDATE", default)]
    pub start_date: Option<String>,
    pub geometry: Geometry<f64>,
}

/// Source layers number their records; identifiers are kept as text.
fn text_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
        Float(f64),
    }
    Ok(match Id::deserialize(d)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
        Id::Float(f) => f.to_string(),
    })
}

/// An in-scope observation with a parsed start date.
#[derive(Debug, Clone, PartialEq)]
pub struct SwarmObservation {
    pub id: String,
    pub start: NaiveDate,
    pub geometry: Tagged<Geometry<f64>>,
}

/// Half-open date window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, d: NaiveDate) -> bool {
        d >= self.start && d < self.end
    }
}

/// Result of filtering one batch.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub kept: Vec<SwarmObservation>,
    pub dropped: Vec<DropRecord>,
}

// ── Date parsing ─────────────────────────────────────────────────────────────

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an observation start timestamp down to its calendar date.
pub fn parse_start_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(|dt| dt.date())
        })
}

/// Parse the start date of `obs`, or the error that rejects it.
pub fn start_date_of(obs: &RawObservation) -> Result<NaiveDate, LocustError> {
    let raw = obs.start_date.as_deref().ok_or_else(|| LocustError::MalformedObservation {
        id: obs.id.clone(),
        reason: "missing start date".into(),
    })?;
    parse_start_date(raw).ok_or_else(|| LocustError::MalformedObservation {
        id: obs.id.clone(),
        reason: format!("unparseable start date {raw:?}"),
    })
}

// ── Event Filter ─────────────────────────────────────────────────────────────

/// Select observations by country allow-list and date window.
///
/// Country is checked first, so out-of-scope records are never reported as
/// malformed. Malformed in-scope records are dropped with a warning.
pub fn filter_observations(
    raw: &[RawObservation],
    countries: &[String],
    window: DateWindow,
) -> FilterOutcome {
    let mut out = FilterOutcome::default();
    for obs in raw {
        if !countries.iter().any(|c| c == &obs.country) {
            out.dropped.push(DropRecord::new(
                Stage::Filter,
                &obs.id,
                DropReason::CountryNotSelected { country: obs.country.clone() },
            ));
            continue;
        }
        let start = match start_date_of(obs) {
            Ok(d) => d,
            Err(e) => {
                warn!(observation = %obs.id, "{e}");
                let reason = match e {
                    LocustError::MalformedObservation { reason, .. } => reason,
                    other => other.to_string(),
                };
                out.dropped.push(DropRecord::new(
                    Stage::Filter,
                    &obs.id,
                    DropReason::MalformedObservation { reason },
                ));
                continue;
            }
        };
        if !window.contains(start) {
            debug!(observation = %obs.id, %start, "outside date window");
            out.dropped.push(DropRecord::new(
                Stage::Filter,
                &obs.id,
                DropReason::OutsideDateWindow { date: start.to_string() },
            ));
            continue;
        }
        out.kept.push(SwarmObservation {
            id: obs.id.clone(),
            start,
            geometry: Tagged::wgs84(obs.geometry.clone()),
        });
    }
    out
}
