//! Pipeline orchestrator: runs every stage from raw observations to fact rows.
//!
//! Stage order:
//!   1. Event Filter
//!   2. Temporal buffering and monthly grouping
//!   3. Cohort dissolve
//!   4. District overlay
//!   5. Zonal estimation
//!   6. Baseline reconciliation
//!   7. Fact synthesis
//!
//! Record-level failures drop the record into the run's `DropAudit`; only a
//! Geometry Store error or an invalid config fails the whole run.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::buffering::{buffer_all, group_by_month, BufferSettings};
use crate::config::PipelineConfig;
use crate::dissolve::dissolve_all;
use crate::error::{DropAudit, Result};
use crate::facts::{synthesize, FactRow, FactSink};
use crate::observation::{filter_observations, DateWindow, RawObservation};
use crate::overlay::{overlay, District};
use crate::raster::RasterStore;
use crate::reconcile::{reconcile, BaselineStore, Reconciliation};
use crate::sources::GeometryStore;
use crate::zonal::estimate_all;

/// Record counts after each stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub raw_observations: usize,
    pub observations: usize,
    pub buffers: usize,
    pub cohorts: usize,
    pub affected_zones: usize,
    pub fragments: usize,
    pub estimates: usize,
    pub clamped: usize,
    pub facts: usize,
}

/// Output of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub facts: Vec<FactRow>,
    pub audit: DropAudit,
    pub stats: RunStats,
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

pub struct LocustImpactPipeline {
    config: PipelineConfig,
}

impl LocustImpactPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn buffer_settings(&self) -> BufferSettings {
        BufferSettings {
            radius_m: self.config.buffer_radius_m,
            quadrant_segments: self.config.quadrant_segments,
            projection: self.config.buffer_projection,
        }
    }

    /// Load inputs from `geometry` and run every stage. `today` closes the
    /// date window when the config leaves its end open.
    pub fn run<G, R, B>(&self, geometry: &G, rasters: &R, baselines: &B, today: NaiveDate) -> Result<PipelineRun>
    where
        G: GeometryStore + ?Sized,
        R: RasterStore + ?Sized,
        B: BaselineStore + ?Sized,
    {
        let districts = geometry.load_districts(&self.config.district_countries)?;
        let raw = geometry.load_observations()?;
        info!(districts = districts.len(), observations = raw.len(), "inputs loaded");
        Ok(self.process(&raw, &districts, rasters, baselines, today))
    }

    /// `run`, then hand the rows to `sink`.
    pub fn run_into<G, R, B, S>(
        &self,
        geometry: &G,
        rasters: &R,
        baselines: &B,
        today: NaiveDate,
        sink: &mut S,
    ) -> Result<PipelineRun>
    where
        G: GeometryStore + ?Sized,
        R: RasterStore + ?Sized,
        B: BaselineStore + ?Sized,
        S: FactSink + ?Sized,
    {
        let run = self.run(geometry, rasters, baselines, today)?;
        sink.write_facts(&run.facts)?;
        Ok(run)
    }

    /// Run every stage over inputs already in memory.
    pub fn process<R, B>(
        &self,
        raw: &[RawObservation],
        districts: &[District],
        rasters: &R,
        baselines: &B,
        today: NaiveDate,
    ) -> PipelineRun
    where
        R: RasterStore + ?Sized,
        B: BaselineStore + ?Sized,
    {
        let cfg = &self.config;
        let mut audit = DropAudit::default();
        let mut stats = RunStats { raw_observations: raw.len(), ..RunStats::default() };

        // ── 1. Event Filter ─────────────────────────────────────────────────
        let window = DateWindow::new(cfg.window_start, cfg.window_end_or(today));
        let filtered = filter_observations(raw, &cfg.countries, window);
        stats.observations = filtered.kept.len();
        info!(
            kept = filtered.kept.len(),
            dropped = filtered.dropped.len(),
            window_start = %window.start,
            window_end = %window.end,
            "event filter"
        );
        audit.extend(filtered.dropped);

        // ── 2. Buffering ────────────────────────────────────────────────────
        let (buffers, degenerate) = buffer_all(&filtered.kept, &self.buffer_settings());
        stats.buffers = buffers.len();
        audit.extend(degenerate);
        let cohorts = group_by_month(buffers);
        stats.cohorts = cohorts.len();
        info!(
            buffers = stats.buffers,
            cohorts = stats.cohorts,
            radius_m = cfg.buffer_radius_m,
            planar = %cfg.buffer_projection,
            "buffering"
        );

        // ── 3. Dissolve ─────────────────────────────────────────────────────
        let zones = dissolve_all(&cohorts);
        stats.affected_zones = zones.len();
        info!(zones = zones.len(), "cohort dissolve");

        // ── 4. Overlay ──────────────────────────────────────────────────────
        let overlaid = overlay(&zones, districts);
        stats.fragments = overlaid.fragments.len();
        audit.empty_intersections += overlaid.empty_pairs;
        info!(
            fragments = overlaid.fragments.len(),
            empty_pairs = overlaid.empty_pairs,
            districts = districts.len(),
            "district overlay"
        );

        // ── 5. Zonal estimation ─────────────────────────────────────────────
        let estimated = estimate_all(&overlaid.fragments, rasters);
        stats.estimates = estimated.estimates.len();
        info!(estimates = estimated.estimates.len(), dropped = estimated.dropped.len(), "zonal estimation");
        audit.extend(estimated.dropped);

        // ── 6. Reconciliation ───────────────────────────────────────────────
        let (reconciled, flagged) = reconcile(estimated.estimates, baselines);
        stats.clamped = reconciled
            .iter()
            .filter(|r| matches!(r.reconciliation, Reconciliation::Clamped { .. }))
            .count();
        info!(clamped = stats.clamped, baseline_missing = flagged.len(), "baseline reconciliation");
        audit.extend(flagged);

        // ── 7. Fact rows ────────────────────────────────────────────────────
        let facts = synthesize(reconciled, &cfg.measure);
        stats.facts = facts.len();
        info!(facts = facts.len(), measure = cfg.measure.measure_id, "fact rows");

        PipelineRun { facts, audit, stats }
    }
}
