//! Fact Row Synthesizer and the output sink seam.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::MeasureSpec;
use crate::error::Result;
use crate::reconcile::ReconciledEstimate;

/// One row of the downstream fact table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    #[serde(rename = "factID")]
    pub fact_id: String,
    #[serde(rename = "measureID")]
    pub measure_id: u32,
    /// `YYYYMMDD`.
    #[serde(rename = "dateID")]
    pub date_id: u32,
    /// District GID.
    #[serde(rename = "locationID")]
    pub location_id: String,
    pub value: f64,
}

/// `YYYYMMDD` integer of `date`.
pub fn date_id(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Emit one fact row per reconciled estimate, ordered by (date, district).
/// Fact ids are the measure prefix plus a running index.
pub fn synthesize(mut estimates: Vec<ReconciledEstimate>, measure: &MeasureSpec) -> Vec<FactRow> {
    estimates.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.district_id.cmp(&b.district_id)));
    estimates
        .into_iter()
        .enumerate()
        .map(|(i, e)| FactRow {
            fact_id: format!("{}{i}", measure.fact_prefix),
            measure_id: measure.measure_id,
            date_id: date_id(e.date),
            location_id: e.district_id,
            value: e.value,
        })
        .collect()
}

/// Destination for emitted fact rows.
pub trait FactSink {
    fn write_facts(&mut self, rows: &[FactRow]) -> Result<()>;
}

impl FactSink for Vec<FactRow> {
    fn write_facts(&mut self, rows: &[FactRow]) -> Result<()> {
        self.extend_from_slice(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Reconciliation;
    use std::collections::HashSet;

    fn reconciled(district: &str, y: i32, m: u32, value: f64) -> ReconciledEstimate {
        ReconciledEstimate {
            district_id: district.into(),
            date: NaiveDate::from_ymd_opt(y, m, 1).unwrap(),
            value,
            reconciliation: Reconciliation::WithinBaseline,
        }
    }

    #[test]
    fn date_id_is_yyyymmdd() {
        assert_eq!(date_id(NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()), 20200301);
        assert_eq!(date_id(NaiveDate::from_ymd_opt(2019, 12, 31).unwrap()), 20191231);
    }

    #[test]
    fn rows_are_ordered_and_numbered() {
        let rows = synthesize(
            vec![
                reconciled("KEN.2_1", 2020, 4, 3.0),
                reconciled("KEN.1_1", 2020, 4, 2.0),
                reconciled("SOM.1_1", 2020, 3, 1.0),
            ],
            &MeasureSpec::cropland(),
        );
        let ids: Vec<&str> = rows.iter().map(|r| r.fact_id.as_str()).collect();
        assert_eq!(ids, ["CROP_LOC_DIS0", "CROP_LOC_DIS1", "CROP_LOC_DIS2"]);
        let locs: Vec<&str> = rows.iter().map(|r| r.location_id.as_str()).collect();
        assert_eq!(locs, ["SOM.1_1", "KEN.1_1", "KEN.2_1"]);
        assert_eq!(rows[0].date_id, 20200301);
        assert!(rows.iter().all(|r| r.measure_id == 30));
    }

    #[test]
    fn forageland_measure() {
        let rows = synthesize(vec![reconciled("ETH.1_1", 2020, 1, 1.0)], &MeasureSpec::forageland());
        assert_eq!(rows[0].fact_id, "FOR_LOC_DIS0");
        assert_eq!(rows[0].measure_id, 29);
    }

    #[test]
    fn fact_ids_are_unique() {
        let input: Vec<_> = (0..50).map(|i| reconciled("KEN.1_1", 2020, 1 + i % 12, i as f64)).collect();
        let rows = synthesize(input, &MeasureSpec::cropland());
        let ids: HashSet<&str> = rows.iter().map(|r| r.fact_id.as_str()).collect();
        assert_eq!(ids.len(), rows.len());
    }

    #[test]
    fn serializes_with_table_column_names() {
        let rows = synthesize(vec![reconciled("KEN.1_1", 2020, 3, 1.5)], &MeasureSpec::cropland());
        let v = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(v["factID"], "CROP_LOC_DIS0");
        assert_eq!(v["dateID"], 20200301);
        assert_eq!(v["locationID"], "KEN.1_1");
    }

    #[test]
    fn vec_sink_collects_rows() {
        let rows = synthesize(vec![reconciled("KEN.1_1", 2020, 3, 1.5)], &MeasureSpec::cropland());
        let mut sink: Vec<FactRow> = Vec::new();
        sink.write_facts(&rows).unwrap();
        assert_eq!(sink, rows);
    }
}
