//! Pipeline parameters. Everything the core needs is passed in explicitly
//! at construction; defaults reproduce the East Africa cropland run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use geo::{coord, Rect};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{LocustError, Result};

// ── Constants ────────────────────────────────────────────────────────────────

/// Buffer radius around each swarm observation: 25 km.
pub const DEFAULT_BUFFER_RADIUS_M: f64 = 25_000.0;
/// Segments per quarter circle when approximating a buffer disc.
pub const DEFAULT_QUADRANT_SEGMENTS: usize = 16;

pub const CROPLAND_MEASURE_ID: u32 = 30;
pub const FORAGELAND_MEASURE_ID: u32 = 29;

/// GFSAD30 cropland tiles covering the six countries.
pub const CROPLAND_TILES: [&str; 13] = [
    "N00E30", "S10E40", "S10E30", "S10E20", "N10E50", "N10E40", "N10E30", "N00E50", "N00E40",
    "N00E20", "N20E30", "N20E20", "N10E20",
];

/// Level-2 boundary files (ISO3) loaded by both land-cover runs.
pub const DISTRICT_COUNTRIES: [&str; 6] = ["KEN", "SOM", "ETH", "UGA", "SSD", "SDN"];

/// Lon/lat box around the six district countries.
pub fn east_africa_extent() -> Rect<f64> {
    Rect::new(coord! { x: 20.0, y: -10.0 }, coord! { x: 55.0, y: 25.0 })
}

// ── Measure ──────────────────────────────────────────────────────────────────

/// Measure identifier and fact-id prefix of one land-cover variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureSpec {
    pub measure_id: u32,
    pub fact_prefix: String,
}

impl MeasureSpec {
    pub fn cropland() -> Self {
        Self { measure_id: CROPLAND_MEASURE_ID, fact_prefix: "CROP_LOC_DIS".into() }
    }

    pub fn forageland() -> Self {
        Self { measure_id: FORAGELAND_MEASURE_ID, fact_prefix: "FOR_LOC_DIS".into() }
    }
}

// ── Tile catalog ─────────────────────────────────────────────────────────────

/// One raster tile known to the Raster Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSpec {
    /// Tile-region code, e.g. `N10E40`.
    pub id: String,
    /// Category value of the land cover of interest in this tile.
    /// Falls back to `TileCatalog::default_category`.
    #[serde(default)]
    pub category: Option<u16>,
    /// Explicit file path; otherwise derived from `path_template`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Known lon/lat coverage, used when the header cannot be read and the
    /// id carries no corner.
    #[serde(default)]
    pub extent: Option<Rect<f64>>,
}

/// Tile ids, their per-tile category values and where to find them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileCatalog {
    pub default_category: u16,
    pub tiles: Vec<TileSpec>,
    /// Path with a `{tile}` placeholder, used when a tile has no explicit path.
    #[serde(default)]
    pub path_template: Option<String>,
    /// Degrees covered by one tile; used to place a tile whose header
    /// cannot be read, from the south-west corner encoded in its id.
    #[serde(default = "default_tile_span")]
    pub tile_span_deg: f64,
}

fn default_tile_span() -> f64 {
    10.0
}

impl TileCatalog {
    /// GFSAD30 cropland tiles: cropland is class 2 everywhere except `N00E50`,
    /// whose legend puts it at class 1.
    pub fn cropland() -> Self {
        let tiles = CROPLAND_TILES
            .iter()
            .map(|&id| TileSpec {
                id: id.into(),
                category: (id == "N00E50").then_some(1),
                path: None,
                extent: None,
            })
            .collect();
        Self {
            default_category: 2,
            tiles,
            path_template: Some("cropland/GFSAD30AFCE_2015_{tile}_001_2017261090100.tif".into()),
            tile_span_deg: default_tile_span(),
        }
    }

    /// Single forage land-cover raster over the whole region, forage land
    /// is class 1.
    pub fn forageland() -> Self {
        Self {
            default_category: 1,
            tiles: vec![TileSpec {
                id: "forageland2003".into(),
                category: None,
                path: Some(PathBuf::from("forageland/forageland2003.tif")),
                extent: Some(east_africa_extent()),
            }],
            path_template: None,
            tile_span_deg: default_tile_span(),
        }
    }

    /// Resolve the category value of every tile once.
    pub fn resolve_categories(&self) -> BTreeMap<String, u16> {
        self.tiles
            .iter()
            .map(|t| (t.id.clone(), t.category.unwrap_or(self.default_category)))
            .collect()
    }

    /// File path of `tile`, relative to the store root.
    pub fn path_for(&self, tile: &TileSpec) -> Option<PathBuf> {
        tile.path.clone().or_else(|| {
            self.path_template
                .as_ref()
                .map(|t| PathBuf::from(t.replace("{tile}", &tile.id)))
        })
    }
}

// ── Buffer projection ────────────────────────────────────────────────────────

/// Planar CRS used for buffering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferProjection {
    /// One CRS for every observation.
    Fixed(Crs),
    /// The UTM zone containing each observation.
    LocalUtm,
}

impl fmt::Display for BufferProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferProjection::Fixed(crs) => write!(f, "EPSG:{}", crs.epsg()),
            BufferProjection::LocalUtm => f.write_str("local UTM"),
        }
    }
}

// ── Pipeline config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Observation country codes (two-letter, as reported) to keep.
    pub countries: Vec<String>,
    /// Countries (ISO3) whose districts the overlay runs against.
    pub district_countries: Vec<String>,
    /// Inclusive start of the observation window.
    pub window_start: NaiveDate,
    /// Exclusive end of the window; `None` means the run date.
    pub window_end: Option<NaiveDate>,
    pub buffer_radius_m: f64,
    pub quadrant_segments: usize,
    pub buffer_projection: BufferProjection,
    pub measure: MeasureSpec,
    pub tiles: TileCatalog,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::cropland()
    }
}

impl PipelineConfig {
    pub fn cropland() -> Self {
        Self {
            countries: ["SO", "KE", "ET", "UG"].map(String::from).to_vec(),
            district_countries: DISTRICT_COUNTRIES.map(String::from).to_vec(),
            window_start: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
            window_end: None,
            buffer_radius_m: DEFAULT_BUFFER_RADIUS_M,
            quadrant_segments: DEFAULT_QUADRANT_SEGMENTS,
            buffer_projection: BufferProjection::Fixed(Crs::UTM_36N),
            measure: MeasureSpec::cropland(),
            tiles: TileCatalog::cropland(),
        }
    }

    pub fn forageland() -> Self {
        Self {
            countries: ["SO", "KE", "ET", "UG", "SU", "SS"].map(String::from).to_vec(),
            measure: MeasureSpec::forageland(),
            tiles: TileCatalog::forageland(),
            ..Self::cropland()
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.buffer_radius_m.is_finite() && self.buffer_radius_m > 0.0) {
            return Err(LocustError::InvalidConfig(format!(
                "buffer_radius_m must be positive, got {}",
                self.buffer_radius_m
            )));
        }
        if self.quadrant_segments == 0 {
            return Err(LocustError::InvalidConfig("quadrant_segments must be >= 1".into()));
        }
        if let Some(end) = self.window_end {
            if end <= self.window_start {
                return Err(LocustError::InvalidConfig(format!(
                    "empty date window [{}, {end})",
                    self.window_start
                )));
            }
        }
        if self.measure.fact_prefix.is_empty() {
            return Err(LocustError::InvalidConfig("measure.fact_prefix is empty".into()));
        }
        if let BufferProjection::Fixed(crs) = self.buffer_projection {
            if crs.is_geographic() {
                return Err(LocustError::InvalidConfig(format!(
                    "buffer projection must be planar, got EPSG:{}",
                    crs.epsg()
                )));
            }
        }
        Ok(())
    }

    /// Window end for a run on `today`.
    pub fn window_end_or(&self, today: NaiveDate) -> NaiveDate {
        self.window_end.unwrap_or(today)
    }
}
