//! Locust-swarm impact on land cover, aggregated per administrative district.
//!
//! Swarm observations are buffered, grouped by calendar month, dissolved
//! into affected zones, intersected with districts and measured against a
//! categorical land-cover raster. The proportional affected area per
//! district and month is capped at the district's baseline and emitted as
//! fact rows.

pub mod buffering;
pub mod config;
pub mod crs;
pub mod dissolve;
pub mod error;
pub mod facts;
pub mod geom;
pub mod observation;
pub mod overlay;
pub mod pipeline;
pub mod raster;
pub mod reconcile;
pub mod sources;
pub mod zonal;

pub use config::{MeasureSpec, PipelineConfig, TileCatalog, TileSpec};
pub use crs::{Crs, Tagged};
pub use error::{DropAudit, DropReason, DropRecord, LocustError, Result, Stage};
pub use facts::{FactRow, FactSink};
pub use observation::RawObservation;
pub use overlay::District;
pub use pipeline::{LocustImpactPipeline, PipelineRun, RunStats};
pub use raster::{CategoricalRaster, GeoTransform, PixelHistogram, PixelWindow, RasterStore, Samples, TileSet};
pub use reconcile::BaselineStore;
pub use sources::{GeometryStore, MemoryGeometryStore};
