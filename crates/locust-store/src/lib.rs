//! Boundary collaborators for the locust impact pipeline: GeoTIFF tiles,
//! JSON geometry and baseline files, delimited fact output.

pub mod error;
pub mod geotiff;
pub mod json;
pub mod sink;

pub use error::{Result, StoreError};
pub use geotiff::{GeoTiffTileStore, TileHeader};
pub use json::{load_baselines, load_districts, load_observations, JsonGeometryStore};
pub use sink::DelimitedFactWriter;
