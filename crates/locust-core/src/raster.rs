//! Categorical land-cover rasters and the Raster Store seam.
//!
//! A raster is row-major, row 0 at the north edge, georeferenced by a
//! north-up affine transform in the storage CRS. Zonal statistics sample a
//! pixel when its centre lies inside the polygon (even-odd over every ring);
//! nodata pixels are never counted.

use std::collections::BTreeMap;

use geo::{Coord, LineString, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

use crate::config::TileCatalog;
use crate::error::{LocustError, Result};
use crate::geom;

// ── Georeferencing ───────────────────────────────────────────────────────────

/// North-up pixel → world transform. `origin` is the outer corner of the
/// top-left pixel; `pixel_height` is positive and rows run south.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// World-space extent of a `width`×`height` grid.
    pub fn extent(&self, width: usize, height: usize) -> Rect<f64> {
        Rect::new(
            Coord { x: self.origin_x, y: self.origin_y - height as f64 * self.pixel_height },
            Coord { x: self.origin_x + width as f64 * self.pixel_width, y: self.origin_y },
        )
    }

    #[inline]
    pub fn pixel_center(&self, col: usize, row: usize) -> Coord<f64> {
        Coord {
            x: self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            y: self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        }
    }

    /// Transform of the sub-grid whose top-left pixel is (`row`, `col`).
    pub fn offset(&self, row: usize, col: usize) -> GeoTransform {
        GeoTransform {
            origin_x: self.origin_x + col as f64 * self.pixel_width,
            origin_y: self.origin_y - row as f64 * self.pixel_height,
            ..*self
        }
    }

    /// Pixels of a `width`×`height` grid that `bbox` can reach, padded by one
    /// pixel on every side. `None` when the box misses the grid.
    pub fn window(&self, bbox: &Rect<f64>, width: usize, height: usize) -> Option<PixelWindow> {
        let clamp = |v: f64, hi: usize| v.clamp(0.0, hi as f64) as usize;
        let w = PixelWindow {
            row0: clamp(((self.origin_y - bbox.max().y) / self.pixel_height).floor() - 1.0, height),
            row1: clamp(((self.origin_y - bbox.min().y) / self.pixel_height).ceil() + 1.0, height),
            col0: clamp(((bbox.min().x - self.origin_x) / self.pixel_width).floor() - 1.0, width),
            col1: clamp(((bbox.max().x - self.origin_x) / self.pixel_width).ceil() + 1.0, width),
        };
        (w.row1 > w.row0 && w.col1 > w.col0).then_some(w)
    }
}

/// Half-open row and column range of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub row0: usize,
    pub row1: usize,
    pub col0: usize,
    pub col1: usize,
}

impl PixelWindow {
    pub fn full(width: usize, height: usize) -> Self {
        Self { row0: 0, row1: height, col0: 0, col1: width }
    }

    pub fn width(&self) -> usize {
        self.col1 - self.col0
    }

    pub fn height(&self) -> usize {
        self.row1 - self.row0
    }
}

// ── Histogram ────────────────────────────────────────────────────────────────

/// Category value → sampled pixel count, plus the total of sampled pixels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PixelHistogram {
    pub counts: BTreeMap<u16, u64>,
    pub total: u64,
}

impl PixelHistogram {
    /// Pixels of `category`; zero when the category never occurs.
    pub fn count_of(&self, category: u16) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn add(&mut self, value: u16, n: u64) {
        *self.counts.entry(value).or_insert(0) += n;
        self.total += n;
    }
}

fn tally<T: Copy + Into<u16>>(hist: &mut PixelHistogram, values: &[T], nodata: Option<u16>) {
    for &v in values {
        let v = v.into();
        if nodata != Some(v) {
            hist.add(v, 1);
        }
    }
}

// ── Categorical raster ───────────────────────────────────────────────────────

/// Category values at the width they were stored with.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> u16 {
        match self {
            Samples::U8(v) => u16::from(v[i]),
            Samples::U16(v) => v[i],
        }
    }
}

impl From<Vec<u8>> for Samples {
    fn from(v: Vec<u8>) -> Self {
        Samples::U8(v)
    }
}

impl From<Vec<u16>> for Samples {
    fn from(v: Vec<u16>) -> Self {
        Samples::U16(v)
    }
}

/// A decoded land-cover grid: a whole tile, or the window of one a
/// fragment reaches.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalRaster {
    pub tile_id: String,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    /// Row-major category values, row 0 = north.
    pub data: Samples,
    pub nodata: Option<u16>,
}

impl CategoricalRaster {
    pub fn new(
        tile_id: impl Into<String>,
        transform: GeoTransform,
        width: usize,
        height: usize,
        data: impl Into<Samples>,
        nodata: Option<u16>,
    ) -> Result<Self> {
        let tile_id = tile_id.into();
        let data = data.into();
        if data.len() != width * height {
            return Err(LocustError::RasterUnavailable {
                tile: tile_id,
                reason: format!("{} values for a {width}x{height} grid", data.len()),
            });
        }
        if !(transform.pixel_width > 0.0 && transform.pixel_height > 0.0) {
            return Err(LocustError::RasterUnavailable {
                tile: tile_id,
                reason: "non-positive pixel size".into(),
            });
        }
        Ok(Self { tile_id, transform, width, height, data, nodata })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u16 {
        self.data.get(row * self.width + col)
    }

    /// World-space extent of the whole grid.
    pub fn extent(&self) -> Rect<f64> {
        self.transform.extent(self.width, self.height)
    }

    /// Histogram of the pixels whose centre falls inside `geometry`.
    ///
    /// Scanline over pixel-centre rows: each ring edge crossing the row is
    /// collected with the half-open rule `(y1 <= y) != (y2 <= y)`, crossings
    /// are sorted and consecutive pairs bound the inside spans.
    pub fn histogram(&self, geometry: &MultiPolygon<f64>) -> PixelHistogram {
        let mut hist = PixelHistogram::default();
        let Some(bbox) = geom::bbox(geometry) else {
            return hist;
        };
        if !geom::rects_intersect(&bbox, &self.extent()) {
            return hist;
        }

        let t = self.transform;
        let rings: Vec<&LineString<f64>> = geometry
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
            .collect();

        let row_lo = ((t.origin_y - bbox.max().y) / t.pixel_height - 0.5).ceil().max(0.0) as usize;
        let row_hi = ((t.origin_y - bbox.min().y) / t.pixel_height - 0.5).floor();
        if row_hi < 0.0 {
            return hist;
        }
        let row_hi = (row_hi as usize).min(self.height.saturating_sub(1));

        let mut crossings: Vec<f64> = Vec::new();
        for row in row_lo..=row_hi {
            if row >= self.height {
                break;
            }
            let y = t.origin_y - (row as f64 + 0.5) * t.pixel_height;
            crossings.clear();
            for ring in &rings {
                for seg in ring.lines() {
                    let (a, b) = (seg.start, seg.end);
                    if (a.y <= y) != (b.y <= y) {
                        crossings.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
                    }
                }
            }
            crossings.sort_by(f64::total_cmp);

            for span in crossings.chunks_exact(2) {
                let c_start = ((span[0] - t.origin_x) / t.pixel_width - 0.5).ceil().max(0.0);
                let c_end = ((span[1] - t.origin_x) / t.pixel_width - 0.5).ceil().min(self.width as f64);
                if c_end <= c_start {
                    continue;
                }
                let span = row * self.width + c_start as usize..row * self.width + c_end as usize;
                match &self.data {
                    Samples::U8(v) => tally(&mut hist, &v[span], self.nodata),
                    Samples::U16(v) => tally(&mut hist, &v[span], self.nodata),
                }
            }
        }
        hist
    }
}

// ── Tile codes ───────────────────────────────────────────────────────────────

/// Parse the corner encoded in a tile code such as `N10E40` or `s05w015`
/// into `(lat, lon)`. The code may be embedded in a longer name.
pub fn parse_tile_code(s: &str) -> Option<(f64, f64)> {
    let bytes = s.as_bytes();
    let digits_from = |start: usize| {
        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |n| start + n);
        (end > start).then_some(end)
    };
    for i in 0..bytes.len() {
        let lat_sign = match bytes[i].to_ascii_uppercase() {
            b'N' => 1.0,
            b'S' => -1.0,
            _ => continue,
        };
        let Some(j) = digits_from(i + 1) else { continue };
        let Some(&hemi) = bytes.get(j) else { break };
        let lon_sign = match hemi.to_ascii_uppercase() {
            b'E' => 1.0,
            b'W' => -1.0,
            _ => continue,
        };
        let Some(k) = digits_from(j + 1) else { continue };
        let (Ok(lat), Ok(lon)) = (s[i + 1..j].parse::<f64>(), s[j + 1..k].parse::<f64>()) else {
            continue;
        };
        return Some((lat_sign * lat, lon_sign * lon));
    }
    None
}

/// Extent of a tile whose code names its south-west corner: `N00E50`
/// covers lat [0, span), lon [50, 50 + span).
pub fn extent_from_tile_code(code: &str, span_deg: f64) -> Option<Rect<f64>> {
    parse_tile_code(code).map(|(lat, lon)| {
        Rect::new(Coord { x: lon, y: lat }, Coord { x: lon + span_deg, y: lat + span_deg })
    })
}

// ── Raster Store seam ────────────────────────────────────────────────────────

/// Read-only access to a set of categorical tiles. Shared across worker
/// threads during estimation.
pub trait RasterStore: Sync {
    /// Ids of the tiles whose extent intersects `bbox`, in a stable order.
    fn tiles_for(&self, bbox: &Rect<f64>) -> Vec<String>;

    /// Category value of the land cover of interest in `tile`.
    fn category_of_interest(&self, tile: &str) -> Option<u16>;

    /// Histogram of `tile` under `geometry`. Errors when the tile cannot be read.
    fn pixel_histogram(&self, tile: &str, geometry: &MultiPolygon<f64>) -> Result<PixelHistogram>;
}

enum TileEntry {
    Loaded(CategoricalRaster),
    Unavailable { extent: Rect<f64>, reason: String },
}

impl TileEntry {
    fn extent(&self) -> Rect<f64> {
        match self {
            TileEntry::Loaded(r) => r.extent(),
            TileEntry::Unavailable { extent, .. } => *extent,
        }
    }
}

/// In-memory Raster Store over already-decoded tiles.
pub struct TileSet {
    entries: Vec<(String, TileEntry)>,
    categories: BTreeMap<String, u16>,
    default_category: u16,
}

impl TileSet {
    /// Categories are resolved from `catalog` once; rasters whose id is not
    /// in the catalog use its default category.
    pub fn new(catalog: &TileCatalog, rasters: Vec<CategoricalRaster>) -> Self {
        Self {
            entries: rasters.into_iter().map(|r| (r.tile_id.clone(), TileEntry::Loaded(r))).collect(),
            categories: catalog.resolve_categories(),
            default_category: catalog.default_category,
        }
    }

    /// Register a tile that is known to cover `extent` but cannot be read.
    pub fn with_unavailable(mut self, id: impl Into<String>, extent: Rect<f64>, reason: impl Into<String>) -> Self {
        self.entries.push((id.into(), TileEntry::Unavailable { extent, reason: reason.into() }));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RasterStore for TileSet {
    fn tiles_for(&self, bbox: &Rect<f64>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| geom::rects_intersect(&e.extent(), bbox))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn category_of_interest(&self, tile: &str) -> Option<u16> {
        self.entries
            .iter()
            .any(|(id, _)| id == tile)
            .then(|| self.categories.get(tile).copied().unwrap_or(self.default_category))
    }

    fn pixel_histogram(&self, tile: &str, geometry: &MultiPolygon<f64>) -> Result<PixelHistogram> {
        match self.entries.iter().find(|(id, _)| id == tile) {
            Some((_, TileEntry::Loaded(r))) => Ok(r.histogram(geometry)),
            Some((_, TileEntry::Unavailable { reason, .. })) => Err(LocustError::RasterUnavailable {
                tile: tile.to_string(),
                reason: reason.clone(),
            }),
            None => Err(LocustError::RasterUnavailable {
                tile: tile.to_string(),
                reason: "unknown tile".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Polygon};

    /// 20×10 grid over lon [0, 20), lat [0, 10), 1° pixels.
    /// Value = (col % 3) + 1, nodata where row == 0 && col < 4 (value 0).
    fn grid() -> CategoricalRaster {
        let (w, h) = (20, 10);
        let mut data = Vec::with_capacity(w * h);
        for row in 0..h {
            for col in 0..w {
                data.push(if row == 0 && col < 4 { 0 } else { (col % 3) as u16 + 1 });
            }
        }
        let t = GeoTransform { origin_x: 0.0, origin_y: 10.0, pixel_width: 1.0, pixel_height: 1.0 };
        CategoricalRaster::new("N00E00", t, w, h, data, Some(0)).unwrap()
    }

    /// Reference: test every pixel centre with an even-odd ray cast.
    fn brute_force(r: &CategoricalRaster, mp: &MultiPolygon<f64>) -> PixelHistogram {
        let mut hist = PixelHistogram::default();
        for row in 0..r.height {
            for col in 0..r.width {
                let c = r.transform.pixel_center(col, row);
                let mut inside = false;
                for p in mp.iter() {
                    for ring in std::iter::once(p.exterior()).chain(p.interiors()) {
                        for seg in ring.lines() {
                            let (a, b) = (seg.start, seg.end);
                            if (a.y <= c.y) != (b.y <= c.y) {
                                let x = a.x + (c.y - a.y) * (b.x - a.x) / (b.y - a.y);
                                if x > c.x {
                                    inside = !inside;
                                }
                            }
                        }
                    }
                }
                let v = r.get(row, col);
                if inside && r.nodata != Some(v) {
                    hist.add(v, 1);
                }
            }
        }
        hist
    }

    fn multi(p: Polygon<f64>) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![p])
    }

    #[test]
    fn extent_matches_transform() {
        let e = grid().extent();
        assert_eq!(e.min(), Coord { x: 0.0, y: 0.0 });
        assert_eq!(e.max(), Coord { x: 20.0, y: 10.0 });
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let t = GeoTransform { origin_x: 0.0, origin_y: 1.0, pixel_width: 1.0, pixel_height: 1.0 };
        assert!(CategoricalRaster::new("x", t, 2, 2, vec![1u8, 2, 3], None).is_err());
    }

    #[test]
    fn axis_aligned_square_counts_centres() {
        // Covers centres x in {2.5..6.5}, y in {3.5..6.5}: 5 × 4 pixels.
        let sq = polygon![(x: 2.2, y: 3.1), (x: 7.1, y: 3.1), (x: 7.1, y: 6.9), (x: 2.2, y: 6.9)];
        let h = grid().histogram(&multi(sq));
        assert_eq!(h.total, 20);
        assert_eq!(h.count_of(1) + h.count_of(2) + h.count_of(3), 20);
        assert_eq!(h.count_of(9), 0);
    }

    #[test]
    fn scanline_matches_brute_force() {
        let r = grid();
        let shapes = vec![
            multi(polygon![(x: 1.3, y: 0.7), (x: 18.2, y: 2.9), (x: 9.7, y: 9.6)]),
            multi(polygon![
                exterior: [(x: 0.4, y: 0.3), (x: 15.3, y: 0.3), (x: 15.3, y: 9.1), (x: 0.4, y: 9.1)],
                interiors: [[(x: 4.1, y: 2.2), (x: 9.3, y: 2.2), (x: 9.3, y: 6.7), (x: 4.1, y: 6.7)]]
            ]),
            MultiPolygon::new(vec![
                polygon![(x: -3.3, y: -2.1), (x: 4.6, y: 1.7), (x: 2.2, y: 5.3)],
                polygon![(x: 12.1, y: 4.2), (x: 25.7, y: 6.3), (x: 16.4, y: 13.9)],
            ]),
        ];
        for mp in &shapes {
            assert_eq!(r.histogram(mp), brute_force(&r, mp));
        }
    }

    #[test]
    fn nodata_is_not_sampled() {
        // Top-left 4 pixels of row 0 are nodata.
        let sq = polygon![(x: 0.1, y: 9.1), (x: 3.9, y: 9.1), (x: 3.9, y: 9.9), (x: 0.1, y: 9.9)];
        let h = grid().histogram(&multi(sq));
        assert!(h.is_empty());
        assert_eq!(h.count_of(0), 0);
    }

    #[test]
    fn polygon_outside_grid_is_empty() {
        let sq = polygon![(x: 30.0, y: 30.0), (x: 31.0, y: 30.0), (x: 31.0, y: 31.0)];
        assert!(grid().histogram(&multi(sq)).is_empty());
    }

    #[test]
    fn tile_codes() {
        assert_eq!(parse_tile_code("N10E40"), Some((10.0, 40.0)));
        assert_eq!(parse_tile_code("S10E20"), Some((-10.0, 20.0)));
        assert_eq!(parse_tile_code("GFSAD30AFCE_2015_N00E50_001"), Some((0.0, 50.0)));
        assert_eq!(parse_tile_code("n30w120"), Some((30.0, -120.0)));
        assert_eq!(parse_tile_code("forageland2003"), None);

        let e = extent_from_tile_code("N10E40", 10.0).unwrap();
        assert_eq!(e.min(), Coord { x: 40.0, y: 10.0 });
        assert_eq!(e.max(), Coord { x: 50.0, y: 20.0 });
        // Southern tiles reach up to the equator.
        let e = extent_from_tile_code("S10E30", 10.0).unwrap();
        assert_eq!(e.min(), Coord { x: 30.0, y: -10.0 });
        assert_eq!(e.max(), Coord { x: 40.0, y: 0.0 });
    }

    #[test]
    fn window_histogram_matches_whole_grid() {
        let r = grid();
        let mp = multi(polygon![(x: 3.3, y: 1.7), (x: 11.2, y: 2.9), (x: 8.7, y: 7.6)]);
        let w = r.transform.window(&geom::bbox(&mp).unwrap(), r.width, r.height).unwrap();
        assert_eq!(w, PixelWindow { row0: 1, row1: 10, col0: 2, col1: 13 });

        let mut data = Vec::with_capacity(w.width() * w.height());
        for row in w.row0..w.row1 {
            for col in w.col0..w.col1 {
                data.push(r.get(row, col));
            }
        }
        let t = r.transform.offset(w.row0, w.col0);
        let sub = CategoricalRaster::new("N00E00", t, w.width(), w.height(), data, Some(0)).unwrap();
        assert_eq!(sub.histogram(&mp), r.histogram(&mp));

        let far = Rect::new(Coord { x: 40.0, y: 40.0 }, Coord { x: 41.0, y: 41.0 });
        assert_eq!(r.transform.window(&far, r.width, r.height), None);
    }

    #[test]
    fn narrow_samples_read_like_wide_ones() {
        let t = GeoTransform { origin_x: 0.0, origin_y: 2.0, pixel_width: 1.0, pixel_height: 1.0 };
        let narrow = CategoricalRaster::new("a", t, 2, 2, vec![2u8, 0, 2, 5], Some(0)).unwrap();
        let wide = CategoricalRaster::new("a", t, 2, 2, vec![2u16, 0, 2, 5], Some(0)).unwrap();
        let all = multi(polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)]);
        assert_eq!(narrow.histogram(&all), wide.histogram(&all));
        assert_eq!(narrow.histogram(&all).count_of(2), 2);
        assert_eq!(narrow.get(1, 1), 5);
    }

    #[test]
    fn tile_set_selects_by_extent_and_resolves_category() {
        let catalog = TileCatalog::cropland();
        let t = GeoTransform { origin_x: 50.0, origin_y: 20.0, pixel_width: 1.0, pixel_height: 1.0 };
        let a = CategoricalRaster::new("N10E50", t, 10, 10, vec![2u8; 100], None).unwrap();
        let t = GeoTransform { origin_x: 50.0, origin_y: 10.0, ..t };
        let b = CategoricalRaster::new("N00E50", t, 10, 10, vec![1u8; 100], None).unwrap();
        let store = TileSet::new(&catalog, vec![a, b]);

        let bbox = Rect::new(Coord { x: 51.0, y: 9.0 }, Coord { x: 52.0, y: 11.0 });
        assert_eq!(store.tiles_for(&bbox), ["N10E50", "N00E50"]);
        let bbox = Rect::new(Coord { x: 51.0, y: 2.0 }, Coord { x: 52.0, y: 3.0 });
        assert_eq!(store.tiles_for(&bbox), ["N00E50"]);

        assert_eq!(store.category_of_interest("N10E50"), Some(2));
        assert_eq!(store.category_of_interest("N00E50"), Some(1));
        assert_eq!(store.category_of_interest("S10E20"), None);
    }

    #[test]
    fn unavailable_tile_reports_error() {
        let extent = extent_from_tile_code("N10E40", 10.0).unwrap();
        let store = TileSet::new(&TileCatalog::cropland(), vec![]).with_unavailable("N10E40", extent, "truncated");
        let sq = multi(polygon![(x: 41.0, y: 11.0), (x: 42.0, y: 11.0), (x: 42.0, y: 12.0)]);
        assert_eq!(store.tiles_for(&geom::bbox(&sq).unwrap()), ["N10E40"]);
        assert!(matches!(
            store.pixel_histogram("N10E40", &sq),
            Err(LocustError::RasterUnavailable { .. })
        ));
    }
}
