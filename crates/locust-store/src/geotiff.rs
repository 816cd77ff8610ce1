//! GeoTIFF-backed Raster Store.
//!
//! Tile headers are read when the store opens, to place every tile. Pixels
//! are decoded per fragment and dropped after counting: only the strips or
//! tiles under the fragment's bounding box are read, at their stored sample
//! width, so memory follows the fragment rather than the tile.
//!
//! A tile whose header cannot be read stays registered as unavailable. It
//! is placed from its catalog extent, else from the south-west corner in
//! its id, else over the whole globe, so fragments that may lie over it are
//! reported instead of silently treated as uncovered.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use geo::{coord, MultiPolygon, Rect};
use locust_core::raster::{
    extent_from_tile_code, CategoricalRaster, GeoTransform, PixelHistogram, PixelWindow, RasterStore, Samples,
};
use locust_core::{geom, LocustError, TileCatalog, TileSpec};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

// ── GeoTIFF tags ─────────────────────────────────────────────────────────────

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GDAL_NODATA: u16 = 42113;

/// Georeferencing and shape of one tile, read without decoding pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileHeader {
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub nodata: Option<u16>,
}

impl TileHeader {
    pub fn extent(&self) -> Rect<f64> {
        self.transform.extent(self.width, self.height)
    }
}

fn tiff_err(path: &Path) -> impl FnOnce(tiff::TiffError) -> StoreError + '_ {
    move |source| StoreError::Tiff { path: path.to_path_buf(), source }
}

fn f64_tag<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16, path: &Path) -> Result<Option<Vec<f64>>> {
    decoder
        .find_tag(Tag::from_u16_exhaustive(code))
        .map_err(tiff_err(path))?
        .map(|v| v.into_f64_vec().map_err(tiff_err(path)))
        .transpose()
}

fn parse_nodata(raw: &str) -> Option<u16> {
    let v: f64 = raw.trim().trim_end_matches('\0').parse().ok()?;
    (v.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(&v)).then_some(v as u16)
}

fn read_header_from<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<TileHeader> {
    let (width, height) = decoder.dimensions().map_err(tiff_err(path))?;
    let georef = |reason: &str| StoreError::Georeference { path: path.to_path_buf(), reason: reason.into() };

    let scale = f64_tag(decoder, MODEL_PIXEL_SCALE, path)?.ok_or_else(|| georef("missing ModelPixelScale"))?;
    let tie = f64_tag(decoder, MODEL_TIEPOINT, path)?.ok_or_else(|| georef("missing ModelTiepoint"))?;
    let ([sx, sy, ..], [i, j, _, x, y, ..]) = (scale.as_slice(), tie.as_slice()) else {
        return Err(georef("short ModelPixelScale or ModelTiepoint"));
    };
    if !(*sx > 0.0 && *sy > 0.0) {
        return Err(georef("non-positive pixel scale"));
    }

    let nodata = match decoder.find_tag(Tag::from_u16_exhaustive(GDAL_NODATA)).map_err(tiff_err(path))? {
        Some(v) => parse_nodata(&v.into_string().map_err(tiff_err(path))?),
        None => None,
    };

    Ok(TileHeader {
        transform: GeoTransform {
            origin_x: x - i * sx,
            origin_y: y + j * sy,
            pixel_width: *sx,
            pixel_height: *sy,
        },
        width: width as usize,
        height: height as usize,
        nodata,
    })
}

/// Read georeferencing only.
pub fn read_header<R: Read + Seek>(reader: R, path: &Path) -> Result<TileHeader> {
    let mut decoder = Decoder::new(reader).map_err(tiff_err(path))?;
    read_header_from(&mut decoder, path)
}

fn sample_format(d: &DecodingResult) -> &'static str {
    match d {
        DecodingResult::U8(_) => "u8",
        DecodingResult::U16(_) => "u16",
        DecodingResult::U32(_) => "u32",
        DecodingResult::U64(_) => "u64",
        DecodingResult::F32(_) => "f32",
        DecodingResult::F64(_) => "f64",
        _ => "signed integer",
    }
}

/// Copy the pixels of `window` out of the strips or tiles that overlap it.
fn copy_window<T, R>(
    decoder: &mut Decoder<R>,
    header: &TileHeader,
    window: PixelWindow,
    path: &Path,
    take: fn(DecodingResult) -> std::result::Result<Vec<T>, DecodingResult>,
) -> Result<Vec<T>>
where
    T: Copy + Default,
    R: Read + Seek,
{
    let layout = |reason: String| StoreError::Layout { path: path.to_path_buf(), reason };
    let (cw, ch) = decoder.chunk_dimensions();
    let (cw, ch) = (cw as usize, ch as usize);
    if cw == 0 || ch == 0 || window.width() == 0 || window.height() == 0 {
        return Err(layout("empty image or chunk".into()));
    }
    let across = header.width.div_ceil(cw);

    let mut out = vec![T::default(); window.width() * window.height()];
    for chunk_row in window.row0 / ch..=(window.row1 - 1) / ch {
        for chunk_col in window.col0 / cw..=(window.col1 - 1) / cw {
            let index = u32::try_from(chunk_row * across + chunk_col)
                .map_err(|_| layout("chunk index out of range".into()))?;
            let stride = decoder.chunk_data_dimensions(index).0 as usize;
            let data = take(decoder.read_chunk(index).map_err(tiff_err(path))?).map_err(|other| {
                StoreError::SampleFormat { path: path.to_path_buf(), format: sample_format(&other).into() }
            })?;

            let (top, left) = (chunk_row * ch, chunk_col * cw);
            let cols = left.max(window.col0)..(left + cw).min(window.col1);
            for row in top.max(window.row0)..(top + ch).min(window.row1) {
                let at = (row - top) * stride;
                let src = data
                    .get(at + cols.start - left..at + cols.end - left)
                    .ok_or_else(|| layout(format!("chunk {index} is short")))?;
                let dst = (row - window.row0) * window.width() + cols.start - window.col0;
                out[dst..dst + src.len()].copy_from_slice(src);
            }
        }
    }
    Ok(out)
}

fn read_window_from<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    tile_id: &str,
    header: &TileHeader,
    window: PixelWindow,
    path: &Path,
) -> Result<CategoricalRaster> {
    let samples = match decoder.colortype().map_err(tiff_err(path))? {
        ColorType::Gray(8) => {
            let take = |d: DecodingResult| match d {
                DecodingResult::U8(v) => Ok(v),
                other => Err(other),
            };
            Samples::U8(copy_window(decoder, header, window, path, take)?)
        }
        ColorType::Gray(16) => {
            let take = |d: DecodingResult| match d {
                DecodingResult::U16(v) => Ok(v),
                other => Err(other),
            };
            Samples::U16(copy_window(decoder, header, window, path, take)?)
        }
        other => {
            return Err(StoreError::SampleFormat { path: path.to_path_buf(), format: format!("{other:?}") });
        }
    };
    let transform = header.transform.offset(window.row0, window.col0);
    Ok(CategoricalRaster::new(tile_id, transform, window.width(), window.height(), samples, header.nodata)?)
}

/// Decode a whole categorical tile: 8- or 16-bit unsigned single-band.
pub fn decode_tile<R: Read + Seek>(tile_id: &str, reader: R, path: &Path) -> Result<CategoricalRaster> {
    let mut decoder = Decoder::new(reader).map_err(tiff_err(path))?;
    let header = read_header_from(&mut decoder, path)?;
    read_window_from(&mut decoder, tile_id, &header, PixelWindow::full(header.width, header.height), path)
}

/// Decode only the part of a tile that `bbox` can reach. `None` when the
/// box misses the tile.
pub fn decode_window<R: Read + Seek>(
    tile_id: &str,
    reader: R,
    path: &Path,
    bbox: &Rect<f64>,
) -> Result<Option<CategoricalRaster>> {
    let mut decoder = Decoder::new(reader).map_err(tiff_err(path))?;
    let header = read_header_from(&mut decoder, path)?;
    header
        .transform
        .window(bbox, header.width, header.height)
        .map(|w| read_window_from(&mut decoder, tile_id, &header, w, path))
        .transpose()
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })
}

// ── Tile store ───────────────────────────────────────────────────────────────

enum TileState {
    Ready(PathBuf),
    Unavailable(String),
}

struct TileSlot {
    id: String,
    extent: Rect<f64>,
    state: TileState,
}

impl TileSlot {
    fn histogram(&self, geometry: &MultiPolygon<f64>) -> std::result::Result<PixelHistogram, String> {
        let path = match &self.state {
            TileState::Ready(path) => path,
            TileState::Unavailable(reason) => return Err(reason.clone()),
        };
        let Some(bbox) = geom::bbox(geometry) else {
            return Ok(PixelHistogram::default());
        };
        let raster = open(path)
            .and_then(|r| decode_window(&self.id, r, path, &bbox))
            .map_err(|e| e.to_string())?;
        Ok(raster.map_or_else(PixelHistogram::default, |r| {
            debug!(tile = %self.id, rows = r.height, cols = r.width, "window decoded");
            r.histogram(geometry)
        }))
    }
}

fn whole_globe() -> Rect<f64> {
    Rect::new(coord! { x: -180.0, y: -90.0 }, coord! { x: 180.0, y: 90.0 })
}

/// Where to put a tile whose header could not be read.
fn fallback_extent(spec: &TileSpec, span_deg: f64) -> Rect<f64> {
    spec.extent
        .or_else(|| extent_from_tile_code(&spec.id, span_deg))
        .unwrap_or_else(|| {
            warn!(tile = %spec.id, "tile has no known extent, treated as covering every fragment");
            whole_globe()
        })
}

/// Raster Store over GeoTIFF tiles on disk.
pub struct GeoTiffTileStore {
    slots: Vec<TileSlot>,
    categories: BTreeMap<String, u16>,
}

impl GeoTiffTileStore {
    /// Place every catalog tile under `root`. Unreadable tiles are kept and
    /// answer every histogram request with `RasterUnavailable`.
    pub fn open(root: impl AsRef<Path>, catalog: &TileCatalog) -> Self {
        let root = root.as_ref();
        let mut slots = Vec::with_capacity(catalog.tiles.len());
        for spec in &catalog.tiles {
            let read = catalog
                .path_for(spec)
                .map(|p| root.join(p))
                .ok_or_else(|| StoreError::NoPath(spec.id.clone()))
                .and_then(|p| open(&p).and_then(|r| read_header(r, &p)).map(|h| (p, h)));
            let slot = match read {
                Ok((path, header)) => TileSlot {
                    id: spec.id.clone(),
                    extent: header.extent(),
                    state: TileState::Ready(path),
                },
                Err(e) => {
                    warn!(tile = %spec.id, "{e}");
                    TileSlot {
                        id: spec.id.clone(),
                        extent: fallback_extent(spec, catalog.tile_span_deg),
                        state: TileState::Unavailable(e.to_string()),
                    }
                }
            };
            slots.push(slot);
        }
        let unavailable = slots.iter().filter(|s| matches!(s.state, TileState::Unavailable(_))).count();
        info!(tiles = slots.len(), unavailable, root = %root.display(), "tile store opened");
        Self { slots, categories: catalog.resolve_categories() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, tile: &str) -> Option<&TileSlot> {
        self.slots.iter().find(|s| s.id == tile)
    }
}

impl RasterStore for GeoTiffTileStore {
    fn tiles_for(&self, bbox: &Rect<f64>) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| geom::rects_intersect(&s.extent, bbox))
            .map(|s| s.id.clone())
            .collect()
    }

    fn category_of_interest(&self, tile: &str) -> Option<u16> {
        self.slot(tile).and_then(|_| self.categories.get(tile).copied())
    }

    fn pixel_histogram(&self, tile: &str, geometry: &MultiPolygon<f64>) -> locust_core::Result<PixelHistogram> {
        let slot = self.slot(tile).ok_or_else(|| LocustError::RasterUnavailable {
            tile: tile.to_string(),
            reason: "unknown tile".into(),
        })?;
        slot.histogram(geometry)
            .map_err(|reason| LocustError::RasterUnavailable { tile: tile.to_string(), reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use std::io::Cursor;
    use tiff::encoder::{colortype, TiffEncoder};

    /// 10×10 Gray8 GeoTIFF, 0.1° pixels, top-left corner at (lat, lon).
    fn encode_strips(lat: f64, lon: f64, data: &[u8], nodata: Option<&str>, rows_per_strip: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut buf).unwrap();
            let mut img = enc.new_image::<colortype::Gray8>(10, 10).unwrap();
            img.rows_per_strip(rows_per_strip).unwrap();
            img.encoder()
                .write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE), &[0.1f64, 0.1, 0.0][..])
                .unwrap();
            img.encoder()
                .write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT), &[0.0f64, 0.0, 0.0, lon, lat, 0.0][..])
                .unwrap();
            if let Some(nd) = nodata {
                img.encoder().write_tag(Tag::from_u16_exhaustive(GDAL_NODATA), nd).unwrap();
            }
            img.write_data(data).unwrap();
        }
        buf.into_inner()
    }

    fn encode(lat: f64, lon: f64, data: &[u8], nodata: Option<&str>) -> Vec<u8> {
        encode_strips(lat, lon, data, nodata, 10)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("locust-store-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn pixels() -> Vec<u8> {
        // Column 0 nodata, even columns cropland (2), odd columns other (5).
        (0..100u32)
            .map(|i| match i % 10 {
                0 => 0,
                c if c % 2 == 0 => 2,
                _ => 5,
            })
            .collect()
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]])
    }

    fn spec(id: &str, category: Option<u16>, extent: Option<Rect<f64>>) -> TileSpec {
        TileSpec { id: id.into(), category, path: None, extent }
    }

    #[test]
    fn decodes_georeferenced_tile() {
        let bytes = encode(1.0, 40.0, &pixels(), Some("0"));
        let r = decode_tile("N00E40", Cursor::new(bytes), Path::new("mem.tif")).unwrap();
        assert_eq!((r.width, r.height), (10, 10));
        assert_eq!(r.nodata, Some(0));
        assert!(matches!(r.data, Samples::U8(_)));
        approx::assert_relative_eq!(r.transform.origin_x, 40.0);
        approx::assert_relative_eq!(r.transform.origin_y, 1.0);
        approx::assert_relative_eq!(r.transform.pixel_width, 0.1);

        let h = r.histogram(&square(40.0, 0.0, 41.0, 1.0));
        assert_eq!(h.total, 90);
        assert_eq!(h.count_of(2), 40);
        assert_eq!(h.count_of(5), 50);
    }

    #[test]
    fn window_reads_only_the_strips_it_needs() {
        let data: Vec<u8> = (0..100u8).map(|i| i % 7 + 1).collect();
        let bytes = encode_strips(1.0, 40.0, &data, None, 3);
        let whole = decode_tile("N00E40", Cursor::new(bytes.clone()), Path::new("mem.tif")).unwrap();

        // Centres in rows 4-5, columns 3-6; the padded window spans strips 1 and 2.
        let frag = square(40.31, 0.41, 40.68, 0.58);
        let bbox = geom::bbox(&frag).unwrap();
        let part = decode_window("N00E40", Cursor::new(bytes.clone()), Path::new("mem.tif"), &bbox)
            .unwrap()
            .unwrap();
        assert!(part.width < whole.width && part.height < whole.height);
        assert_eq!(part.histogram(&frag), whole.histogram(&frag));
        assert_eq!(part.histogram(&frag).total, 8);

        let far = geom::bbox(&square(10.0, 10.0, 11.0, 11.0)).unwrap();
        assert!(decode_window("N00E40", Cursor::new(bytes), Path::new("mem.tif"), &far).unwrap().is_none());
    }

    #[test]
    fn header_without_georeference_is_rejected() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut buf).unwrap();
            enc.write_image::<colortype::Gray8>(2, 2, &[1, 2, 3, 4]).unwrap();
        }
        let err = read_header(Cursor::new(buf.into_inner()), Path::new("bare.tif")).unwrap_err();
        assert!(matches!(err, StoreError::Georeference { .. }));
    }

    #[test]
    fn nodata_text() {
        assert_eq!(parse_nodata("0"), Some(0));
        assert_eq!(parse_nodata("255\0"), Some(255));
        assert_eq!(parse_nodata("-9999"), None);
        assert_eq!(parse_nodata("nan"), None);
    }

    #[test]
    fn store_places_readable_and_unreadable_tiles() {
        let dir = scratch_dir("place");
        std::fs::write(dir.join("N00E40.tif"), encode(1.0, 40.0, &pixels(), Some("0"))).unwrap();
        std::fs::write(dir.join("N00E50.tif"), b"not a tiff").unwrap();

        let forage = Rect::new(coord! { x: 30.0, y: -5.0 }, coord! { x: 45.0, y: 15.0 });
        let catalog = TileCatalog {
            default_category: 2,
            tiles: vec![
                spec("N00E40", None, None),
                spec("N00E50", Some(1), None),
                spec("forageland2003", None, Some(forage)),
            ],
            path_template: Some("{tile}.tif".into()),
            tile_span_deg: 10.0,
        };
        let store = GeoTiffTileStore::open(&dir, &catalog);
        assert_eq!(store.len(), 3);
        assert_eq!(store.category_of_interest("N00E50"), Some(1));
        assert_eq!(store.category_of_interest("N00E40"), Some(2));

        let frag = square(40.0, 0.0, 40.5, 0.5);
        assert_eq!(store.tiles_for(&geom::bbox(&frag).unwrap()), ["N00E40", "forageland2003"]);
        let h = store.pixel_histogram("N00E40", &frag).unwrap();
        assert_eq!(h.total, 20);
        assert_eq!(h.count_of(2), 10);

        // N00E50 names its south-west corner: it covers Puntland, not the ocean below.
        let puntland = square(50.3, 5.0, 50.8, 5.5);
        assert_eq!(store.tiles_for(&geom::bbox(&puntland).unwrap()), ["N00E50"]);
        assert!(store.tiles_for(&geom::bbox(&square(50.3, -5.5, 50.8, -5.0)).unwrap()).is_empty());
        assert!(matches!(
            store.pixel_histogram("N00E50", &puntland),
            Err(LocustError::RasterUnavailable { .. })
        ));

        // Missing file, placed from its catalog extent.
        let inland = square(38.0, 5.0, 38.5, 5.5);
        assert_eq!(store.tiles_for(&geom::bbox(&inland).unwrap()), ["forageland2003"]);
        assert!(matches!(
            store.pixel_histogram("forageland2003", &inland),
            Err(LocustError::RasterUnavailable { tile, .. }) if tile == "forageland2003"
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tile_without_any_extent_covers_everything() {
        let dir = scratch_dir("unplaced");
        let catalog = TileCatalog {
            default_category: 1,
            tiles: vec![spec("mosaic", None, None)],
            path_template: Some("{tile}.tif".into()),
            tile_span_deg: 10.0,
        };
        let store = GeoTiffTileStore::open(&dir, &catalog);
        assert_eq!(store.len(), 1);
        assert_eq!(store.tiles_for(&geom::bbox(&square(-70.0, -30.0, -69.0, -29.0)).unwrap()), ["mosaic"]);
        assert!(store.pixel_histogram("mosaic", &square(0.0, 0.0, 1.0, 1.0)).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tile_without_a_path_is_unavailable() {
        let catalog = TileCatalog {
            default_category: 2,
            tiles: vec![spec("N00E30", None, None)],
            path_template: None,
            tile_span_deg: 10.0,
        };
        let store = GeoTiffTileStore::open(std::env::temp_dir(), &catalog);
        let frag = square(31.0, 1.0, 32.0, 2.0);
        assert_eq!(store.tiles_for(&geom::bbox(&frag).unwrap()), ["N00E30"]);
        assert!(store.pixel_histogram("N00E30", &frag).is_err());
    }
}
