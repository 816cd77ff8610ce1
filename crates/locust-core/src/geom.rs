//! Planar polygon helpers shared by buffering, dissolving and overlay.

use std::f64::consts::PI;

use geo::{Area, BooleanOps, BoundingRect, Coord, Geometry, LineString, MultiPolygon, Polygon, Rect};

#[cfg(feature = "threading")]
use rayon::prelude::*;

/// Areas at or below this are treated as empty (degrees² or m², both far
/// below one pixel).
pub const AREA_EPSILON: f64 = 1e-12;

/// Regular polygon approximating a disc of `radius` around `c`.
pub fn disc(c: Coord<f64>, radius: f64, quadrant_segments: usize) -> Polygon<f64> {
    let n = 4 * quadrant_segments.max(1);
    let ring: Vec<Coord<f64>> = (0..n)
        .map(|i| {
            let theta = 2.0 * PI * i as f64 / n as f64;
            Coord { x: c.x + radius * theta.cos(), y: c.y + radius * theta.sin() }
        })
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// Rectangle of half-width `radius` around segment `a`→`b`.
/// `None` for a zero-length segment.
fn segment_band(a: Coord<f64>, b: Coord<f64>, radius: f64) -> Option<Polygon<f64>> {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len = (dx * dx + dy * dy).sqrt();
    if len <= f64::EPSILON {
        return None;
    }
    let (nx, ny) = (-dy / len * radius, dx / len * radius);
    let ring = vec![
        Coord { x: a.x + nx, y: a.y + ny },
        Coord { x: b.x + nx, y: b.y + ny },
        Coord { x: b.x - nx, y: b.y - ny },
        Coord { x: a.x - nx, y: a.y - ny },
    ];
    Some(Polygon::new(LineString::from(ring), vec![]))
}

/// Pieces whose union is the Minkowski sum of `g` with a disc.
fn buffer_pieces(g: &Geometry<f64>, radius: f64, qs: usize, out: &mut Vec<Polygon<f64>>) {
    let line = |ls: &LineString<f64>, out: &mut Vec<Polygon<f64>>| {
        for c in ls.coords() {
            out.push(disc(*c, radius, qs));
        }
        out.extend(ls.lines().filter_map(|l| segment_band(l.start, l.end, radius)));
    };
    let polygon = |p: &Polygon<f64>, out: &mut Vec<Polygon<f64>>| {
        out.push(p.clone());
        line(p.exterior(), out);
        for hole in p.interiors() {
            line(hole, out);
        }
    };
    match g {
        Geometry::Point(p) => out.push(disc(p.0, radius, qs)),
        Geometry::MultiPoint(mp) => out.extend(mp.iter().map(|p| disc(p.0, radius, qs))),
        Geometry::Line(l) => {
            out.push(disc(l.start, radius, qs));
            out.push(disc(l.end, radius, qs));
            out.extend(segment_band(l.start, l.end, radius));
        }
        Geometry::LineString(ls) => line(ls, out),
        Geometry::MultiLineString(mls) => mls.iter().for_each(|ls| line(ls, out)),
        Geometry::Polygon(p) => polygon(p, out),
        Geometry::MultiPolygon(mp) => mp.iter().for_each(|p| polygon(p, out)),
        Geometry::Rect(r) => polygon(&r.to_polygon(), out),
        Geometry::Triangle(t) => polygon(&t.to_polygon(), out),
        Geometry::GeometryCollection(gc) => {
            gc.iter().for_each(|g| buffer_pieces(g, radius, qs, out))
        }
    }
}

/// Planar buffer of `g` by `radius` (same units as the coordinates).
pub fn buffer(g: &Geometry<f64>, radius: f64, quadrant_segments: usize) -> MultiPolygon<f64> {
    let mut pieces = Vec::new();
    buffer_pieces(g, radius, quadrant_segments, &mut pieces);
    if let [single] = pieces.as_slice() {
        // A lone disc is already valid.
        return MultiPolygon::new(vec![single.clone()]);
    }
    union_all(pieces.into_iter().map(|p| MultiPolygon::new(vec![p])).collect())
}

/// Union of every part, reduced pairwise over a fixed tree so the result
/// does not depend on thread scheduling.
pub fn union_all(parts: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    let mut level = parts;
    while level.len() > 1 {
        level = union_level(&level);
    }
    level.pop().unwrap_or_else(|| MultiPolygon::new(vec![]))
}

#[cfg(feature = "threading")]
fn union_level(level: &[MultiPolygon<f64>]) -> Vec<MultiPolygon<f64>> {
    level.par_chunks(2).map(merge_chunk).collect()
}

#[cfg(not(feature = "threading"))]
fn union_level(level: &[MultiPolygon<f64>]) -> Vec<MultiPolygon<f64>> {
    level.chunks(2).map(merge_chunk).collect()
}

fn merge_chunk(chunk: &[MultiPolygon<f64>]) -> MultiPolygon<f64> {
    match chunk {
        [a, b] => union_pair(a, b),
        [a] => a.clone(),
        _ => MultiPolygon::new(vec![]),
    }
}

fn union_pair(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    if a.0.is_empty() {
        return b.clone();
    }
    if b.0.is_empty() {
        return a.clone();
    }
    a.union(b)
}

/// Split a multi-part geometry into its constituent polygons.
pub fn explode(mp: MultiPolygon<f64>) -> Vec<Polygon<f64>> {
    mp.0.into_iter().filter(|p| p.unsigned_area() > AREA_EPSILON).collect()
}

pub fn rects_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

/// Bounding rectangle, `None` for an empty geometry.
pub fn bbox(mp: &MultiPolygon<f64>) -> Option<Rect<f64>> {
    mp.bounding_rect()
}
