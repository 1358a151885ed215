//! Lon/lat vector primitives shared by the workflow stages.
//!
//! Everything here works on plain `[lon, lat]` pairs in EPSG:4326. Site
//! rectangles, reference-line clipping and line lengths only ever deal with
//! coastal study areas a few kilometres across, so the metric helpers use an
//! equirectangular approximation rather than full geodesics.

use anyhow::{anyhow, Result};
use geojson::Value;

/// `[lon, lat]` pair in degrees.
pub type Coord = [f64; 2];

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn of_ring(ring: &[Coord]) -> Option<Self> {
        if ring.is_empty() {
            return None;
        }
        let mut bbox = BoundingBox {
            west: f64::INFINITY,
            south: f64::INFINITY,
            east: f64::NEG_INFINITY,
            north: f64::NEG_INFINITY,
        };
        for c in ring {
            bbox.west = bbox.west.min(c[0]);
            bbox.east = bbox.east.max(c[0]);
            bbox.south = bbox.south.min(c[1]);
            bbox.north = bbox.north.max(c[1]);
        }
        Some(bbox)
    }

    pub fn contains(&self, c: Coord) -> bool {
        c[0] >= self.west - EPS
            && c[0] <= self.east + EPS
            && c[1] >= self.south - EPS
            && c[1] <= self.north + EPS
    }

    /// Closed counter-clockwise ring starting at the south-west corner.
    pub fn to_ring(&self) -> Vec<Coord> {
        vec![
            [self.west, self.south],
            [self.east, self.south],
            [self.east, self.north],
            [self.west, self.north],
            [self.west, self.south],
        ]
    }

    pub fn center(&self) -> Coord {
        [(self.west + self.east) / 2.0, (self.south + self.north) / 2.0]
    }
}

/// Axis-aligned bounding rectangle of a polygon ring, as a closed ring.
/// Catalog searches and reference clipping both use this rectangle, not
/// the raw site polygon.
pub fn smallest_rectangle(ring: &[Coord]) -> Result<Vec<Coord>> {
    if ring.len() < 3 {
        return Err(anyhow!("polygon ring has {} points, need at least 3", ring.len()));
    }
    let bbox = BoundingBox::of_ring(ring).ok_or(anyhow!("empty polygon ring"))?;
    Ok(bbox.to_ring())
}

pub fn is_closed_ring(ring: &[Coord]) -> bool {
    match (ring.first(), ring.last()) {
        (Some(a), Some(b)) if ring.len() >= 4 => {
            (a[0] - b[0]).abs() < EPS && (a[1] - b[1]).abs() < EPS
        }
        _ => false,
    }
}

/// Polyline length in metres (equirectangular, fine at site scale).
pub fn line_length_m(line: &[Coord]) -> f64 {
    line.windows(2)
        .map(|w| {
            let mid_lat = ((w[0][1] + w[1][1]) / 2.0).to_radians();
            let dlat = (w[1][1] - w[0][1]).to_radians();
            let dlon = (w[1][0] - w[0][0]).to_radians() * mid_lat.cos();
            EARTH_RADIUS_M * (dlat * dlat + dlon * dlon).sqrt()
        })
        .sum()
}

/// Clip one segment against a rectangle (Liang-Barsky). Returns the clipped
/// endpoints, or `None` when the segment lies entirely outside.
fn clip_segment(p0: Coord, p1: Coord, rect: &BoundingBox) -> Option<(Coord, Coord)> {
    let dx = p1[0] - p0[0];
    let dy = p1[1] - p0[1];
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;

    let checks = [
        (-dx, p0[0] - rect.west),
        (dx, rect.east - p0[0]),
        (-dy, p0[1] - rect.south),
        (dy, rect.north - p0[1]),
    ];
    for (p, q) in checks {
        if p.abs() < f64::EPSILON {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
            if t0 > t1 {
                return None;
            }
        }
    }

    let a = [p0[0] + t0 * dx, p0[1] + t0 * dy];
    let b = [p0[0] + t1 * dx, p0[1] + t1 * dy];
    Some((a, b))
}

fn same_point(a: Coord, b: Coord) -> bool {
    (a[0] - b[0]).abs() < EPS && (a[1] - b[1]).abs() < EPS
}

/// Clip a polyline to a rectangle. A line that leaves and re-enters the
/// rectangle is split into separate parts; degenerate corner touches are
/// dropped.
pub fn clip_polyline(line: &[Coord], rect: &BoundingBox) -> Vec<Vec<Coord>> {
    let mut parts: Vec<Vec<Coord>> = Vec::new();
    let mut current: Vec<Coord> = Vec::new();

    for w in line.windows(2) {
        match clip_segment(w[0], w[1], rect) {
            Some((a, b)) if !same_point(a, b) => {
                match current.last() {
                    Some(last) if same_point(*last, a) => current.push(b),
                    Some(_) => {
                        parts.push(std::mem::take(&mut current));
                        current.push(a);
                        current.push(b);
                    }
                    None => {
                        current.push(a);
                        current.push(b);
                    }
                }
            }
            _ => {
                if current.len() >= 2 {
                    parts.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
    }
    if current.len() >= 2 {
        parts.push(current);
    }
    parts
}

/// Clip a set of polylines, dropping the ones that fall entirely outside.
pub fn clip_lines(lines: &[Vec<Coord>], rect: &BoundingBox) -> Vec<Vec<Coord>> {
    lines
        .iter()
        .flat_map(|line| clip_polyline(line, rect))
        .collect()
}

/// GeoJSON `Polygon` value from a single exterior ring.
pub fn polygon_value(ring: &[Coord]) -> Value {
    Value::Polygon(vec![ring.iter().map(|c| vec![c[0], c[1]]).collect()])
}

/// GeoJSON `LineString` value from a polyline.
pub fn line_value(line: &[Coord]) -> Value {
    Value::LineString(line.iter().map(|c| vec![c[0], c[1]]).collect())
}

fn positions_to_coords(positions: &[Vec<f64>]) -> Option<Vec<Coord>> {
    positions
        .iter()
        .map(|p| {
            if p.len() >= 2 {
                Some([p[0], p[1]])
            } else {
                None
            }
        })
        .collect()
}

/// Line parts of a GeoJSON geometry value (`LineString` or `MultiLineString`).
pub fn lines_from_value(value: &Value) -> Option<Vec<Vec<Coord>>> {
    match value {
        Value::LineString(positions) => Some(vec![positions_to_coords(positions)?]),
        Value::MultiLineString(lines) => lines
            .iter()
            .map(|positions| positions_to_coords(positions))
            .collect(),
        _ => None,
    }
}

/// Exterior ring of a GeoJSON `Polygon` (or first polygon of a `MultiPolygon`).
pub fn ring_from_value(value: &Value) -> Option<Vec<Coord>> {
    match value {
        Value::Polygon(rings) => positions_to_coords(rings.first()?),
        Value::MultiPolygon(polys) => positions_to_coords(polys.first()?.first()?),
        _ => None,
    }
}
