//! Conversion between polygons and binary masks
//!
//! Pixels are sampled at their centres `(x + 0.5, y + 0.5)` with the
//! even-odd rule. Contours extracted by [`vectorize`] run along pixel edges,
//! so filling them again reproduces the source mask bit for bit when no
//! simplification tolerance is applied.

pub use crate::config::OverlapPolicy;

use crate::config::RasterConfig;
use crate::error::{MaskError, Result};
use crate::geometry::{Point, Polygon};
use crate::store::FrameAnnotation;
use image::{GrayImage, Luma};
use rayon::prelude::*;
use std::collections::BTreeSet;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Label of the single layer produced by [`OverlapPolicy::Flatten`]
pub const UNION_LABEL: &str = "union";

/// One binary layer of a mask
#[derive(Debug, Clone, PartialEq)]
pub struct MaskLayer {
    pub label: String,
    pub mask: GrayImage,
}

/// Mask for one frame: one layer per polygon name, or a single union layer
#[derive(Debug, Clone, PartialEq)]
pub struct MaskImage {
    width: u32,
    height: u32,
    overlap: OverlapPolicy,
    layers: Vec<MaskLayer>,
}

impl MaskImage {
    /// Policy the layers were built with; `Flatten` means one union layer
    pub fn overlap(&self) -> OverlapPolicy {
        self.overlap
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layers(&self) -> &[MaskLayer] {
        &self.layers
    }

    pub fn layer(&self, label: &str) -> Option<&GrayImage> {
        self.layers.iter().find(|l| l.label == label).map(|l| &l.mask)
    }

    /// Union of all layers
    pub fn union(&self) -> GrayImage {
        let mut out = GrayImage::new(self.width, self.height);
        for layer in &self.layers {
            for (dst, src) in out.pixels_mut().zip(layer.mask.pixels()) {
                if src[0] == FOREGROUND {
                    *dst = Luma([FOREGROUND]);
                }
            }
        }
        out
    }
}

/// Even-odd fill of a set of rings into a fresh binary mask.
///
/// All rings contribute to one parity count, so a hole ring inside an
/// outer ring stays empty.
pub fn fill_rings(rings: &[Polygon], width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    if rings.is_empty() || width == 0 || height == 0 {
        return mask;
    }

    let (min_y, max_y) = rings
        .iter()
        .map(|r| r.bounds())
        .fold((f32::MAX, f32::MIN), |(lo, hi), b| (lo.min(b[1]), hi.max(b[3])));
    let row_start = (min_y.floor().max(0.0) as u32).min(height);
    let row_end = (max_y.ceil().max(0.0) as u32).min(height);

    let mut crossings: Vec<f64> = Vec::new();
    for y in row_start..row_end {
        let cy = y as f64 + 0.5;
        crossings.clear();
        for ring in rings {
            for (a, b) in ring.edges() {
                let (ax, ay, bx, by) = (a.x as f64, a.y as f64, b.x as f64, b.y as f64);
                if (ay <= cy) != (by <= cy) {
                    crossings.push(ax + (cy - ay) * (bx - ax) / (by - ay));
                }
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            // pixel x is inside when span[0] <= x + 0.5 < span[1]
            let start = (span[0] - 0.5).ceil().clamp(0.0, width as f64) as u32;
            let end = (span[1] - 0.5).ceil().clamp(0.0, width as f64) as u32;
            for x in start..end {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
    }
    mask
}

/// Rasterize named polygons into a mask.
///
/// With [`OverlapPolicy::Separate`] each name gets its own layer, so
/// overlapping regions remain attributable to every polygon covering them.
pub fn rasterize_polygons<'a, I>(polygons: I, width: u32, height: u32, overlap: OverlapPolicy) -> MaskImage
where
    I: IntoIterator<Item = (&'a str, &'a Polygon)>,
{
    let _span = tracing::debug_span!("rasterize").entered();

    let named: Vec<(&str, &Polygon)> = polygons.into_iter().collect();
    let mut layers: Vec<MaskLayer> = named
        .par_iter()
        .map(|&(label, polygon)| MaskLayer {
            label: label.to_string(),
            mask: fill_rings(std::slice::from_ref(polygon), width, height),
        })
        .collect();

    if overlap == OverlapPolicy::Flatten {
        let separate = MaskImage {
            width,
            height,
            overlap: OverlapPolicy::Separate,
            layers,
        };
        layers = vec![MaskLayer {
            label: UNION_LABEL.to_string(),
            mask: separate.union(),
        }];
    }

    MaskImage {
        width,
        height,
        overlap,
        layers,
    }
}

/// Rasterize every polygon of a frame annotation
pub fn rasterize(annotation: &FrameAnnotation, width: u32, height: u32, overlap: OverlapPolicy) -> MaskImage {
    rasterize_polygons(
        annotation.iter().map(|(name, polygon)| (name.as_str(), polygon)),
        width,
        height,
        overlap,
    )
}

// Boundary edge directions on the pixel-corner lattice, y pointing down.
const EAST: u8 = 0;
const SOUTH: u8 = 1;
const WEST: u8 = 2;
const NORTH: u8 = 3;

fn step(dir: u8) -> (i64, i64) {
    match dir {
        EAST => (1, 0),
        SOUTH => (0, 1),
        WEST => (-1, 0),
        _ => (0, -1),
    }
}

fn is_foreground(mask: &GrayImage, x: i64, y: i64) -> bool {
    x >= 0
        && y >= 0
        && (x as u32) < mask.width()
        && (y as u32) < mask.height()
        && mask.get_pixel(x as u32, y as u32)[0] >= 128
}

/// Extract boundary rings of a binary mask (pixels >= 128 are foreground).
///
/// Outer boundaries have positive [`Polygon::signed_area`], holes negative.
/// Even-odd filling all returned rings reproduces the mask when
/// `simplify_tolerance` is 0 and `max_points` does not force reduction.
/// Rings that simplification collapses below three points are dropped.
pub fn vectorize(mask: &GrayImage, config: &RasterConfig) -> Vec<Polygon> {
    let _span = tracing::debug_span!("vectorize").entered();

    // Directed unit edges keyed by (y, x, dir) of their start corner, with
    // foreground always on the right-hand side.
    let mut remaining: BTreeSet<(i64, i64, u8)> = BTreeSet::new();
    for y in 0..mask.height() as i64 {
        for x in 0..mask.width() as i64 {
            if !is_foreground(mask, x, y) {
                continue;
            }
            if !is_foreground(mask, x, y - 1) {
                remaining.insert((y, x, EAST));
            }
            if !is_foreground(mask, x + 1, y) {
                remaining.insert((y, x + 1, SOUTH));
            }
            if !is_foreground(mask, x, y + 1) {
                remaining.insert((y + 1, x + 1, WEST));
            }
            if !is_foreground(mask, x - 1, y) {
                remaining.insert((y + 1, x, NORTH));
            }
        }
    }

    let mut rings = Vec::new();
    while let Some(start) = remaining.pop_first() {
        let mut corners: Vec<(i64, i64)> = Vec::new();
        let mut dirs: Vec<u8> = Vec::new();
        let (mut y, mut x, mut dir) = start;

        loop {
            corners.push((x, y));
            dirs.push(dir);
            let (dx, dy) = step(dir);
            x += dx;
            y += dy;

            // Prefer the right turn: diagonal neighbours end up in separate rings.
            let mut next = None;
            for candidate in [(dir + 1) % 4, dir, (dir + 3) % 4] {
                let key = (y, x, candidate);
                if key == start || remaining.remove(&key) {
                    next = Some((key, candidate));
                    break;
                }
            }
            match next {
                Some((key, _)) if key == start => break,
                Some((_, candidate)) => dir = candidate,
                None => break,
            }
        }

        // keep corners only; straight runs collapse into one edge
        let n = dirs.len();
        let points: Vec<Point> = (0..n)
            .filter(|&i| dirs[(i + n - 1) % n] != dirs[i])
            .map(|i| Point::new(corners[i].0 as f32, corners[i].1 as f32))
            .collect();

        let points = reduce_ring(points, config);
        if let Ok(ring) = Polygon::new(points) {
            if ring.area() > 0.0 {
                rings.push(ring);
            }
        }
    }

    tracing::debug!("Extracted {} contours", rings.len());
    rings
}

/// Largest outer contour of a mask, used to seed tracking from a mask file
pub fn seed_polygon(mask: &GrayImage, config: &RasterConfig) -> Result<Polygon> {
    vectorize(mask, config)
        .into_iter()
        .filter(|ring| ring.signed_area() > 0.0)
        .max_by(|a, b| a.area().total_cmp(&b.area()))
        .ok_or_else(|| MaskError::invalid_polygon("mask contains no foreground region"))
}

fn reduce_ring(points: Vec<Point>, config: &RasterConfig) -> Vec<Point> {
    let mut tolerance = config.simplify_tolerance;
    let mut reduced = simplify_ring(&points, tolerance);
    if config.max_points == 0 {
        return reduced;
    }

    let target = config.max_points.max(Polygon::MIN_POINTS);
    if tolerance <= 0.0 {
        tolerance = 0.5;
    }
    for _ in 0..32 {
        if reduced.len() <= target {
            return reduced;
        }
        tolerance *= 2.0;
        reduced = simplify_ring(&points, tolerance);
    }
    // fall back to an even subsample
    let n = reduced.len();
    (0..target).map(|i| reduced[i * n / target]).collect()
}

/// Douglas-Peucker on a closed ring, split at the vertex farthest from the first
fn simplify_ring(points: &[Point], tolerance: f32) -> Vec<Point> {
    if tolerance <= 0.0 || points.len() <= Polygon::MIN_POINTS {
        return points.to_vec();
    }
    let far = (1..points.len())
        .max_by(|&a, &b| {
            points[0]
                .distance_to(&points[a])
                .total_cmp(&points[0].distance_to(&points[b]))
        })
        .unwrap_or(points.len() / 2);

    let mut first: Vec<Point> = points[..=far].to_vec();
    let mut second: Vec<Point> = points[far..].to_vec();
    second.push(points[0]);

    first = simplify_chain(&first, tolerance);
    second = simplify_chain(&second, tolerance);

    // chain ends are shared: drop the duplicated far point and the closing start
    first.pop();
    second.pop();
    first.extend(second);
    first
}

fn simplify_chain(chain: &[Point], tolerance: f32) -> Vec<Point> {
    if chain.len() < 3 {
        return chain.to_vec();
    }
    let (a, b) = (chain[0], chain[chain.len() - 1]);
    let (index, distance) = chain[1..chain.len() - 1]
        .iter()
        .enumerate()
        .map(|(i, p)| (i + 1, segment_distance(*p, a, b)))
        .fold((0, -1.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });

    if distance <= tolerance {
        return vec![a, b];
    }
    let mut left = simplify_chain(&chain[..=index], tolerance);
    let right = simplify_chain(&chain[index..], tolerance);
    left.pop();
    left.extend(right);
    left
}

fn segment_distance(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return p.distance_to(&a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance_to(&Point::new(a.x + t * dx, a.y + t * dy))
}
