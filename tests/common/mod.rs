#![allow(dead_code)]

use image::{Rgb, RgbImage};
use masktrack::source::MemoryFrameSource;
use masktrack::{Polygon, ProjectContext};
use std::sync::Arc;

pub const WIDTH: u32 = 160;
pub const HEIGHT: u32 = 120;
pub const SIDE: i64 = 40;
pub const MEDIA: &str = "clip";

const BACKGROUND: u8 = 128;
const OCCLUDER: u8 = 20;

/// Deterministic per-pixel noise in [0.15, 0.85]
pub fn noise(x: i64, y: i64) -> f32 {
    let mut h = (x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    h ^= h >> 29;
    h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h ^= h >> 32;
    0.15 + 0.7 * ((h % 1000) as f32 / 999.0)
}

/// Left edge of the moving square on `frame`; it slides 2px right per frame
pub fn square_x(frame: u64) -> f32 {
    40.0 + 2.0 * frame as f32
}

/// Textured square at `(x0, y0)` on a flat background. Pixels left of
/// `occlude_below_x` are painted over with a flat dark occluder.
pub fn render(x0: i64, y0: i64, occlude_below_x: Option<u32>) -> RgbImage {
    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        if occlude_below_x.is_some_and(|limit| x < limit) {
            return Rgb([OCCLUDER; 3]);
        }
        let (lx, ly) = (x as i64 - x0, y as i64 - y0);
        if (0..SIDE).contains(&lx) && (0..SIDE).contains(&ly) {
            let v = (noise(lx, ly) * 255.0).round() as u8;
            Rgb([v; 3])
        } else {
            Rgb([BACKGROUND; 3])
        }
    })
}

/// `count` frames of the sliding square, with frame `occluded` (if any)
/// half covered by an occluder
pub fn sliding_square(count: u64, occluded: Option<u64>) -> Vec<RgbImage> {
    (0..count)
        .map(|frame| {
            let occluder = (occluded == Some(frame)).then_some(78);
            render(square_x(frame) as i64, 40, occluder)
        })
        .collect()
}

pub fn square(x: f32, y: f32) -> Polygon {
    Polygon::from_coords(&[(x, y), (x + 40.0, y), (x + 40.0, y + 40.0), (x, y + 40.0)]).unwrap()
}

pub fn context(frames: Vec<RgbImage>) -> ProjectContext {
    let source = MemoryFrameSource::new().with_media(MEDIA, frames);
    ProjectContext::new("media", Arc::new(source))
}

/// Largest vertex distance between two polygons with the same vertex count
pub fn max_vertex_error(a: &Polygon, b: &Polygon) -> f32 {
    assert_eq!(a.len(), b.len());
    a.points()
        .iter()
        .zip(b.points())
        .map(|(p, q)| p.distance_to(q))
        .fold(0.0, f32::max)
}
