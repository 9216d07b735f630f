use super::preprocess::{normalized_cross_correlation, patch_variance, GrayFrame};
use super::transform::fit_transform;
use super::types::{MaskTracker, TrackOutcome};
use crate::config::TrackerConfig;
use crate::error::{Result, TrackingFailure};
use crate::geometry::{Point, Polygon};
use ndarray::Array2;
use rayon::prelude::*;

/// Outcome of searching for one sample point in the next frame
#[derive(Debug, Clone, Copy, PartialEq)]
enum SampleMatch {
    /// Patch leaves the frame or has too little texture to search
    Untrackable,
    /// Searched, but nothing correlated well enough
    Lost,
    Matched { source: Point, target: Point },
}

/// Sparse patch-correspondence tracker
///
/// Samples the polygon's vertices (each with four neighbours offset by
/// `vertex_shift`) plus an interior grid, finds each sample's best
/// normalized cross-correlation match within `search_radius` of its position
/// in the next frame, drops matches that disagree with the median motion,
/// and fits one transform over the survivors. The fitted transform moves the
/// original vertices.
#[derive(Debug, Clone)]
pub struct PatchTracker {
    config: TrackerConfig,
}

impl PatchTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            "PatchTracker: patch_radius={}, search_radius={}, min_correlation={:.2}, transform={:?}",
            config.patch_radius,
            config.search_radius,
            config.min_correlation,
            config.transform
        );
        Ok(Self { config })
    }

    /// Vertex samples plus an interior grid clipped to a `width` x `height` frame
    fn sample_points(&self, polygon: &Polygon, (width, height): (u32, u32)) -> Vec<Point> {
        let shift = self.config.vertex_shift;
        let mut samples = Vec::new();

        for &v in polygon.points() {
            samples.push(v);
            if shift > 0.0 {
                samples.push(v.offset(0.0, -shift));
                samples.push(v.offset(0.0, shift));
                samples.push(v.offset(-shift, 0.0));
                samples.push(v.offset(shift, 0.0));
            }
        }

        // grid cells outside the frame can never be matched
        let step = self.config.grid_step;
        let [min_x, min_y, max_x, max_y] = polygon.bounds();
        let (x0, y0) = (min_x.max(0.0), min_y.max(0.0));
        let (x1, y1) = (max_x.min(width as f32), max_y.min(height as f32));
        if x1 > x0 && y1 > y0 {
            let cols = ((x1 - x0) / step).ceil() as usize;
            let rows = ((y1 - y0) / step).ceil() as usize;
            for row in 0..rows {
                let y = y0 + (row as f32 + 0.5) * step;
                if y >= y1 {
                    break;
                }
                for col in 0..cols {
                    let x = x0 + (col as f32 + 0.5) * step;
                    if x >= x1 {
                        break;
                    }
                    let p = Point::new(x, y);
                    if polygon.contains(p) {
                        samples.push(p);
                    }
                }
            }
        }

        let max = self.config.max_samples;
        if max > 0 && samples.len() > max {
            // even stride keeps coverage over the whole polygon
            let n = samples.len();
            samples = (0..max).map(|i| samples[i * n / max]).collect();
        }
        samples
    }

    fn match_point(&self, prev: &GrayFrame, curr: &GrayFrame, p: Point) -> SampleMatch {
        let radius = self.config.patch_radius as usize;
        let cx = p.x.round() as i64;
        let cy = p.y.round() as i64;

        let template = match prev.patch(cx, cy, radius) {
            Some(t) if patch_variance(&t) >= self.config.min_texture => t,
            _ => return SampleMatch::Untrackable,
        };

        let s = self.config.search_radius as i64;
        let side = (2 * s + 1) as usize;
        let mut scores = Array2::from_elem((side, side), f32::NEG_INFINITY);
        let mut best: Option<(i64, i64, f32)> = None;

        for dy in -s..=s {
            for dx in -s..=s {
                let Some(candidate) = curr.patch(cx + dx, cy + dy, radius) else {
                    continue;
                };
                let score = normalized_cross_correlation(&template, &candidate);
                scores[[(dy + s) as usize, (dx + s) as usize]] = score;
                // strict comparison keeps the first maximum in scan order
                if best.map_or(true, |(_, _, b)| score > b) {
                    best = Some((dx, dy, score));
                }
            }
        }

        let Some((dx, dy, score)) = best else {
            return SampleMatch::Lost;
        };
        if score < self.config.min_correlation || dx.abs() == s || dy.abs() == s {
            // a peak on the window edge may continue outside it
            return SampleMatch::Lost;
        }

        let (ix, iy) = ((dx + s) as usize, (dy + s) as usize);
        let ox = parabolic_peak(scores[[iy, ix - 1]], score, scores[[iy, ix + 1]]);
        let oy = parabolic_peak(scores[[iy - 1, ix]], score, scores[[iy + 1, ix]]);

        SampleMatch::Matched {
            source: p,
            target: p.offset(dx as f32 + ox, dy as f32 + oy),
        }
    }
}

/// Sub-pixel offset of the vertex of the parabola through three samples
fn parabolic_peak(left: f32, centre: f32, right: f32) -> f32 {
    if !left.is_finite() || !right.is_finite() {
        return 0.0;
    }
    let denom = left - 2.0 * centre + right;
    if denom.abs() < 1e-6 {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl MaskTracker for PatchTracker {
    fn track(
        &self,
        prev: &GrayFrame,
        curr: &GrayFrame,
        polygon: &Polygon,
    ) -> std::result::Result<TrackOutcome, TrackingFailure> {
        let _span = tracing::debug_span!("track_step").entered();

        if prev.dimensions() != curr.dimensions() {
            return Err(TrackingFailure::DimensionMismatch {
                prev: prev.dimensions(),
                curr: curr.dimensions(),
            });
        }

        let samples = self.sample_points(polygon, prev.dimensions());

        // collect() keeps sample order, so results are independent of scheduling
        let results: Vec<SampleMatch> = {
            let _search = tracing::debug_span!("correspondence").entered();
            samples
                .par_iter()
                .map(|&p| self.match_point(prev, curr, p))
                .collect()
        };

        let sampled = results
            .iter()
            .filter(|r| !matches!(r, SampleMatch::Untrackable))
            .count();
        let pairs: Vec<(Point, Point)> = results
            .iter()
            .filter_map(|r| match *r {
                SampleMatch::Matched { source, target } => Some((source, target)),
                _ => None,
            })
            .collect();

        let required = self.config.min_matches;
        if pairs.len() < required {
            return Err(TrackingFailure::TooFewMatches {
                matched: pairs.len(),
                required,
            });
        }

        let mut dxs: Vec<f32> = pairs.iter().map(|(s, t)| t.x - s.x).collect();
        let mut dys: Vec<f32> = pairs.iter().map(|(s, t)| t.y - s.y).collect();
        let (mdx, mdy) = (median(&mut dxs), median(&mut dys));
        let limit = self.config.outlier_threshold;

        let (src, dst): (Vec<Point>, Vec<Point>) = pairs
            .into_iter()
            .filter(|(s, t)| {
                ((t.x - s.x) - mdx).abs() <= limit && ((t.y - s.y) - mdy).abs() <= limit
            })
            .unzip();

        if src.len() < required {
            return Err(TrackingFailure::TooFewMatches {
                matched: src.len(),
                required,
            });
        }

        let fit = fit_transform(self.config.transform, &src, &dst)
            .ok_or(TrackingFailure::DegenerateTransform)?;
        if !(fit.transform.determinant() > 0.0) {
            return Err(TrackingFailure::DegenerateTransform);
        }

        let next = polygon
            .map_points(|p| fit.transform.apply(p))
            .map_err(|_| TrackingFailure::DegeneratePolygon)?;
        let same_orientation = (next.signed_area() > 0.0) == (polygon.signed_area() > 0.0);
        if !same_orientation || next.area() < self.config.min_area {
            return Err(TrackingFailure::DegeneratePolygon);
        }

        let match_fraction = src.len() as f32 / sampled as f32;
        let fit_quality = 1.0 / (1.0 + fit.rms as f32 / self.config.residual_scale);
        let confidence = (match_fraction * fit_quality).clamp(0.0, 1.0);

        tracing::debug!(
            "Tracked {} of {} samples, motion=({:.2}, {:.2}), rms={:.3}, confidence={:.3}",
            src.len(),
            sampled,
            mdx,
            mdy,
            fit.rms,
            confidence
        );

        Ok(TrackOutcome {
            polygon: next,
            confidence,
            matched: src.len(),
            sampled,
            residual: fit.rms,
        })
    }
}
