//! Points and validated closed polygons in image pixel space

use crate::error::{MaskError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 2D point in image pixel coordinates (x right, y down).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f32; 2]> for Point {
    fn from(p: [f32; 2]) -> Self {
        Self::new(p[0], p[1])
    }
}

impl From<Point> for [f32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// A closed polygon: at least three points, the last implicitly joined to
/// the first, and no zero-length edge anywhere (closing edge included).
///
/// The only way to obtain a `Polygon` is through validation, so every value
/// of this type upholds the invariant. Deserialization validates too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f32; 2]>", into = "Vec<[f32; 2]>")]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub const MIN_POINTS: usize = 3;

    pub fn new(points: Vec<Point>) -> Result<Self> {
        if points.len() < Self::MIN_POINTS {
            return Err(MaskError::invalid_polygon(format!(
                "{} points given, at least {} required",
                points.len(),
                Self::MIN_POINTS
            )));
        }
        if let Some(bad) = points.iter().position(|p| !p.is_finite()) {
            return Err(MaskError::invalid_polygon(format!(
                "point {} has a non-finite coordinate",
                bad
            )));
        }
        for i in 0..points.len() {
            let next = (i + 1) % points.len();
            if points[i] == points[next] {
                return Err(MaskError::invalid_polygon(format!(
                    "zero-length edge between points {} and {} at {}",
                    i, next, points[i]
                )));
            }
        }
        Ok(Self { points })
    }

    /// Build from raw `(x, y)` pairs.
    pub fn from_coords(coords: &[(f32, f32)]) -> Result<Self> {
        Self::new(coords.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Edges as `(start, end)` pairs, closing edge last.
    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    /// Shoelace area. Positive when the points run clockwise on screen
    /// (y pointing down), negative otherwise.
    pub fn signed_area(&self) -> f64 {
        let twice: f64 = self
            .edges()
            .map(|(a, b)| a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64)
            .sum();
        twice / 2.0
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Axis-aligned bounds as `[min_x, min_y, max_x, max_y]`.
    pub fn bounds(&self) -> [f32; 4] {
        self.points.iter().fold(
            [f32::MAX, f32::MAX, f32::MIN, f32::MIN],
            |[x0, y0, x1, y1], p| [x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)],
        )
    }

    /// Even-odd containment test.
    pub fn contains(&self, p: Point) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.y > p.y) != (b.y > p.y) {
                let t = (p.y - a.y) / (b.y - a.y);
                if p.x < a.x + t * (b.x - a.x) {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Apply `f` to every vertex, re-validating the result.
    pub fn map_points<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(Point) -> Point,
    {
        Self::new(self.points.iter().map(|&p| f(p)).collect())
    }

    /// Shift every vertex. Fails if f32 rounding at large offsets merges
    /// neighbouring vertices.
    pub fn translated(&self, dx: f32, dy: f32) -> Result<Self> {
        self.map_points(|p| p.offset(dx, dy))
    }

    /// Per-vertex linear interpolation towards `other` at fraction `t`.
    ///
    /// Returns `None` when the vertex counts differ or the blend collapses
    /// an edge.
    pub fn lerp(&self, other: &Polygon, t: f32) -> Option<Self> {
        if self.len() != other.len() {
            return None;
        }
        let points = self
            .points
            .iter()
            .zip(other.points.iter())
            .map(|(a, b)| Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t))
            .collect();
        Self::new(points).ok()
    }
}

impl TryFrom<Vec<[f32; 2]>> for Polygon {
    type Error = MaskError;

    fn try_from(coords: Vec<[f32; 2]>) -> Result<Self> {
        Self::new(coords.into_iter().map(Point::from).collect())
    }
}

impl From<Polygon> for Vec<[f32; 2]> {
    fn from(polygon: Polygon) -> Self {
        polygon.points.into_iter().map(Into::into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use assert_matches::assert_matches;

    fn square(x: f32, y: f32, side: f32) -> Polygon {
        Polygon::from_coords(&[(x, y), (x + side, y), (x + side, y + side), (x, y + side)])
            .unwrap()
    }

    #[test]
    fn test_rejects_two_points() {
        let result = Polygon::from_coords(&[(0.0, 0.0), (1.0, 1.0)]);
        assert_matches!(result, Err(MaskError::InvalidPolygon(_)));
    }

    #[test]
    fn test_rejects_zero_length_edges() {
        let repeated = Polygon::from_coords(&[(0.0, 0.0), (5.0, 0.0), (5.0, 0.0), (0.0, 5.0)]);
        assert_matches!(repeated, Err(MaskError::InvalidPolygon(_)));

        // closing edge counts too
        let closed = Polygon::from_coords(&[(0.0, 0.0), (5.0, 0.0), (0.0, 5.0), (0.0, 0.0)]);
        assert_matches!(closed, Err(MaskError::InvalidPolygon(_)));
    }

    #[test]
    fn test_rejects_nan() {
        let result = Polygon::from_coords(&[(0.0, 0.0), (f32::NAN, 0.0), (0.0, 5.0)]);
        assert_matches!(result, Err(MaskError::InvalidPolygon(_)));
    }

    #[test]
    fn test_area_and_orientation() {
        let sq = square(0.0, 0.0, 10.0);
        assert_abs_diff_eq!(sq.signed_area(), 100.0, epsilon = 1e-9);

        let reversed =
            Polygon::from_coords(&[(0.0, 10.0), (10.0, 10.0), (10.0, 0.0), (0.0, 0.0)]).unwrap();
        assert_abs_diff_eq!(reversed.signed_area(), -100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(reversed.area(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_contains() {
        let sq = square(10.0, 10.0, 20.0);
        assert!(sq.contains(Point::new(15.0, 15.0)));
        assert!(!sq.contains(Point::new(5.0, 15.0)));
        assert!(!sq.contains(Point::new(35.0, 35.0)));
    }

    #[test]
    fn test_bounds() {
        let sq = square(2.0, 4.0, 6.0);
        assert_eq!(sq.bounds(), [2.0, 4.0, 8.0, 10.0]);
    }

    #[test]
    fn test_translate_revalidates() {
        let tri = Polygon::from_coords(&[(0.0, 0.0), (0.001, 0.0), (0.0, 1.0)]).unwrap();
        let moved = tri.translated(3.0, -1.0).unwrap();
        assert_abs_diff_eq!(moved.points()[1].x, 3.001, epsilon = 1e-5);

        // at 1e8 the first two vertices round to the same f32
        assert_matches!(tri.translated(1.0e8, 0.0), Err(MaskError::InvalidPolygon(_)));
    }

    #[test]
    fn test_lerp() {
        let a = square(0.0, 0.0, 10.0);
        let b = a.translated(10.0, 0.0).unwrap();
        let mid = a.lerp(&b, 0.5).unwrap();
        assert_abs_diff_eq!(mid.points()[0].x, 5.0, epsilon = 1e-6);

        let tri = Polygon::from_coords(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]).unwrap();
        assert!(a.lerp(&tri, 0.5).is_none());
    }

    #[test]
    fn test_serde_validates() {
        let json = "[[0.0,0.0],[4.0,0.0],[4.0,3.0]]";
        let tri: Polygon = serde_json::from_str(json).unwrap();
        assert_eq!(tri.len(), 3);

        let bad: std::result::Result<Polygon, _> = serde_json::from_str("[[0.0,0.0],[4.0,0.0]]");
        assert!(bad.is_err());
    }
}
