//! Least-squares fitting of 2D transforms to matched point pairs

use crate::config::TransformModel;
use crate::geometry::Point;
use nalgebra::{Matrix2, Vector2};

/// `p' = linear * p + translation`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine2 {
    pub linear: Matrix2<f64>,
    pub translation: Vector2<f64>,
}

impl Affine2 {
    pub fn apply(&self, p: Point) -> Point {
        let v = self.linear * Vector2::new(p.x as f64, p.y as f64) + self.translation;
        Point::new(v.x as f32, v.y as f32)
    }

    /// Area scale factor; negative means the transform mirrors
    pub fn determinant(&self) -> f64 {
        self.linear.determinant()
    }
}

/// Fitted transform and its RMS point residual in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformFit {
    pub transform: Affine2,
    pub rms: f64,
}

fn to_vec(p: &Point) -> Vector2<f64> {
    Vector2::new(p.x as f64, p.y as f64)
}

fn mean(points: &[Point]) -> Vector2<f64> {
    points.iter().map(to_vec).sum::<Vector2<f64>>() / points.len() as f64
}

/// Fit `model` mapping `src[i]` onto `dst[i]` in the least-squares sense.
///
/// Works on centred coordinates for conditioning. Returns `None` when the
/// pairs cannot determine the transform (too few, mismatched lengths, all
/// sources coincident, or collinear sources for an affine fit).
pub fn fit_transform(model: TransformModel, src: &[Point], dst: &[Point]) -> Option<TransformFit> {
    if src.len() != dst.len() || src.len() < model.min_points() {
        return None;
    }

    let src_mean = mean(src);
    let dst_mean = mean(dst);
    let pairs: Vec<(Vector2<f64>, Vector2<f64>)> = src
        .iter()
        .zip(dst)
        .map(|(s, d)| (to_vec(s) - src_mean, to_vec(d) - dst_mean))
        .collect();

    let linear = match model {
        TransformModel::Translation => Matrix2::identity(),
        TransformModel::Similarity => {
            // x' = a x - b y, y' = b x + a y on centred coordinates
            let norm: f64 = pairs.iter().map(|(u, _)| u.norm_squared()).sum();
            if norm < 1e-9 {
                return None;
            }
            let a = pairs.iter().map(|(u, v)| u.dot(v)).sum::<f64>() / norm;
            let b = pairs.iter().map(|(u, v)| u.x * v.y - u.y * v.x).sum::<f64>() / norm;
            Matrix2::new(a, -b, b, a)
        }
        TransformModel::Affine => {
            let mut uu = Matrix2::<f64>::zeros();
            let mut vu = Matrix2::<f64>::zeros();
            for (u, v) in &pairs {
                uu += u * u.transpose();
                vu += v * u.transpose();
            }
            let scale = uu.trace() * uu.trace();
            if scale < 1e-9 || uu.determinant().abs() < 1e-9 * scale {
                return None;
            }
            vu * uu.try_inverse()?
        }
    };

    let transform = Affine2 {
        linear,
        translation: dst_mean - linear * src_mean,
    };

    let sq_err: f64 = src
        .iter()
        .zip(dst)
        .map(|(s, d)| (to_vec(&transform.apply(*s)) - to_vec(d)).norm_squared())
        .sum();
    let rms = (sq_err / src.len() as f64).sqrt();

    if !rms.is_finite() {
        return None;
    }
    Some(TransformFit { transform, rms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pts(coords: &[(f32, f32)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn test_translation_fit() {
        let src = pts(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]);
        let dst: Vec<Point> = src.iter().map(|p| p.offset(3.0, -2.0)).collect();
        for model in [TransformModel::Translation, TransformModel::Similarity, TransformModel::Affine] {
            let fit = fit_transform(model, &src, &dst).unwrap();
            let moved = fit.transform.apply(Point::new(5.0, 5.0));
            assert_abs_diff_eq!(moved.x, 8.0, epsilon = 1e-4);
            assert_abs_diff_eq!(moved.y, 3.0, epsilon = 1e-4);
            assert_abs_diff_eq!(fit.rms, 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_similarity_recovers_rotation_and_scale() {
        let angle = 0.2f64;
        let scale = 1.1f64;
        let (sin, cos) = angle.sin_cos();
        let src = pts(&[(0.0, 0.0), (20.0, 0.0), (20.0, 10.0), (0.0, 10.0)]);
        let dst: Vec<Point> = src
            .iter()
            .map(|p| {
                let (x, y) = (p.x as f64, p.y as f64);
                Point::new(
                    (scale * (cos * x - sin * y) + 4.0) as f32,
                    (scale * (sin * x + cos * y) - 1.0) as f32,
                )
            })
            .collect();

        let fit = fit_transform(TransformModel::Similarity, &src, &dst).unwrap();
        assert_abs_diff_eq!(fit.transform.linear[(0, 0)], scale * cos, epsilon = 1e-4);
        assert_abs_diff_eq!(fit.transform.linear[(1, 0)], scale * sin, epsilon = 1e-4);
        assert_abs_diff_eq!(fit.transform.determinant(), scale * scale, epsilon = 1e-4);
        assert_abs_diff_eq!(fit.transform.translation.x, 4.0, epsilon = 1e-3);
    }

    #[test]
    fn test_affine_recovers_shear() {
        let src = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0)]);
        let dst: Vec<Point> = src.iter().map(|p| Point::new(p.x + 0.5 * p.y, p.y)).collect();
        let fit = fit_transform(TransformModel::Affine, &src, &dst).unwrap();
        assert_abs_diff_eq!(fit.transform.linear[(0, 1)], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.rms, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_degenerate_inputs() {
        let collinear = pts(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
        assert!(fit_transform(TransformModel::Affine, &collinear, &collinear).is_none());

        let coincident = pts(&[(4.0, 4.0), (4.0, 4.0)]);
        assert!(fit_transform(TransformModel::Similarity, &coincident, &coincident).is_none());

        let one = pts(&[(1.0, 1.0)]);
        assert!(fit_transform(TransformModel::Affine, &one, &one).is_none());
        assert!(fit_transform(TransformModel::Translation, &one, &one).is_some());
    }

    #[test]
    fn test_mirror_has_negative_determinant() {
        let src = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let dst: Vec<Point> = src.iter().map(|p| Point::new(-p.x, p.y)).collect();
        let fit = fit_transform(TransformModel::Affine, &src, &dst).unwrap();
        assert!(fit.transform.determinant() < 0.0);
    }
}
