use image::{GrayImage, RgbImage};
use ndarray::{s, Array2, ArrayView2};

/// Luminance raster normalized to [0, 1], indexed `[[y, x]]`
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    data: Array2<f32>,
}

impl GrayFrame {
    /// Convert an RGB frame using Rec. 601 luma weights
    pub fn from_rgb(image: &RgbImage) -> Self {
        let _span = tracing::debug_span!("preprocess").entered();

        let (width, height) = image.dimensions();
        let data = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            let pixel = image.get_pixel(x as u32, y as u32);
            (0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32) / 255.0
        });
        Self { data }
    }

    pub fn from_luma(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let data = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            image.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
        });
        Self { data }
    }

    pub fn from_array(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn width(&self) -> u32 {
        self.data.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.data.nrows() as u32
    }

    /// Returns (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Square patch of side `2 * radius + 1` centred on `(cx, cy)`, or `None`
    /// if any part of it falls outside the frame
    pub fn patch(&self, cx: i64, cy: i64, radius: usize) -> Option<ArrayView2<'_, f32>> {
        let r = radius as i64;
        let (x0, y0, x1, y1) = (cx - r, cy - r, cx + r + 1, cy + r + 1);
        if x0 < 0 || y0 < 0 || x1 > self.data.ncols() as i64 || y1 > self.data.nrows() as i64 {
            return None;
        }
        Some(
            self.data
                .slice(s![y0 as usize..y1 as usize, x0 as usize..x1 as usize]),
        )
    }
}

/// Intensity variance of a patch
pub fn patch_variance(patch: &ArrayView2<'_, f32>) -> f32 {
    let n = patch.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = patch.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = patch.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    var as f32
}

/// Normalized cross-correlation of two equally sized patches, in [-1, 1].
/// A flat patch correlates with nothing and scores 0.
pub fn normalized_cross_correlation(a: &ArrayView2<'_, f32>, b: &ArrayView2<'_, f32>) -> f32 {
    debug_assert_eq!(a.dim(), b.dim());
    let n = a.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_a = a.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&v| v as f64).sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&va, &vb) in a.iter().zip(b.iter()) {
        let da = va as f64 - mean_a;
        let db = vb as f64 - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a < 1e-12 || var_b < 1e-12 {
        return 0.0;
    }
    (cov / (var_a * var_b).sqrt()).clamp(-1.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::{Luma, Rgb};

    #[test]
    fn test_from_rgb_normalizes() {
        let image = RgbImage::from_pixel(4, 3, Rgb([255, 255, 255]));
        let frame = GrayFrame::from_rgb(&image);
        assert_eq!(frame.dimensions(), (4, 3));
        assert_abs_diff_eq!(frame.view()[[2, 3]], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_patch_bounds() {
        let frame = GrayFrame::from_luma(&GrayImage::from_pixel(10, 8, Luma([0])));
        assert!(frame.patch(5, 4, 2).is_some());
        assert_eq!(frame.patch(5, 4, 2).unwrap().dim(), (5, 5));
        assert!(frame.patch(1, 4, 2).is_none());
        assert!(frame.patch(5, 6, 2).is_none());
        assert!(frame.patch(7, 5, 2).is_some());
    }

    #[test]
    fn test_ncc() {
        let a = Array2::from_shape_fn((5, 5), |(y, x)| ((x * 7 + y * 13) % 11) as f32 / 10.0);
        let scaled = a.mapv(|v| 0.5 * v + 0.2);
        let inverted = a.mapv(|v| 1.0 - v);
        let flat = Array2::from_elem((5, 5), 0.5f32);

        assert_abs_diff_eq!(normalized_cross_correlation(&a.view(), &scaled.view()), 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(normalized_cross_correlation(&a.view(), &inverted.view()), -1.0, epsilon = 1e-5);
        assert_eq!(normalized_cross_correlation(&a.view(), &flat.view()), 0.0);
        assert_eq!(patch_variance(&flat.view()), 0.0);
        assert!(patch_variance(&a.view()) > 0.0);
    }
}
