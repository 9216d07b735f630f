use super::GrayFrame;
use crate::error::TrackingFailure;
use crate::geometry::Polygon;

/// Result of propagating a polygon by one frame
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOutcome {
    /// The polygon on the next frame
    pub polygon: Polygon,
    /// Reliability of this step in [0, 1]
    pub confidence: f32,
    /// Sample points that matched and agreed with the consensus motion
    pub matched: usize,
    /// Sample points with enough texture to be searched
    pub sampled: usize,
    /// RMS residual of the fitted transform, in pixels
    pub residual: f64,
}

/// Trait for frame-to-frame mask trackers
/// Allows swapping the correspondence strategy without touching sessions
pub trait MaskTracker: Send + Sync {
    /// Propagate `polygon` from `prev` to `curr`
    ///
    /// # Arguments
    /// * `prev` - Frame the polygon is valid on
    /// * `curr` - The following frame in tracking order (same dimensions)
    /// * `polygon` - Polygon on `prev`
    ///
    /// # Returns
    /// * The propagated polygon with its confidence, or a hard failure.
    ///   Implementations must be deterministic: identical inputs give
    ///   identical outputs.
    fn track(
        &self,
        prev: &GrayFrame,
        curr: &GrayFrame,
        polygon: &Polygon,
    ) -> Result<TrackOutcome, TrackingFailure>;
}
