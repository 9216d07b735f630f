mod patch;
mod preprocess;
pub mod transform;
pub mod types;

pub use patch::PatchTracker;
pub use preprocess::{normalized_cross_correlation, patch_variance, GrayFrame};
pub use transform::{fit_transform, Affine2, TransformFit};
pub use types::{MaskTracker, TrackOutcome};

use crate::config::TrackerConfig;
use crate::error::Result;

/// Create the default tracker (sparse patch correspondence + least-squares fit)
pub fn create_default_tracker(config: TrackerConfig) -> Result<Box<dyn MaskTracker>> {
    let tracker = PatchTracker::new(config)?;
    Ok(Box::new(tracker))
}
