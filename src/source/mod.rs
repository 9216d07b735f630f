mod memory;
mod sequence;

pub use memory::MemoryFrameSource;
pub use sequence::ImageSequenceSource;

use crate::error::Result;
use image::RgbImage;

/// Trait for decoded frame providers
///
/// Implementations may block on disk or decoder I/O. Sessions call them
/// synchronously, one frame at a time.
pub trait FrameSource: Send + Sync {
    /// Decode frame `frame_index` of `media_id`
    ///
    /// Returns `MaskError::FrameUnavailable` when the frame is out of range
    /// or cannot be decoded.
    fn get_frame(&self, media_id: &str, frame_index: u64) -> Result<RgbImage>;

    /// Number of frames available for `media_id`
    fn frame_count(&self, media_id: &str) -> Result<u64>;
}
