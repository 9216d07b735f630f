use super::FrameSource;
use crate::error::{MaskError, Result};
use image::RgbImage;
use std::collections::HashMap;

/// Frames held in memory, keyed by media id
#[derive(Debug, Default, Clone)]
pub struct MemoryFrameSource {
    media: HashMap<String, Vec<RgbImage>>,
}

impl MemoryFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media(mut self, media_id: impl Into<String>, frames: Vec<RgbImage>) -> Self {
        self.insert_media(media_id, frames);
        self
    }

    pub fn insert_media(&mut self, media_id: impl Into<String>, frames: Vec<RgbImage>) {
        self.media.insert(media_id.into(), frames);
    }
}

impl FrameSource for MemoryFrameSource {
    fn get_frame(&self, media_id: &str, frame_index: u64) -> Result<RgbImage> {
        let frames = self
            .media
            .get(media_id)
            .ok_or_else(|| MaskError::frame_unavailable(media_id, frame_index, "unknown media"))?;

        usize::try_from(frame_index)
            .ok()
            .and_then(|i| frames.get(i))
            .cloned()
            .ok_or_else(|| {
                MaskError::frame_unavailable(
                    media_id,
                    frame_index,
                    format!("out of range ({} frames)", frames.len()),
                )
            })
    }

    fn frame_count(&self, media_id: &str) -> Result<u64> {
        self.media
            .get(media_id)
            .map(|frames| frames.len() as u64)
            .ok_or_else(|| MaskError::frame_unavailable(media_id, 0, "unknown media"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_out_of_range_is_unavailable() {
        let source = MemoryFrameSource::new().with_media("clip", vec![RgbImage::new(4, 4); 2]);
        assert_eq!(source.frame_count("clip").unwrap(), 2);
        assert!(source.get_frame("clip", 1).is_ok());
        assert_matches!(
            source.get_frame("clip", 2),
            Err(MaskError::FrameUnavailable { frame_index: 2, .. })
        );
        assert_matches!(
            source.get_frame("other", 0),
            Err(MaskError::FrameUnavailable { .. })
        );
    }
}
