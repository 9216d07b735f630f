use super::FrameSource;
use crate::error::{MaskError, Result};
use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Still-image sequences on disk
///
/// Each media id is a directory under `media_root`; its frames are the image
/// files in that directory, indexed by lexicographic filename order.
pub struct ImageSequenceSource {
    media_root: PathBuf,
    listings: Mutex<HashMap<String, Arc<Vec<PathBuf>>>>,
}

impl ImageSequenceSource {
    pub fn new<P: AsRef<Path>>(media_root: P) -> Self {
        let media_root = media_root.as_ref().to_path_buf();
        tracing::info!("Reading frame sequences from {}", media_root.display());
        Self {
            media_root,
            listings: Mutex::new(HashMap::new()),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// Path of frame `frame_index`, for callers that want the file name
    pub fn frame_path(&self, media_id: &str, frame_index: u64) -> Result<PathBuf> {
        let listing = self.listing(media_id)?;
        usize::try_from(frame_index)
            .ok()
            .and_then(|i| listing.get(i))
            .cloned()
            .ok_or_else(|| {
                MaskError::frame_unavailable(
                    media_id,
                    frame_index,
                    format!("out of range ({} frames)", listing.len()),
                )
            })
    }

    fn listing(&self, media_id: &str) -> Result<Arc<Vec<PathBuf>>> {
        let mut listings = self.listings.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listing) = listings.get(media_id) {
            return Ok(Arc::clone(listing));
        }

        let dir = self.media_root.join(media_id);
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            MaskError::frame_unavailable(media_id, 0, format!("{}: {}", dir.display(), e))
        })?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_frame_file(path))
            .collect();
        frames.sort();

        tracing::debug!("Found {} frames for '{}'", frames.len(), media_id);

        let listing = Arc::new(frames);
        listings.insert(media_id.to_string(), Arc::clone(&listing));
        Ok(listing)
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn get_frame(&self, media_id: &str, frame_index: u64) -> Result<RgbImage> {
        let path = self.frame_path(media_id, frame_index)?;
        let decoded = image::open(&path).map_err(|e| {
            MaskError::frame_unavailable(media_id, frame_index, format!("{}: {}", path.display(), e))
        })?;
        Ok(decoded.to_rgb8())
    }

    fn frame_count(&self, media_id: &str) -> Result<u64> {
        Ok(self.listing(media_id)?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use image::Rgb;

    #[test]
    fn test_frames_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip");
        std::fs::create_dir(&clip).unwrap();

        for (name, value) in [("frame_002.png", 20u8), ("frame_000.png", 0), ("frame_001.png", 10)] {
            RgbImage::from_pixel(3, 2, Rgb([value, value, value]))
                .save(clip.join(name))
                .unwrap();
        }
        std::fs::write(clip.join("notes.txt"), "not a frame").unwrap();

        let source = ImageSequenceSource::new(dir.path());
        assert_eq!(source.frame_count("clip").unwrap(), 3);

        let frame = source.get_frame("clip", 1).unwrap();
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.get_pixel(0, 0)[0], 10);

        assert_matches!(
            source.get_frame("clip", 3),
            Err(MaskError::FrameUnavailable { frame_index: 3, .. })
        );
        assert_matches!(source.frame_count("missing"), Err(MaskError::FrameUnavailable { .. }));
    }
}
