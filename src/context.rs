//! Explicit project context threaded through sessions and exports

use crate::config::OverlapPolicy;
use crate::error::{MaskError, Result};
use crate::export::MaskSink;
use crate::raster::rasterize;
use crate::source::{FrameSource, ImageSequenceSource};
use crate::store::PolygonStore;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ActiveSessions = Arc<Mutex<HashSet<(String, String)>>>;

fn lock_active(active: &Mutex<HashSet<(String, String)>>) -> MutexGuard<'_, HashSet<(String, String)>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Media root, frame source, per-media polygon stores and the set of
/// polygons currently being tracked
pub struct ProjectContext {
    media_root: PathBuf,
    source: Arc<dyn FrameSource>,
    stores: Mutex<BTreeMap<String, Arc<PolygonStore>>>,
    active: ActiveSessions,
}

impl ProjectContext {
    pub fn new<P: AsRef<Path>>(media_root: P, source: Arc<dyn FrameSource>) -> Self {
        Self {
            media_root: media_root.as_ref().to_path_buf(),
            source,
            stores: Mutex::new(BTreeMap::new()),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Context reading still-frame directories under `media_root`
    pub fn with_image_sequences<P: AsRef<Path>>(media_root: P) -> Self {
        let source = Arc::new(ImageSequenceSource::new(media_root.as_ref()));
        Self::new(media_root, source)
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn source(&self) -> Arc<dyn FrameSource> {
        Arc::clone(&self.source)
    }

    fn stores(&self) -> MutexGuard<'_, BTreeMap<String, Arc<PolygonStore>>> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Polygon store for `media_id`, created empty on first use
    pub fn store(&self, media_id: &str) -> Arc<PolygonStore> {
        Arc::clone(self.stores().entry(media_id.to_string()).or_default())
    }

    /// Install a loaded store, returning the one it replaces
    pub fn set_store(&self, media_id: &str, store: PolygonStore) -> Option<Arc<PolygonStore>> {
        self.stores().insert(media_id.to_string(), Arc::new(store))
    }

    pub fn media_ids(&self) -> Vec<String> {
        self.stores().keys().cloned().collect()
    }

    /// Reserve `(media_id, polygon_name)` for one tracking session.
    /// The reservation is released when the claim is dropped.
    pub fn claim(&self, media_id: &str, polygon_name: &str) -> Result<SessionClaim> {
        let key = (media_id.to_string(), polygon_name.to_string());
        if !lock_active(&self.active).insert(key.clone()) {
            return Err(MaskError::SessionBusy {
                media_id: key.0,
                polygon_name: key.1,
            });
        }
        Ok(SessionClaim {
            active: Arc::clone(&self.active),
            key,
        })
    }

    pub fn is_tracking(&self, media_id: &str, polygon_name: &str) -> bool {
        lock_active(&self.active).contains(&(media_id.to_string(), polygon_name.to_string()))
    }

    /// Rasterize every annotated frame of `media_id` into `sink`.
    ///
    /// Each frame is written under the stem `<media_id>_<frame:06>`, sized
    /// like the source frame. Returns the number of frames exported.
    pub fn export_media(
        &self,
        media_id: &str,
        sink: &mut dyn MaskSink,
        overlap: OverlapPolicy,
        caption: Option<&str>,
    ) -> Result<usize> {
        let store = self.store(media_id);
        let frames = store.range(..);
        for (frame_index, annotation) in &frames {
            let (width, height) = self.source.get_frame(media_id, *frame_index)?.dimensions();
            let mask = rasterize(annotation, width, height, overlap);
            let stem = format!("{}_{:06}", media_id, frame_index);
            sink.write_mask(&stem, &mask)?;
            if let Some(text) = caption {
                sink.write_caption(&stem, text)?;
            }
        }
        tracing::info!("Exported {} frames of '{}'", frames.len(), media_id);
        Ok(frames.len())
    }
}

/// Exclusive right to track one polygon of one media item
#[derive(Debug)]
pub struct SessionClaim {
    active: ActiveSessions,
    key: (String, String),
}

impl SessionClaim {
    pub fn polygon_name(&self) -> &str {
        &self.key.1
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        lock_active(&self.active).remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFrameSource;
    use assert_matches::assert_matches;

    fn context() -> ProjectContext {
        ProjectContext::new("media", Arc::new(MemoryFrameSource::new()))
    }

    #[test]
    fn test_store_is_shared_per_media() {
        let ctx = context();
        let a = ctx.store("clip");
        let b = ctx.store("clip");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &ctx.store("other")));
        assert_eq!(ctx.media_ids(), vec!["clip".to_string(), "other".to_string()]);
    }

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let ctx = context();
        let claim = ctx.claim("clip", "hand").unwrap();
        assert_eq!(claim.polygon_name(), "hand");
        assert!(ctx.is_tracking("clip", "hand"));

        assert_matches!(
            ctx.claim("clip", "hand"),
            Err(MaskError::SessionBusy { ref polygon_name, .. }) if polygon_name == "hand"
        );
        let other = ctx.claim("clip", "face");
        assert!(other.is_ok());

        drop(claim);
        assert!(!ctx.is_tracking("clip", "hand"));
        assert!(ctx.claim("clip", "hand").is_ok());
    }
}
