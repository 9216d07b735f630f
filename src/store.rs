//! Per-frame polygon storage
//!
//! Annotations are flat records keyed by `(frame_index, polygon_name)`. A
//! tracked polygon is linked across frames only by sharing a name, so frames
//! can be edited, deleted and persisted independently of each other.

use crate::error::{MaskError, Result};
use crate::geometry::{Point, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::ops::RangeBounds;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Named polygons present on one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAnnotation {
    polygons: BTreeMap<String, Polygon>,
}

impl FrameAnnotation {
    pub fn get(&self, name: &str) -> Option<&Polygon> {
        self.polygons.get(name)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Polygon> {
        self.polygons.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.polygons.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }
}

impl<'a> IntoIterator for &'a FrameAnnotation {
    type Item = (&'a String, &'a Polygon);
    type IntoIter = btree_map::Iter<'a, String, Polygon>;

    fn into_iter(self) -> Self::IntoIter {
        self.polygons.iter()
    }
}

/// Serialized form of one named polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonRecord {
    pub name: String,
    pub points: Polygon,
}

/// Serialized form of one frame's annotations, the unit a project file embeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub polygons: Vec<PolygonRecord>,
}

/// Frame-indexed polygon store shared between sessions.
///
/// Every mutation happens under one mutex, so concurrent sessions writing
/// different polygon names never race on the underlying map.
#[derive(Debug, Default)]
pub struct PolygonStore {
    frames: Mutex<BTreeMap<u64, FrameAnnotation>>,
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MaskError::InvalidName);
    }
    Ok(())
}

impl PolygonStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, FrameAnnotation>> {
        // Each mutation is a single map operation, so a panicking holder
        // cannot leave the map half-updated.
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new polygon. Fails if the name is already used on that frame.
    pub fn insert(&self, frame_index: u64, name: impl Into<String>, polygon: Polygon) -> Result<()> {
        let name = name.into();
        check_name(&name)?;
        let mut frames = self.lock();
        let annotation = frames.entry(frame_index).or_default();
        if annotation.polygons.contains_key(&name) {
            return Err(MaskError::DuplicatePolygon { frame_index, name });
        }
        annotation.polygons.insert(name, polygon);
        Ok(())
    }

    /// Validate raw points and insert them as a new polygon.
    pub fn insert_points(
        &self,
        frame_index: u64,
        name: impl Into<String>,
        points: Vec<Point>,
    ) -> Result<()> {
        let polygon = Polygon::new(points)?;
        self.insert(frame_index, name, polygon)
    }

    /// Insert or overwrite, returning the previous polygon if any.
    pub fn replace(
        &self,
        frame_index: u64,
        name: impl Into<String>,
        polygon: Polygon,
    ) -> Result<Option<Polygon>> {
        let name = name.into();
        check_name(&name)?;
        let mut frames = self.lock();
        Ok(frames
            .entry(frame_index)
            .or_default()
            .polygons
            .insert(name, polygon))
    }

    pub fn get(&self, frame_index: u64, name: &str) -> Option<Polygon> {
        self.lock()
            .get(&frame_index)
            .and_then(|annotation| annotation.polygons.get(name).cloned())
    }

    pub fn frame(&self, frame_index: u64) -> Option<FrameAnnotation> {
        self.lock().get(&frame_index).cloned()
    }

    /// Remove one polygon. A frame left without polygons disappears.
    pub fn remove(&self, frame_index: u64, name: &str) -> Option<Polygon> {
        let mut frames = self.lock();
        let annotation = frames.get_mut(&frame_index)?;
        let removed = annotation.polygons.remove(name);
        if annotation.polygons.is_empty() {
            frames.remove(&frame_index);
        }
        removed
    }

    pub fn remove_frame(&self, frame_index: u64) -> Option<FrameAnnotation> {
        self.lock().remove(&frame_index)
    }

    /// Annotated frames within `range`, ascending.
    pub fn range<R: RangeBounds<u64>>(&self, range: R) -> Vec<(u64, FrameAnnotation)> {
        self.lock()
            .range(range)
            .map(|(&index, annotation)| (index, annotation.clone()))
            .collect()
    }

    /// Every stored instance of `name` within `range`, ascending by frame.
    pub fn track<R: RangeBounds<u64>>(&self, name: &str, range: R) -> Vec<(u64, Polygon)> {
        self.lock()
            .range(range)
            .filter_map(|(&index, annotation)| {
                annotation.polygons.get(name).map(|p| (index, p.clone()))
            })
            .collect()
    }

    pub fn frame_indices(&self) -> Vec<u64> {
        self.lock().keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Polygon `name` at `frame_index`, filling unannotated frames from the
    /// nearest keyframes.
    ///
    /// Between two keyframes with matching vertex counts the vertices are
    /// blended linearly; otherwise the earlier keyframe holds. Outside the
    /// annotated span the nearest end keyframe is returned.
    pub fn interpolate(&self, name: &str, frame_index: u64) -> Option<Polygon> {
        let frames = self.lock();
        let before = frames
            .range(..=frame_index)
            .rev()
            .find_map(|(&i, a)| a.polygons.get(name).map(|p| (i, p)));
        let after = frames
            .range(frame_index..)
            .find_map(|(&i, a)| a.polygons.get(name).map(|p| (i, p)));

        match (before, after) {
            (Some((i, prev)), _) if i == frame_index => Some(prev.clone()),
            (Some((i, prev)), Some((j, next))) => {
                let t = (frame_index - i) as f32 / (j - i) as f32;
                Some(prev.lerp(next, t).unwrap_or_else(|| prev.clone()))
            }
            (Some((_, prev)), None) => Some(prev.clone()),
            (None, Some((_, next))) => Some(next.clone()),
            (None, None) => None,
        }
    }

    /// Snapshot as serializable records, ascending by frame and name.
    pub fn to_records(&self) -> Vec<FrameRecord> {
        self.lock()
            .iter()
            .map(|(&frame_index, annotation)| FrameRecord {
                frame_index,
                polygons: annotation
                    .polygons
                    .iter()
                    .map(|(name, polygon)| PolygonRecord {
                        name: name.clone(),
                        points: polygon.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn from_records(records: Vec<FrameRecord>) -> Result<Self> {
        let store = Self::new();
        for record in records {
            for polygon in record.polygons {
                store.insert(record.frame_index, polygon.name, polygon.points)?;
            }
        }
        Ok(store)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_records())?)
    }

    /// Load a store from JSON. Malformed JSON is a serialization error;
    /// well-formed records with bad geometry are `InvalidPolygon`.
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<RawFrameRecord> = serde_json::from_str(json)?;
        let store = Self::new();
        for record in records {
            for polygon in record.polygons {
                let points = Polygon::try_from(polygon.points)?;
                store.insert(record.frame_index, polygon.name, points)?;
            }
        }
        Ok(store)
    }
}

// Unvalidated mirrors of the records, so geometry errors keep their own variant
#[derive(Deserialize)]
struct RawPolygonRecord {
    name: String,
    points: Vec<[f32; 2]>,
}

#[derive(Deserialize)]
struct RawFrameRecord {
    frame_index: u64,
    polygons: Vec<RawPolygonRecord>,
}
