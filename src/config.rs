//! Tunable parameters for tracking, sessions and mask export

use crate::error::{MaskError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Transform family fitted to matched sample points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformModel {
    Translation,
    /// Rotation, uniform scale and translation
    #[default]
    Similarity,
    Affine,
}

impl TransformModel {
    /// Matched points needed to determine the transform
    pub fn min_points(&self) -> usize {
        match self {
            Self::Translation => 1,
            Self::Similarity => 2,
            Self::Affine => 3,
        }
    }
}

/// How overlapping polygons share a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// One layer per polygon name; overlaps stay distinguishable
    #[default]
    Separate,
    /// Single layer holding the union of all polygons
    Flatten,
}

impl std::str::FromStr for OverlapPolicy {
    type Err = MaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "separate" => Ok(Self::Separate),
            "flatten" => Ok(Self::Flatten),
            other => Err(MaskError::config(format!("unknown overlap policy '{}'", other))),
        }
    }
}

/// Configuration for the patch correspondence tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Half-size of the matching patch (patch side = 2r+1)
    pub patch_radius: u32,
    /// Largest displacement searched in each axis, in pixels
    pub search_radius: u32,
    /// Normalized cross-correlation a match must reach to count as converged
    pub min_correlation: f32,
    /// Minimum intensity variance (0..1 scale) for a patch to be trackable
    pub min_texture: f32,
    /// Offset of the four extra samples placed around each vertex
    pub vertex_shift: f32,
    /// Spacing of interior grid samples
    pub grid_step: f32,
    /// Upper bound on samples per step
    pub max_samples: usize,
    /// Max deviation from the median displacement before a match is an outlier
    pub outlier_threshold: f32,
    /// Fewer inlier matches than this is a hard failure
    pub min_matches: usize,
    pub transform: TransformModel,
    /// Fit RMS residual (pixels) at which confidence is halved
    pub residual_scale: f32,
    /// Smallest area (square pixels) a tracked polygon may keep
    pub min_area: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            patch_radius: 7,
            search_radius: 8,
            min_correlation: 0.85,
            min_texture: 1e-4,
            vertex_shift: 5.0,
            grid_step: 8.0,
            max_samples: 256,
            outlier_threshold: 10.0,
            min_matches: 3,
            transform: TransformModel::Similarity,
            residual_scale: 2.0,
            min_area: 1.0,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.patch_radius == 0 {
            return Err(MaskError::config("patch_radius must be at least 1"));
        }
        if self.search_radius == 0 {
            return Err(MaskError::config("search_radius must be at least 1"));
        }
        if !(self.grid_step > 0.0) {
            return Err(MaskError::config("grid_step must be positive"));
        }
        if !(-1.0..=1.0).contains(&self.min_correlation) {
            return Err(MaskError::config("min_correlation must lie in [-1, 1]"));
        }
        if self.min_matches < self.transform.min_points() {
            return Err(MaskError::config(format!(
                "min_matches {} is below the {} points a {:?} fit needs",
                self.min_matches,
                self.transform.min_points(),
                self.transform
            )));
        }
        if !(self.residual_scale > 0.0) {
            return Err(MaskError::config("residual_scale must be positive"));
        }
        Ok(())
    }
}

/// Configuration for track sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Steps scoring below this pause the session at a checkpoint
    pub confidence_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
        }
    }
}

/// Configuration for rasterization and contour extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    pub overlap: OverlapPolicy,
    /// Douglas-Peucker tolerance in pixels; 0 keeps every corner
    pub simplify_tolerance: f32,
    /// Cap on points per extracted contour; 0 means unlimited
    pub max_points: usize,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            overlap: OverlapPolicy::Separate,
            simplify_tolerance: 0.0,
            max_points: 0,
        }
    }
}

/// All settings, loadable from a JSON file with every field optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tracker: TrackerConfig,
    pub session: SessionConfig,
    pub raster: RasterConfig,
}

impl Settings {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        if !(0.0..=1.0).contains(&self.session.confidence_threshold) {
            return Err(MaskError::config("confidence_threshold must lie in [0, 1]"));
        }
        if self.raster.simplify_tolerance < 0.0 {
            return Err(MaskError::config("simplify_tolerance must not be negative"));
        }
        Ok(())
    }
}
