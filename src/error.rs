//! Error types for the mask tracking core

use thiserror::Error;

/// Result type alias for the mask tracking library
pub type Result<T> = std::result::Result<T, MaskError>;

/// Reasons a single tracking step can fail.
///
/// These are hard failures: the tracker is deterministic, so running the
/// same step again with the same inputs fails the same way.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingFailure {
    #[error("only {matched} sample points matched, at least {required} required")]
    TooFewMatches { matched: usize, required: usize },

    #[error("least-squares fit is degenerate")]
    DegenerateTransform,

    #[error("tracked polygon collapsed to zero or inverted area")]
    DegeneratePolygon,

    #[error("frame dimensions differ: {prev:?} vs {curr:?}")]
    DimensionMismatch { prev: (u32, u32), curr: (u32, u32) },
}

/// Errors surfaced by the polygon store, frame sources and sessions
#[derive(Error, Debug)]
pub enum MaskError {
    #[error("Invalid polygon: {0}")]
    InvalidPolygon(String),

    #[error("Polygon names must be non-empty")]
    InvalidName,

    #[error("Polygon '{name}' already exists on frame {frame_index}")]
    DuplicatePolygon { frame_index: u64, name: String },

    #[error("Tracking failed: {0}")]
    Tracking(#[from] TrackingFailure),

    #[error("Frame {frame_index} of '{media_id}' unavailable: {reason}")]
    FrameUnavailable {
        media_id: String,
        frame_index: u64,
        reason: String,
    },

    #[error("A session is already tracking '{polygon_name}' on '{media_id}'")]
    SessionBusy {
        media_id: String,
        polygon_name: String,
    },

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MaskError {
    pub fn invalid_polygon<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPolygon(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn frame_unavailable<S: Into<String>>(media_id: &str, frame_index: u64, reason: S) -> Self {
        Self::FrameUnavailable {
            media_id: media_id.to_string(),
            frame_index,
            reason: reason.into(),
        }
    }
}
