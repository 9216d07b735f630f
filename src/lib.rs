//! Polygon mask tracking across video frames
//!
//! A seed polygon drawn on one frame is propagated frame by frame with
//! sparse patch correspondence and a least-squares transform fit. Track
//! sessions pause at low-confidence frames for review, and stored polygons
//! rasterize to mask images for dataset export.

pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod geometry;
pub mod raster;
pub mod session;
pub mod source;
pub mod store;
pub mod tracking;

pub use config::{OverlapPolicy, RasterConfig, SessionConfig, Settings, TrackerConfig, TransformModel};
pub use context::{ProjectContext, SessionClaim};
pub use error::{MaskError, Result, TrackingFailure};
pub use geometry::{Point, Polygon};
pub use session::{
    CancelToken, Checkpoint, CheckpointResolution, Direction, SessionState, TrackReport, TrackRequest,
    TrackSession,
};
pub use store::{FrameAnnotation, PolygonStore};
