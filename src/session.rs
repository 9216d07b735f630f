//! Track sessions: propagate one named polygon across a frame range
//!
//! A session is an explicit state machine driven by [`TrackSession::step`].
//! Each step tracks exactly one frame from the output of the previous step,
//! so the range is processed strictly in order. Low-confidence results pause
//! the session at a [`Checkpoint`] until the caller resolves it.

use crate::config::SessionConfig;
use crate::context::{ProjectContext, SessionClaim};
use crate::error::{MaskError, Result};
use crate::geometry::Polygon;
use crate::source::FrameSource;
use crate::store::PolygonStore;
use crate::tracking::{GrayFrame, MaskTracker};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// What to track: `polygon_name` of `media_id` over `[start_frame, end_frame)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    pub media_id: String,
    pub polygon_name: String,
    pub start_frame: u64,
    pub end_frame: u64,
    pub direction: Direction,
}

impl TrackRequest {
    pub fn new(
        media_id: impl Into<String>,
        polygon_name: impl Into<String>,
        start_frame: u64,
        end_frame: u64,
        direction: Direction,
    ) -> Self {
        Self {
            media_id: media_id.into(),
            polygon_name: polygon_name.into(),
            start_frame,
            end_frame,
            direction,
        }
    }

    /// Number of frames in the range
    pub fn len(&self) -> u64 {
        self.end_frame.saturating_sub(self.start_frame)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame the seed polygon must be stored on
    pub fn seed_frame(&self) -> u64 {
        match self.direction {
            Direction::Forward => self.start_frame,
            Direction::Backward => self.end_frame.saturating_sub(1),
        }
    }

    /// Frame following `frame` in tracking order, if still inside the range
    pub fn next_frame(&self, frame: u64) -> Option<u64> {
        match self.direction {
            Direction::Forward => frame
                .checked_add(1)
                .filter(|next| *next < self.end_frame),
            Direction::Backward => (frame > self.start_frame).then(|| frame - 1),
        }
    }
}

/// A paused step awaiting review
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub frame_index: u64,
    /// Tracker output for `frame_index`; not yet written to the store
    pub polygon: Polygon,
    pub confidence: f32,
}

/// How the caller settles a checkpoint
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointResolution {
    /// Keep the tracked polygon and continue from it
    Accept,
    /// Replace the tracked polygon and continue from the replacement
    Correct(Polygon),
    /// End the session; nothing is written for the checkpoint frame
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Running,
    Checkpoint(Checkpoint),
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Checkpoint(_) => "checkpoint",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Cooperative cancellation flag, checked between frame steps
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The range being tracked and the confidence of every step taken so far
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackRange {
    pub start_frame: u64,
    pub end_frame: u64,
    pub confidences: BTreeMap<u64, f32>,
}

/// Outcome of a session: state, last good frame and the reason for stopping
#[derive(Debug, Clone, PartialEq)]
pub struct TrackReport {
    pub state: SessionState,
    /// Last frame holding a trusted polygon (the seed counts)
    pub last_good_frame: Option<u64>,
    /// Frames written to the store, in tracking order
    pub frames_written: Vec<u64>,
    pub range: TrackRange,
    pub reason: Option<String>,
}

struct Cursor {
    frame_index: u64,
    polygon: Polygon,
    frame: GrayFrame,
}

struct Pending {
    frame: GrayFrame,
}

pub struct TrackSession<'t> {
    request: TrackRequest,
    config: SessionConfig,
    tracker: &'t dyn MaskTracker,
    source: Arc<dyn FrameSource>,
    store: Arc<PolygonStore>,
    cancel: CancelToken,
    _claim: SessionClaim,
    state: SessionState,
    cursor: Option<Cursor>,
    pending: Option<Pending>,
    range: TrackRange,
    frames_written: Vec<u64>,
    reason: Option<String>,
}

impl fmt::Debug for TrackSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackSession")
            .field("request", &self.request)
            .field("state", &self.state)
            .field("last_good_frame", &self.cursor.as_ref().map(|c| c.frame_index))
            .field("frames_written", &self.frames_written)
            .finish_non_exhaustive()
    }
}

impl<'t> TrackSession<'t> {
    /// Create an idle session, reserving the polygon against concurrent sessions
    pub fn new(
        ctx: &ProjectContext,
        tracker: &'t dyn MaskTracker,
        request: TrackRequest,
        config: SessionConfig,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.confidence_threshold) {
            return Err(MaskError::config("confidence_threshold must lie in [0, 1]"));
        }
        if request.polygon_name.trim().is_empty() {
            return Err(MaskError::InvalidName);
        }
        let claim = ctx.claim(&request.media_id, &request.polygon_name)?;
        let range = TrackRange {
            start_frame: request.start_frame,
            end_frame: request.end_frame,
            confidences: BTreeMap::new(),
        };

        Ok(Self {
            store: ctx.store(&request.media_id),
            source: ctx.source(),
            request,
            config,
            tracker,
            cancel: CancelToken::new(),
            _claim: claim,
            state: SessionState::Idle,
            cursor: None,
            pending: None,
            range,
            frames_written: Vec::new(),
            reason: None,
        })
    }

    pub fn request(&self) -> &TrackRequest {
        &self.request
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Handle for cancelling from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Load the seed polygon and its frame. Fails with `InvalidState` when
    /// the session was already started or the seed polygon is missing.
    pub fn start(&mut self) -> Result<&SessionState> {
        if self.state != SessionState::Idle {
            return Err(MaskError::invalid_state(format!(
                "cannot start a {} session",
                self.state.name()
            )));
        }

        let request = &self.request;
        if request.len() < 2 {
            tracing::info!(
                "Nothing to track for '{}' on '{}': range {}..{} has fewer than 2 frames",
                request.polygon_name,
                request.media_id,
                request.start_frame,
                request.end_frame
            );
            self.state = SessionState::Completed;
            return Ok(&self.state);
        }

        let seed_frame = request.seed_frame();
        let polygon = self
            .store
            .get(seed_frame, &request.polygon_name)
            .ok_or_else(|| {
                MaskError::invalid_state(format!(
                    "no polygon '{}' on seed frame {} of '{}'",
                    request.polygon_name, seed_frame, request.media_id
                ))
            })?;

        tracing::info!(
            "Tracking '{}' on '{}' {:?} over frames {}..{}",
            request.polygon_name,
            request.media_id,
            request.direction,
            request.start_frame,
            request.end_frame
        );

        match self.load_frame(seed_frame) {
            Ok(frame) => {
                self.cursor = Some(Cursor {
                    frame_index: seed_frame,
                    polygon,
                    frame,
                });
                self.state = SessionState::Running;
            }
            Err(e) => self.fail(e.to_string()),
        }
        Ok(&self.state)
    }

    /// Track one frame. Only valid while `Running`.
    ///
    /// A pending cancellation is honoured before any work is done.
    pub fn step(&mut self) -> Result<&SessionState> {
        if self.state != SessionState::Running {
            return Err(MaskError::invalid_state(format!(
                "cannot step a {} session",
                self.state.name()
            )));
        }
        if self.cancel.is_cancelled() {
            self.finish_cancelled();
            return Ok(&self.state);
        }
        let Some(cursor) = self.cursor.as_ref() else {
            return Err(MaskError::invalid_state("running session has no current frame"));
        };
        let Some(next_index) = self.request.next_frame(cursor.frame_index) else {
            self.finish_completed();
            return Ok(&self.state);
        };

        let next_frame = match self.load_frame(next_index) {
            Ok(frame) => frame,
            Err(e) => {
                self.fail(e.to_string());
                return Ok(&self.state);
            }
        };

        let outcome = match self.tracker.track(&cursor.frame, &next_frame, &cursor.polygon) {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.fail(format!("frame {}: {}", next_index, failure));
                return Ok(&self.state);
            }
        };

        tracing::debug!(
            "Frame {}: confidence {:.3} ({}/{} samples, residual {:.3}px)",
            next_index,
            outcome.confidence,
            outcome.matched,
            outcome.sampled,
            outcome.residual
        );
        self.range.confidences.insert(next_index, outcome.confidence);

        if outcome.confidence < self.config.confidence_threshold {
            tracing::warn!(
                "Checkpoint at frame {} of '{}': confidence {:.3} below {:.3}",
                next_index,
                self.request.media_id,
                outcome.confidence,
                self.config.confidence_threshold
            );
            self.pending = Some(Pending { frame: next_frame });
            self.state = SessionState::Checkpoint(Checkpoint {
                frame_index: next_index,
                polygon: outcome.polygon,
                confidence: outcome.confidence,
            });
            return Ok(&self.state);
        }

        self.advance(next_index, outcome.polygon, next_frame);
        Ok(&self.state)
    }

    /// Settle the current checkpoint. Only valid in the `Checkpoint` state.
    pub fn resolve(&mut self, resolution: CheckpointResolution) -> Result<&SessionState> {
        let SessionState::Checkpoint(checkpoint) = &self.state else {
            return Err(MaskError::invalid_state(format!(
                "no checkpoint to resolve in a {} session",
                self.state.name()
            )));
        };
        let frame_index = checkpoint.frame_index;

        let polygon = match resolution {
            CheckpointResolution::Accept => checkpoint.polygon.clone(),
            CheckpointResolution::Correct(polygon) => polygon,
            CheckpointResolution::Stop => {
                tracing::info!("Stopped at checkpoint frame {}", frame_index);
                self.pending = None;
                self.finish_cancelled();
                return Ok(&self.state);
            }
        };
        let Some(pending) = self.pending.take() else {
            return Err(MaskError::invalid_state("checkpoint has no pending frame"));
        };

        self.state = SessionState::Running;
        self.advance(frame_index, polygon, pending.frame);
        Ok(&self.state)
    }

    /// Request cancellation. Takes effect immediately unless the session
    /// already finished; writes made so far are kept.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if !self.state.is_terminal() {
            self.pending = None;
            self.finish_cancelled();
        }
    }

    /// Start if idle, then step until the session pauses or finishes
    pub fn run_until_paused(&mut self) -> Result<&SessionState> {
        if self.state == SessionState::Idle {
            self.start()?;
        }
        while self.state == SessionState::Running {
            self.step()?;
        }
        Ok(&self.state)
    }

    pub fn report(&self) -> TrackReport {
        TrackReport {
            state: self.state.clone(),
            last_good_frame: self.cursor.as_ref().map(|c| c.frame_index),
            frames_written: self.frames_written.clone(),
            range: self.range.clone(),
            reason: self.reason.clone(),
        }
    }

    fn load_frame(&self, frame_index: u64) -> Result<GrayFrame> {
        let image = self.source.get_frame(&self.request.media_id, frame_index)?;
        Ok(GrayFrame::from_rgb(&image))
    }

    /// Write `polygon` on `frame_index` and make it the tracking origin
    fn advance(&mut self, frame_index: u64, polygon: Polygon, frame: GrayFrame) {
        if let Err(e) = self
            .store
            .replace(frame_index, self.request.polygon_name.as_str(), polygon.clone())
        {
            self.fail(e.to_string());
            return;
        }
        self.frames_written.push(frame_index);
        self.cursor = Some(Cursor {
            frame_index,
            polygon,
            frame,
        });
        if self.request.next_frame(frame_index).is_none() {
            self.finish_completed();
        }
    }

    fn fail(&mut self, reason: String) {
        tracing::warn!(
            "Tracking '{}' on '{}' failed after frame {:?}: {}",
            self.request.polygon_name,
            self.request.media_id,
            self.cursor.as_ref().map(|c| c.frame_index),
            reason
        );
        self.reason = Some(reason);
        self.state = SessionState::Failed;
    }

    fn finish_completed(&mut self) {
        tracing::info!(
            "Tracking '{}' on '{}' completed, {} frames written",
            self.request.polygon_name,
            self.request.media_id,
            self.frames_written.len()
        );
        self.state = SessionState::Completed;
    }

    fn finish_cancelled(&mut self) {
        tracing::info!(
            "Tracking '{}' on '{}' cancelled, {} frames written",
            self.request.polygon_name,
            self.request.media_id,
            self.frames_written.len()
        );
        self.reason = Some("cancelled".to_string());
        self.state = SessionState::Cancelled;
    }
}

/// Run a whole session, asking `resolver` to settle every checkpoint
pub fn run<F>(
    ctx: &ProjectContext,
    tracker: &dyn MaskTracker,
    request: TrackRequest,
    config: SessionConfig,
    mut resolver: F,
) -> Result<TrackReport>
where
    F: FnMut(&Checkpoint) -> CheckpointResolution,
{
    let mut session = TrackSession::new(ctx, tracker, request, config)?;
    loop {
        match session.run_until_paused()? {
            SessionState::Checkpoint(checkpoint) => {
                let resolution = resolver(checkpoint);
                session.resolve(resolution)?;
            }
            _ => break,
        }
    }
    Ok(session.report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingFailure;
    use crate::source::MemoryFrameSource;
    use crate::tracking::TrackOutcome;
    use assert_matches::assert_matches;
    use image::RgbImage;
    use std::sync::Mutex;

    /// Shifts the polygon one pixel right per step and reports scripted confidences
    struct ScriptedTracker {
        confidences: Mutex<Vec<f32>>,
    }

    impl ScriptedTracker {
        fn new(confidences: &[f32]) -> Self {
            Self {
                confidences: Mutex::new(confidences.iter().rev().copied().collect()),
            }
        }
    }

    impl MaskTracker for ScriptedTracker {
        fn track(
            &self,
            _prev: &GrayFrame,
            _curr: &GrayFrame,
            polygon: &Polygon,
        ) -> std::result::Result<TrackOutcome, TrackingFailure> {
            let confidence = self.confidences.lock().unwrap().pop().unwrap_or(1.0);
            if confidence < 0.0 {
                return Err(TrackingFailure::TooFewMatches {
                    matched: 0,
                    required: 3,
                });
            }
            Ok(TrackOutcome {
                polygon: polygon.translated(1.0, 0.0).unwrap(),
                confidence,
                matched: 10,
                sampled: 10,
                residual: 0.0,
            })
        }
    }

    fn square() -> Polygon {
        Polygon::from_coords(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]).unwrap()
    }

    fn context(frames: usize) -> ProjectContext {
        let source = MemoryFrameSource::new().with_media("clip", vec![RgbImage::new(8, 8); frames]);
        ProjectContext::new("media", Arc::new(source))
    }

    #[test]
    fn test_request_ordering() {
        let forward = TrackRequest::new("clip", "hand", 2, 5, Direction::Forward);
        assert_eq!(forward.seed_frame(), 2);
        assert_eq!(forward.next_frame(3), Some(4));
        assert_eq!(forward.next_frame(4), None);

        let backward = TrackRequest::new("clip", "hand", 2, 5, Direction::Backward);
        assert_eq!(backward.seed_frame(), 4);
        assert_eq!(backward.next_frame(3), Some(2));
        assert_eq!(backward.next_frame(2), None);
    }

    #[test]
    fn test_completes_and_writes_every_frame() {
        let ctx = context(4);
        ctx.store("clip").insert(0, "hand", square()).unwrap();
        let tracker = ScriptedTracker::new(&[]);
        let request = TrackRequest::new("clip", "hand", 0, 4, Direction::Forward);

        let report = run(&ctx, &tracker, request, SessionConfig::default(), |_| {
            CheckpointResolution::Stop
        })
        .unwrap();

        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.frames_written, vec![1, 2, 3]);
        assert_eq!(report.last_good_frame, Some(3));
        assert_eq!(ctx.store("clip").get(3, "hand"), Some(square().translated(3.0, 0.0).unwrap()));
        assert!(!ctx.is_tracking("clip", "hand"));
    }

    #[test]
    fn test_checkpoint_blocks_until_resolved() {
        let ctx = context(4);
        let store = ctx.store("clip");
        store.insert(0, "hand", square()).unwrap();
        let tracker = ScriptedTracker::new(&[0.9, 0.2, 0.9]);
        let request = TrackRequest::new("clip", "hand", 0, 4, Direction::Forward);
        let mut session = TrackSession::new(&ctx, &tracker, request, SessionConfig::default()).unwrap();

        let state = session.run_until_paused().unwrap().clone();
        assert_matches!(state, SessionState::Checkpoint(Checkpoint { frame_index: 2, .. }));
        assert!(store.get(2, "hand").is_none());
        assert_matches!(session.step(), Err(MaskError::InvalidState(_)));

        let corrected = square().translated(10.0, 0.0).unwrap();
        session.resolve(CheckpointResolution::Correct(corrected.clone())).unwrap();
        assert_eq!(store.get(2, "hand"), Some(corrected.clone()));

        assert_eq!(session.run_until_paused().unwrap(), &SessionState::Completed);
        assert_eq!(store.get(3, "hand"), Some(corrected.translated(1.0, 0.0).unwrap()));
    }

    #[test]
    fn test_stop_at_checkpoint_cancels_without_writing() {
        let ctx = context(4);
        ctx.store("clip").insert(0, "hand", square()).unwrap();
        let tracker = ScriptedTracker::new(&[0.1]);
        let request = TrackRequest::new("clip", "hand", 0, 4, Direction::Forward);

        let report = run(&ctx, &tracker, request, SessionConfig::default(), |_| {
            CheckpointResolution::Stop
        })
        .unwrap();

        assert_eq!(report.state, SessionState::Cancelled);
        assert!(report.frames_written.is_empty());
        assert_eq!(report.last_good_frame, Some(0));
        assert!(ctx.store("clip").get(1, "hand").is_none());
    }

    #[test]
    fn test_tracking_failure_reports_last_good_frame() {
        let ctx = context(5);
        ctx.store("clip").insert(0, "hand", square()).unwrap();
        let tracker = ScriptedTracker::new(&[0.9, -1.0]);
        let request = TrackRequest::new("clip", "hand", 0, 5, Direction::Forward);

        let report = run(&ctx, &tracker, request, SessionConfig::default(), |_| {
            CheckpointResolution::Accept
        })
        .unwrap();

        assert_eq!(report.state, SessionState::Failed);
        assert_eq!(report.last_good_frame, Some(1));
        assert!(report.reason.unwrap().contains("frame 2"));
    }

    #[test]
    fn test_missing_seed_and_short_range() {
        let ctx = context(4);
        let tracker = ScriptedTracker::new(&[]);

        let request = TrackRequest::new("clip", "hand", 0, 4, Direction::Forward);
        let mut session = TrackSession::new(&ctx, &tracker, request, SessionConfig::default()).unwrap();
        assert_matches!(session.start(), Err(MaskError::InvalidState(_)));

        let request = TrackRequest::new("clip", "face", 2, 3, Direction::Backward);
        let mut session = TrackSession::new(&ctx, &tracker, request, SessionConfig::default()).unwrap();
        assert_eq!(session.start().unwrap(), &SessionState::Completed);
    }

    #[test]
    fn test_debug_shows_progress() {
        let ctx = context(4);
        let tracker = ScriptedTracker::new(&[]);
        let request = TrackRequest::new("clip", "hand", 0, 4, Direction::Forward);
        let session = TrackSession::new(&ctx, &tracker, request, SessionConfig::default()).unwrap();
        let text = format!("{:?}", session);
        assert!(text.contains("TrackSession"));
        assert!(text.contains("Idle"));
        assert!(text.contains("\"hand\""));
    }

    #[test]
    fn test_cancel_token_stops_before_next_step() {
        let ctx = context(6);
        ctx.store("clip").insert(0, "hand", square()).unwrap();
        let tracker = ScriptedTracker::new(&[]);
        let request = TrackRequest::new("clip", "hand", 0, 6, Direction::Forward);
        let mut session = TrackSession::new(&ctx, &tracker, request, SessionConfig::default()).unwrap();

        session.start().unwrap();
        session.step().unwrap();
        session.cancel_token().cancel();
        assert_eq!(session.step().unwrap(), &SessionState::Cancelled);
        assert_eq!(session.report().frames_written, vec![1]);
        assert!(ctx.store("clip").get(2, "hand").is_none());
    }
}
