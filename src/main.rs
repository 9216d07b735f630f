use anyhow::{bail, Context, Result};
use clap::Parser;
use masktrack::export::DatasetWriter;
use masktrack::raster::seed_polygon;
use masktrack::session::{self, CheckpointResolution, Direction, SessionState, TrackRequest};
use masktrack::tracking::create_default_tracker;
use masktrack::{OverlapPolicy, PolygonStore, ProjectContext, Settings};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding one folder of still frames per media item
    #[arg(long, default_value = ".")]
    media_root: PathBuf,

    /// Media item to track in (folder name under the media root)
    #[arg(short, long)]
    media_id: String,

    /// Name of the polygon to track
    #[arg(short, long)]
    name: String,

    /// First frame of the range
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// End of the range (exclusive); defaults to the last frame
    #[arg(long)]
    end: Option<u64>,

    /// Track from the end of the range towards the start
    #[arg(long)]
    backward: bool,

    /// Annotations JSON to load before tracking and save afterwards
    #[arg(short, long)]
    annotations: Option<PathBuf>,

    /// Binary mask PNG whose largest region seeds the polygon
    #[arg(long)]
    seed_mask: Option<PathBuf>,

    /// Settings JSON file (tracker, session and raster sections)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the checkpoint confidence threshold
    #[arg(long)]
    threshold: Option<f32>,

    /// Override the export overlap policy (separate or flatten)
    #[arg(long)]
    overlap: Option<OverlapPolicy>,

    /// Write mask PNGs and captions for every annotated frame here
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Caption text written next to every exported mask
    #[arg(long)]
    caption: Option<String>,

    /// Accept low-confidence frames instead of stopping at them
    #[arg(long)]
    auto_accept: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let mut settings = match &args.config {
        Some(path) => Settings::from_json_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(threshold) = args.threshold {
        settings.session.confidence_threshold = threshold;
    }
    if let Some(overlap) = args.overlap {
        settings.raster.overlap = overlap;
    }
    settings.validate().context("Invalid settings")?;

    let ctx = ProjectContext::with_image_sequences(&args.media_root);
    tracing::info!("Media root: {}", ctx.media_root().display());

    if let Some(path) = args.annotations.as_ref().filter(|p| p.exists()) {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let store = PolygonStore::from_json(&json).context("Failed to parse annotations")?;
        tracing::info!("Loaded {} annotated frames", store.frame_indices().len());
        ctx.set_store(&args.media_id, store);
    }

    let end = match args.end {
        Some(end) => end,
        None => ctx
            .source()
            .frame_count(&args.media_id)
            .context("Failed to list frames")?,
    };
    let direction = if args.backward {
        Direction::Backward
    } else {
        Direction::Forward
    };
    let request = TrackRequest::new(&args.media_id, &args.name, args.start, end, direction);

    if let Some(mask_path) = &args.seed_mask {
        let mask = image::open(mask_path)
            .with_context(|| format!("Failed to open seed mask {}", mask_path.display()))?
            .to_luma8();
        let polygon = seed_polygon(&mask, &settings.raster).context("Seed mask has no usable region")?;
        tracing::info!(
            "Seeded '{}' on frame {} with {} points",
            args.name,
            request.seed_frame(),
            polygon.len()
        );
        ctx.store(&args.media_id)
            .replace(request.seed_frame(), args.name.as_str(), polygon)?;
    }

    let tracker = create_default_tracker(settings.tracker.clone()).context("Failed to create tracker")?;
    let auto_accept = args.auto_accept;
    let report = session::run(&ctx, tracker.as_ref(), request, settings.session.clone(), |checkpoint| {
        if auto_accept {
            tracing::info!(
                "Accepting frame {} at confidence {:.3}",
                checkpoint.frame_index,
                checkpoint.confidence
            );
            CheckpointResolution::Accept
        } else {
            tracing::warn!(
                "Frame {} needs review (confidence {:.3}); rerun with --auto-accept or correct it",
                checkpoint.frame_index,
                checkpoint.confidence
            );
            CheckpointResolution::Stop
        }
    })
    .context("Failed to run track session")?;

    tracing::info!(
        "Session {:?}: {} frames written, last good frame {:?}",
        report.state,
        report.frames_written.len(),
        report.last_good_frame
    );

    if let Some(path) = &args.annotations {
        let json = ctx.store(&args.media_id).to_json()?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Saved annotations to {}", path.display());
    }

    if let Some(dir) = &args.export_dir {
        let mut writer = DatasetWriter::new(dir).context("Failed to create export directory")?;
        ctx.export_media(
            &args.media_id,
            &mut writer,
            settings.raster.overlap,
            args.caption.as_deref(),
        )
        .context("Failed to export masks")?;
        tracing::info!("Wrote {} files", writer.files_written());
    }

    if report.state == SessionState::Failed {
        bail!(
            "Tracking failed: {}",
            report.reason.unwrap_or_else(|| "unknown reason".to_string())
        );
    }
    Ok(())
}
