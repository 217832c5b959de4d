use anyhow::{Context, Result};
use clap::Parser;
use rollcall_core::{
    ArcFaceEmbedder, AttendanceLedger, AttendancePipeline, Gallery, GalleryClassifier, LabelMap,
    ScrfdDetector,
};
use rollcall_hw::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod engine;

use config::{Args, Config};
use display::Display;
use engine::{EngineSettings, SessionOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_args(Args::parse()).context("invalid configuration")?;
    tracing::info!(camera = config.camera_index, threshold = config.threshold, "rollcalld starting");

    // Everything the pipeline needs is loaded up front; any failure here is fatal.
    let labels = LabelMap::load(&config.labels_path).context("failed to load label mapping")?;

    let detector = ScrfdDetector::load(&config.scrfd_model_path(), config.detector)
        .context("failed to load face detector")?;
    tracing::info!(path = %config.scrfd_model_path().display(), "SCRFD detector loaded");

    let embedder =
        ArcFaceEmbedder::load(&config.arcface_model_path()).context("failed to load embedder")?;
    let gallery = Gallery::load(&config.gallery_path).context("failed to load gallery")?;
    let classifier =
        GalleryClassifier::new(embedder, gallery).context("gallery does not fit the embedder")?;
    tracing::info!(identities = labels.len(), "classifier ready");

    let today = chrono::Local::now().date_naive();
    let ledger = AttendanceLedger::open(&config.ledger_dir, today)
        .context("failed to open attendance ledger")?;
    tracing::info!(
        path = %ledger.path().display(),
        already_marked = ledger.marked_count(),
        "ledger opened"
    );

    let camera = Camera::open_index(config.camera_index)
        .with_context(|| format!("failed to open camera {}", config.camera_index))?;
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let pipeline = AttendancePipeline::new(detector, classifier, labels, config.threshold, ledger);
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = crossbeam_channel::bounded(config.buffer_capacity);

    engine::spawn_capture(camera, tx, config.warmup_frames, stop.clone())?;
    let mut done = engine::spawn_engine(
        pipeline,
        rx,
        EngineSettings {
            max_read_latency: config.max_read_latency,
            max_read_failures: config.max_read_failures,
        },
        Display::new(config.snapshot_path.clone()),
        stop.clone(),
    )?;

    tracing::info!("rollcalld ready");

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("rollcalld shutting down");
            stop.store(true, Ordering::Relaxed);
            (&mut done).await
        }
        result = &mut done => result,
    };

    let SessionOutcome { stats, ledger } = outcome
        .map_err(|_| engine::EngineError::ChannelClosed)?
        .context("attendance session failed")?;

    tracing::info!(
        path = %ledger.path().display(),
        marked = ledger.marked_count(),
        frames = stats.frames,
        faces = stats.faces,
        recorded = stats.recorded,
        persistence_failures = stats.persistence_failures,
        "session summary"
    );

    Ok(())
}
