use crate::display::Display;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use rollcall_core::{AttendanceLedger, AttendancePipeline, Clock, FaceDetector, IdentityClassifier};
use rollcall_hw::{Camera, CameraError, Frame};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// What the capture thread hands to the engine.
pub type FrameResult = Result<Frame, CameraError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("camera read failed {failures} times in a row; last: {last}")]
    ReadFailures { failures: u32, last: String },
    #[error("capture thread stopped")]
    CaptureStopped,
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Limits for the engine loop.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub max_read_latency: Duration,
    pub max_read_failures: u32,
}

/// Counters for one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub faces: u64,
    pub recorded: u64,
    pub persistence_failures: u64,
}

/// Final state handed back when the engine stops cleanly.
pub struct SessionOutcome {
    pub stats: SessionStats,
    pub ledger: AttendanceLedger,
}

/// Start streaming from `camera` on the `rollcall-capture` thread.
///
/// The first `warmup_frames` frames are discarded. A full buffer drops the
/// newest frame so the engine always sees recent video.
pub fn spawn_capture(
    camera: Camera,
    tx: Sender<FrameResult>,
    warmup_frames: usize,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, EngineError> {
    std::thread::Builder::new()
        .name("rollcall-capture".into())
        .spawn(move || {
            tracing::info!(device = %camera.device_path, "capture thread started");
            let mut warmup_left = warmup_frames;
            let mut dropped = 0u64;

            let result = camera.stream(|frame| {
                if stop.load(Ordering::Relaxed) {
                    return ControlFlow::Break(());
                }
                if warmup_left > 0 && frame.is_ok() {
                    warmup_left -= 1;
                    return ControlFlow::Continue(());
                }
                match tx.try_send(frame) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        tracing::trace!(dropped, "frame buffer full; dropping newest frame");
                        ControlFlow::Continue(())
                    }
                    Err(TrySendError::Disconnected(_)) => ControlFlow::Break(()),
                }
            });

            if let Err(e) = result {
                tracing::error!(error = %e, "camera stream failed");
                let _ = tx.send(Err(e));
            }
            tracing::info!(dropped, "capture thread exiting");
        })
        .map_err(|source| EngineError::Spawn { name: "capture", source })
}

/// Run the pipeline on the `rollcall-engine` thread; the outcome arrives on
/// the returned receiver once the loop ends.
pub fn spawn_engine<D, C, K>(
    pipeline: AttendancePipeline<D, C, K>,
    rx: Receiver<FrameResult>,
    settings: EngineSettings,
    display: Display,
    stop: Arc<AtomicBool>,
) -> Result<oneshot::Receiver<Result<SessionOutcome, EngineError>>, EngineError>
where
    D: FaceDetector + Send + 'static,
    C: IdentityClassifier + Send + 'static,
    K: Clock + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut pipeline = pipeline;
            let mut display = display;
            let result = run_loop(&mut pipeline, &rx, settings, &mut display, &stop).map(|stats| {
                SessionOutcome {
                    stats,
                    ledger: pipeline.into_ledger(),
                }
            });
            tracing::info!("engine thread exiting");
            let _ = done_tx.send(result);
        })
        .map_err(|source| EngineError::Spawn { name: "engine", source })?;

    Ok(done_rx)
}

/// Pull frames until `stop` is raised or the camera gives out.
///
/// `stop` is only checked between frames, so a frame that has been received
/// is always processed to completion, ledger write included.
pub fn run_loop<D, C, K>(
    pipeline: &mut AttendancePipeline<D, C, K>,
    rx: &Receiver<FrameResult>,
    settings: EngineSettings,
    display: &mut Display,
    stop: &AtomicBool,
) -> Result<SessionStats, EngineError>
where
    D: FaceDetector,
    C: IdentityClassifier,
    K: Clock,
{
    let mut stats = SessionStats::default();
    let mut failures = 0u32;

    while !stop.load(Ordering::Relaxed) {
        let failure = match rx.recv_timeout(settings.max_read_latency) {
            Ok(Ok(frame)) => {
                failures = 0;
                let report = pipeline.process_frame(&frame.data, frame.width, frame.height);
                stats.frames += 1;
                stats.faces += report.faces() as u64;
                stats.recorded += report.recorded.len() as u64;
                stats.persistence_failures += report.persistence_failures as u64;
                display.show(&frame, &report);
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(RecvTimeoutError::Timeout) => {
                format!("no frame within {} ms", settings.max_read_latency.as_millis())
            }
            Err(RecvTimeoutError::Disconnected) => return Err(EngineError::CaptureStopped),
        };

        failures += 1;
        tracing::warn!(failures, max = settings.max_read_failures, error = %failure, "camera read failed");
        if failures >= settings.max_read_failures {
            return Err(EngineError::ReadFailures { failures, last: failure });
        }
    }

    Ok(stats)
}
