use clap::Parser;
use rollcall_core::DetectorParams;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments; every flag can also come from a `ROLLCALL_*` variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "rollcalld", version, about = "Face-recognition attendance daemon")]
pub struct Args {
    /// Camera device index (opens /dev/video<N>).
    #[arg(long, env = "ROLLCALL_CAMERA", default_value_t = 0)]
    pub camera: u32,

    /// Accept a prediction only when its confidence is below this value.
    #[arg(long, env = "ROLLCALL_THRESHOLD", default_value_t = 70.0)]
    pub threshold: f32,

    /// Directory holding det_10g.onnx, w600k_r50.onnx and the trained artifacts.
    #[arg(long, env = "ROLLCALL_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Label mapping file (default: <model-dir>/labels.txt).
    #[arg(long, env = "ROLLCALL_LABELS")]
    pub labels: Option<PathBuf>,

    /// Trained gallery (default: <model-dir>/gallery.json).
    #[arg(long, env = "ROLLCALL_GALLERY")]
    pub gallery: Option<PathBuf>,

    /// Directory for attendance_<date>.csv files.
    #[arg(long, env = "ROLLCALL_LEDGER_DIR", default_value = ".")]
    pub ledger_dir: PathBuf,

    #[arg(long, env = "ROLLCALL_SCORE_THRESHOLD", default_value_t = 0.5)]
    pub score_threshold: f32,

    #[arg(long, env = "ROLLCALL_NMS_THRESHOLD", default_value_t = 0.4)]
    pub nms_threshold: f32,

    /// Smallest face, in pixels, the detector reports.
    #[arg(long, env = "ROLLCALL_MIN_FACE_SIZE", default_value_t = 80.0)]
    pub min_face_size: f32,

    /// Longest wait for a frame before it counts as a read failure.
    #[arg(long, env = "ROLLCALL_MAX_READ_LATENCY_MS", default_value_t = 2000)]
    pub max_read_latency_ms: u64,

    /// Consecutive read failures tolerated before giving up on the camera.
    #[arg(long, env = "ROLLCALL_MAX_READ_FAILURES", default_value_t = 5)]
    pub max_read_failures: u32,

    /// Frames buffered between capture and recognition.
    #[arg(long, env = "ROLLCALL_BUFFER", default_value_t = 2)]
    pub buffer: usize,

    /// Frames discarded after the camera opens (exposure settling).
    #[arg(long, env = "ROLLCALL_WARMUP_FRAMES", default_value_t = 4)]
    pub warmup_frames: usize,

    /// Write the latest annotated frame to this image file.
    #[arg(long, env = "ROLLCALL_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("threshold must be a positive finite number, got {0}")]
    InvalidThreshold(f32),
    #[error("detector {name} must be within [0, 1], got {value}")]
    InvalidDetectorThreshold { name: &'static str, value: f32 },
    #[error("min face size must be a positive finite number, got {0}")]
    InvalidMinFaceSize(f32),
    #[error("max read failures must be at least 1")]
    InvalidReadFailures,
    #[error("max read latency must be greater than zero")]
    InvalidReadLatency,
    #[error("frame buffer must hold at least one frame")]
    InvalidBuffer,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub camera_index: u32,
    pub threshold: f32,
    pub model_dir: PathBuf,
    pub labels_path: PathBuf,
    pub gallery_path: PathBuf,
    pub ledger_dir: PathBuf,
    pub detector: DetectorParams,
    pub max_read_latency: Duration,
    pub max_read_failures: u32,
    pub buffer_capacity: usize,
    pub warmup_frames: usize,
    pub snapshot_path: Option<PathBuf>,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if !args.threshold.is_finite() || args.threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(args.threshold));
        }
        for (name, value) in [
            ("score threshold", args.score_threshold),
            ("NMS threshold", args.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidDetectorThreshold { name, value });
            }
        }
        if !args.min_face_size.is_finite() || args.min_face_size <= 0.0 {
            return Err(ConfigError::InvalidMinFaceSize(args.min_face_size));
        }
        if args.max_read_failures == 0 {
            return Err(ConfigError::InvalidReadFailures);
        }
        if args.max_read_latency_ms == 0 {
            return Err(ConfigError::InvalidReadLatency);
        }
        if args.buffer == 0 {
            return Err(ConfigError::InvalidBuffer);
        }

        let labels_path = args
            .labels
            .unwrap_or_else(|| args.model_dir.join("labels.txt"));
        let gallery_path = args
            .gallery
            .unwrap_or_else(|| args.model_dir.join("gallery.json"));

        Ok(Self {
            camera_index: args.camera,
            threshold: args.threshold,
            labels_path,
            gallery_path,
            ledger_dir: args.ledger_dir,
            detector: DetectorParams {
                score_threshold: args.score_threshold,
                nms_threshold: args.nms_threshold,
                min_face_size: args.min_face_size,
            },
            max_read_latency: Duration::from_millis(args.max_read_latency_ms),
            max_read_failures: args.max_read_failures,
            buffer_capacity: args.buffer,
            warmup_frames: args.warmup_frames,
            snapshot_path: args.snapshot,
            model_dir: args.model_dir,
        })
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace embedding model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}
