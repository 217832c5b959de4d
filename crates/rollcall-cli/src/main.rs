use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use image::GrayImage;
use rollcall_core::preprocess::crop_and_resize;
use rollcall_core::{
    ArcFaceEmbedder, AttendanceLedger, DetectorParams, FaceDetector, LedgerError, ScrfdDetector,
    ARCFACE_INPUT_SIZE,
};
use rollcall_hw::Camera;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// Consecutive camera read failures tolerated while capturing a dataset.
const MAX_CAPTURE_FAILURES: u32 = 10;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Face-recognition attendance tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture face crops of one person into the dataset
    Capture {
        /// Person's name; becomes the dataset directory and the ledger name
        #[arg(short, long)]
        name: String,
        /// Number of face images to save
        #[arg(short, long, default_value_t = 100)]
        count: usize,
        /// Camera device index (opens /dev/video<N>)
        #[arg(long, env = "ROLLCALL_CAMERA", default_value_t = 0)]
        camera: u32,
        #[arg(long, env = "ROLLCALL_DATASET", default_value = "dataset")]
        dataset: PathBuf,
        #[arg(long, env = "ROLLCALL_MODEL_DIR", default_value = "models")]
        model_dir: PathBuf,
        #[arg(long, env = "ROLLCALL_MIN_FACE_SIZE", default_value_t = 80.0)]
        min_face_size: f32,
    },
    /// Train the gallery and label mapping from the dataset
    Train {
        #[arg(long, env = "ROLLCALL_DATASET", default_value = "dataset")]
        dataset: PathBuf,
        #[arg(long, env = "ROLLCALL_MODEL_DIR", default_value = "models")]
        model_dir: PathBuf,
        /// Output label mapping (default: <model-dir>/labels.txt)
        #[arg(long, env = "ROLLCALL_LABELS")]
        labels: Option<PathBuf>,
        /// Output gallery (default: <model-dir>/gallery.json)
        #[arg(long, env = "ROLLCALL_GALLERY")]
        gallery: Option<PathBuf>,
    },
    /// Print the attendance recorded for a day
    Report {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(long, env = "ROLLCALL_LEDGER_DIR", default_value = ".")]
        ledger_dir: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Capture { name, count, camera, dataset, model_dir, min_face_size } => {
            let params = DetectorParams { min_face_size, ..DetectorParams::default() };
            capture(&name, count, camera, &dataset, &model_dir, params)
        }
        Commands::Train { dataset, model_dir, labels, gallery } => {
            let labels = labels.unwrap_or_else(|| model_dir.join("labels.txt"));
            let gallery = gallery.unwrap_or_else(|| model_dir.join("gallery.json"));
            train(&dataset, &model_dir, &labels, &gallery)
        }
        Commands::Report { date, ledger_dir } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            report(&ledger_dir, date)
        }
        Commands::Devices => {
            devices();
            Ok(())
        }
    }
}

fn capture(
    name: &str,
    count: usize,
    camera_index: u32,
    dataset: &Path,
    model_dir: &Path,
    params: DetectorParams,
) -> Result<()> {
    validate_person_name(name)?;
    let dir = dataset.join(name);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let first = next_image_index(&dir, name)?;

    let mut detector = ScrfdDetector::load(&model_dir.join("det_10g.onnx"), params)
        .context("failed to load face detector")?;
    let camera = Camera::open_index(camera_index)
        .with_context(|| format!("failed to open camera {camera_index}"))?;

    println!("Capturing {count} images of {name} into {} ...", dir.display());

    let mut saved = 0usize;
    let mut failures = 0u32;
    let mut fatal: Option<anyhow::Error> = None;

    camera.stream(|frame| {
        let frame = match frame {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(failures, error = %e, "camera read failed");
                if failures >= MAX_CAPTURE_FAILURES {
                    fatal = Some(anyhow::Error::new(e).context("camera stopped delivering frames"));
                    return ControlFlow::Break(());
                }
                return ControlFlow::Continue(());
            }
        };

        let faces = match detector.detect(&frame.data, frame.width, frame.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; skipping frame");
                return ControlFlow::Continue(());
            }
        };
        // Largest face is the person in front of the camera.
        let Some(face) = faces.into_iter().max_by(|a, b| a.area().total_cmp(&b.area())) else {
            return ControlFlow::Continue(());
        };
        let Some(crop) =
            crop_and_resize(&frame.data, frame.width, frame.height, &face, ARCFACE_INPUT_SIZE)
        else {
            return ControlFlow::Continue(());
        };

        let path = dir.join(image_file_name(name, first + saved));
        let size = crop.size();
        let written = GrayImage::from_raw(size, size, crop.into_data())
            .context("crop buffer does not match its size")
            .and_then(|img| {
                img.save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))
            });
        if let Err(e) = written {
            fatal = Some(e);
            return ControlFlow::Break(());
        }

        saved += 1;
        println!("  [{saved}/{count}] {}", path.display());
        if saved >= count {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    if let Some(e) = fatal {
        return Err(e);
    }
    println!("Saved {saved} images of {name}.");
    Ok(())
}

fn train(dataset: &Path, model_dir: &Path, labels: &Path, gallery: &Path) -> Result<()> {
    let mut embedder = ArcFaceEmbedder::load(&model_dir.join("w600k_r50.onnx"))
        .context("failed to load embedder")?;
    let model = rollcall_core::train(dataset, &mut embedder)?;
    model.save(gallery, labels)?;

    println!("Trained {} identities:", model.labels.len());
    for (identity, entry) in model.labels.iter().zip(&model.gallery.entries) {
        println!("  {:<28} {} images", identity.to_string(), entry.samples);
    }
    if model.skipped > 0 {
        println!("Skipped {} unreadable files.", model.skipped);
    }
    println!("Gallery: {}", gallery.display());
    println!("Labels:  {}", labels.display());
    Ok(())
}

fn report(ledger_dir: &Path, date: NaiveDate) -> Result<()> {
    let ledger = match AttendanceLedger::load(ledger_dir, date) {
        Ok(ledger) => ledger,
        Err(LedgerError::NotFound(_)) => {
            println!("No attendance recorded for {date}.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("Attendance for {date} ({}):", ledger.path().display());
    for record in ledger.records() {
        println!("  {:<24} {}", record.name, record.time);
    }
    println!("{} present.", ledger.marked_count());
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found.");
        return;
    }
    for device in devices {
        println!(
            "  {:>2}  {:<14} {} ({}, {})",
            device.index, device.path, device.name, device.driver, device.bus
        );
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

/// Names end up as directory names and in `id:name` label lines.
fn validate_person_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("name must not be empty");
    }
    if name.contains(['/', '\\', ':']) || name == "." || name == ".." {
        bail!("name {name:?} must not contain '/', '\\' or ':'");
    }
    Ok(())
}

fn image_file_name(name: &str, index: usize) -> String {
    format!("{name}_{index:04}.png")
}

/// One past the highest `<name>_<NNNN>.*` index already in `dir`, so gaps in
/// earlier captures never lead to overwrites.
fn next_image_index(dir: &Path, name: &str) -> Result<usize> {
    let prefix = format!("{name}_");
    let mut next = 0;
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let file_name = entry?.file_name();
        let Some(stem) = Path::new(&file_name).file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(index) = stem.strip_prefix(&prefix).and_then(|n| n.parse::<usize>().ok()) {
            next = next.max(index + 1);
        }
    }
    Ok(next)
}
