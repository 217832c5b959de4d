//! Operator feedback: annotations go to the log, and optionally the latest
//! annotated frame is written to an image file.
//!
//! The labels in view are logged at info level whenever they change; every
//! box is logged at debug level.

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use rollcall_core::{Annotation, FrameReport};
use rollcall_hw::Frame;
use std::path::PathBuf;

pub struct Display {
    snapshot_path: Option<PathBuf>,
    /// Sorted labels of the last frame, to log only changes.
    in_view: Vec<String>,
}

impl Display {
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        Self { snapshot_path, in_view: Vec::new() }
    }

    pub fn show(&mut self, frame: &Frame, report: &FrameReport) {
        if self.update_in_view(&report.annotations) {
            if self.in_view.is_empty() {
                tracing::info!(seq = frame.sequence, "no faces in view");
            } else {
                tracing::info!(seq = frame.sequence, faces = ?self.in_view, "faces in view");
            }
        }
        for annotation in &report.annotations {
            tracing::debug!(
                seq = frame.sequence,
                label = %annotation.label,
                x = annotation.bbox.x,
                y = annotation.bbox.y,
                w = annotation.bbox.width,
                h = annotation.bbox.height,
                "face"
            );
        }

        let Some(path) = &self.snapshot_path else {
            return;
        };
        if report.annotations.is_empty() {
            return;
        }
        let Some(image) = render(frame, &report.annotations) else {
            tracing::warn!(seq = frame.sequence, "frame buffer does not match its dimensions");
            return;
        };
        if let Err(e) = image.save(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write snapshot");
        }
    }
}

impl Display {
    /// Record the labels of this frame; true when they differ from the last frame.
    fn update_in_view(&mut self, annotations: &[Annotation]) -> bool {
        let mut labels: Vec<String> = annotations.iter().map(|a| a.label.clone()).collect();
        labels.sort();
        if labels == self.in_view {
            return false;
        }
        self.in_view = labels;
        true
    }
}

/// Draw each annotation's box, in its color, over an RGB copy of the frame.
pub fn render(frame: &Frame, annotations: &[Annotation]) -> Option<RgbImage> {
    let gray = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())?;
    let mut canvas = DynamicImage::ImageLuma8(gray).to_rgb8();

    for annotation in annotations {
        let Some((x, y, w, h)) = annotation.bbox.clamp_to(frame.width, frame.height) else {
            continue;
        };
        let rect = Rect::at(x as i32, y as i32).of_size(w, h);
        draw_hollow_rect_mut(&mut canvas, rect, Rgb(annotation.color));
    }

    Some(canvas)
}
