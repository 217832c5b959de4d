//! Per-frame attendance state machine.
//!
//! One call to [`AttendancePipeline::process_frame`] turns a grayscale frame into
//! annotations and at most one ledger append per newly recognized identity.
//! Steady-state failures (detector, classifier, ledger I/O) are logged and
//! absorbed here; they never stop the loop.

use crate::detector::FaceDetector;
use crate::labels::LabelMap;
use crate::ledger::{AttendanceLedger, AttendanceRecord, MarkOutcome};
use crate::preprocess::crop_and_resize;
use crate::recognizer::IdentityClassifier;
use crate::types::{Annotation, Classification, Identity, Prediction, Recognition};
use chrono::{NaiveDate, NaiveDateTime};
use std::path::PathBuf;

/// Source of wall-clock time for record timestamps and day rollover.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Accept a prediction only if it beats `threshold` and its id has a label.
///
/// The comparison is strict: `confidence == threshold` is rejected, as is NaN.
pub fn gate(prediction: Prediction, labels: &LabelMap, threshold: f32) -> Classification {
    let recognition = match labels.get(prediction.id) {
        Some(identity) if prediction.confidence < threshold => Recognition::Known(identity.clone()),
        _ => Recognition::Unknown,
    };
    Classification { recognition, confidence: prediction.confidence }
}

/// What one frame produced.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub annotations: Vec<Annotation>,
    /// Records appended to the ledger while processing this frame.
    pub recorded: Vec<AttendanceRecord>,
    /// Appends that were attempted and failed; they are retried on a later match.
    pub persistence_failures: usize,
}

impl FrameReport {
    pub fn faces(&self) -> usize {
        self.annotations.len()
    }
}

/// Detect → crop → classify → gate → dedup → append → annotate.
pub struct AttendancePipeline<D, C, K = SystemClock> {
    detector: D,
    classifier: C,
    labels: LabelMap,
    threshold: f32,
    ledger: AttendanceLedger,
    ledger_dir: PathBuf,
    clock: K,
    /// Day whose ledger could not be opened, while that failure lasts.
    rollover_failed: Option<NaiveDate>,
}

impl<D, C> AttendancePipeline<D, C, SystemClock>
where
    D: FaceDetector,
    C: IdentityClassifier,
{
    pub fn new(
        detector: D,
        classifier: C,
        labels: LabelMap,
        threshold: f32,
        ledger: AttendanceLedger,
    ) -> Self {
        Self::with_clock(detector, classifier, labels, threshold, ledger, SystemClock)
    }
}

impl<D, C, K> AttendancePipeline<D, C, K>
where
    D: FaceDetector,
    C: IdentityClassifier,
    K: Clock,
{
    pub fn with_clock(
        detector: D,
        classifier: C,
        labels: LabelMap,
        threshold: f32,
        ledger: AttendanceLedger,
        clock: K,
    ) -> Self {
        let ledger_dir = ledger.dir().to_path_buf();
        Self {
            detector,
            classifier,
            labels,
            threshold,
            ledger,
            ledger_dir,
            clock,
            rollover_failed: None,
        }
    }

    /// Process one `width` × `height` grayscale frame.
    pub fn process_frame(&mut self, frame: &[u8], width: u32, height: u32) -> FrameReport {
        let now = self.clock.now();
        let ledger_ready = self.ensure_current_day(now.date());
        let mut report = FrameReport::default();

        let boxes = match self.detector.detect(frame, width, height) {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; skipping frame");
                return report;
            }
        };

        let input_size = self.classifier.input_size();

        for bbox in boxes {
            let Some(crop) = crop_and_resize(frame, width, height, &bbox, input_size) else {
                tracing::debug!(?bbox, "detection lies outside the frame; skipped");
                continue;
            };

            let classification = match self.classifier.predict(&crop) {
                Ok(prediction) => gate(prediction, &self.labels, self.threshold),
                Err(e) => {
                    tracing::warn!(error = %e, "classification failed; treating face as unknown");
                    Classification { recognition: Recognition::Unknown, confidence: f32::INFINITY }
                }
            };

            if let Recognition::Known(identity) = &classification.recognition {
                if ledger_ready {
                    self.mark(identity, now, &mut report);
                }
            }

            report.annotations.push(Annotation::for_classification(bbox, &classification));
        }

        report
    }

    /// Reopen the ledger when the calendar day changed. Returns whether the
    /// ledger is scoped to `today` and may be appended to.
    fn ensure_current_day(&mut self, today: NaiveDate) -> bool {
        if self.ledger.current_day() == today {
            return true;
        }

        match AttendanceLedger::open(&self.ledger_dir, today) {
            Ok(ledger) => {
                tracing::info!(
                    previous = %self.ledger.current_day(),
                    day = %today,
                    marked = ledger.marked_count(),
                    path = %ledger.path().display(),
                    "day rolled over; switched ledger"
                );
                if self.rollover_failed.take().is_some() {
                    tracing::info!(day = %today, "ledger opened; attendance resumed");
                }
                self.ledger = ledger;
                true
            }
            Err(e) => {
                if self.rollover_failed == Some(today) {
                    tracing::debug!(day = %today, error = %e, "ledger for new day still unavailable");
                } else {
                    tracing::error!(day = %today, error = %e, "cannot open ledger for new day; attendance paused");
                    self.rollover_failed = Some(today);
                }
                false
            }
        }
    }

    fn mark(&mut self, identity: &Identity, now: NaiveDateTime, report: &mut FrameReport) {
        if self.ledger.is_marked(&identity.name) {
            return;
        }

        match self.ledger.mark_present(&identity.name, now) {
            Ok(MarkOutcome::Recorded(record)) => {
                tracing::info!(
                    name = %record.name,
                    id = identity.id,
                    date = %record.date,
                    time = %record.time,
                    "marked present"
                );
                report.recorded.push(record);
            }
            Ok(MarkOutcome::AlreadyMarked) => {}
            Err(e) => {
                tracing::error!(name = %identity.name, error = %e, "failed to record attendance; will retry on next match");
                report.persistence_failures += 1;
            }
        }
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    pub fn into_ledger(self) -> AttendanceLedger {
        self.ledger
    }
}
