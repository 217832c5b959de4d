//! rollcall-core — face detection, identity classification and the attendance ledger.
//!
//! Detection uses SCRFD and identity embeddings use ArcFace, both through
//! ONNX Runtime on the CPU. The per-frame pipeline gates predictions against
//! a label mapping and records each identity at most once per calendar day.

pub mod detector;
pub mod labels;
pub mod ledger;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod training;
pub mod types;

pub use detector::{DetectorError, DetectorParams, FaceDetector, ScrfdDetector};
pub use labels::{LabelError, LabelMap};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, MarkOutcome};
pub use pipeline::{gate, AttendancePipeline, Clock, FrameReport, SystemClock};
pub use recognizer::{
    ArcFaceEmbedder, ClassifierError, Embedder, Gallery, GalleryClassifier, IdentityClassifier,
    ARCFACE_INPUT_SIZE,
};
pub use training::{train, TrainedModel, TrainingError};
pub use types::{
    Annotation, BoundingBox, Classification, Embedding, FaceCrop, Identity, Prediction,
    Recognition,
};
