//! Identity classification: ArcFace embeddings matched against a trained gallery.
//!
//! The gallery holds one L2-normalized centroid embedding per identity. A query is
//! classified as the nearest centroid and scored as a cosine distance scaled to
//! `[0, 200]`, so lower scores are better matches.

use crate::types::{Embedding, FaceCrop, Prediction};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0 — ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// Cosine distance multiplier applied to reported confidences.
pub const DISTANCE_SCALE: f32 = 100.0;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0} — download from insightface and place in models/")]
    ModelNotFound(String),
    #[error("gallery not found: {0} — run `rollcall train` first")]
    GalleryNotFound(String),
    #[error("gallery has no enrolled identities")]
    EmptyGallery,
    #[error("gallery was built for {gallery}, embedder is {embedder}")]
    ModelMismatch { gallery: String, embedder: String },
    #[error("face crop is {actual}px, classifier requires {expected}px")]
    InputSize { expected: u32, actual: u32 },
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("gallery io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery format: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps a canonical-size face crop to an identity guess.
pub trait IdentityClassifier {
    /// Edge length every crop passed to [`predict`](Self::predict) must have.
    fn input_size(&self) -> u32;

    /// Predict the most likely identity. Lower `confidence` is a better match.
    fn predict(&mut self, face: &FaceCrop) -> Result<Prediction, ClassifierError>;
}

impl<T: IdentityClassifier + ?Sized> IdentityClassifier for Box<T> {
    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn predict(&mut self, face: &FaceCrop) -> Result<Prediction, ClassifierError> {
        (**self).predict(face)
    }
}

/// Produces face embeddings from canonical-size crops.
pub trait Embedder {
    fn input_size(&self) -> u32;

    /// Identifier stored in galleries built with this embedder.
    fn model_version(&self) -> &str;

    fn embed(&mut self, face: &FaceCrop) -> Result<Embedding, ClassifierError>;
}

/// ArcFace-based embedder.
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Preprocess a 112x112 grayscale crop into a NCHW float tensor.
    fn preprocess(face: &[u8]) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = face.get(y * size + x).copied().unwrap_or(0) as f32;
                let normalized = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
                // Grayscale → 3-channel: replicate Y
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}

impl Embedder for ArcFaceEmbedder {
    fn input_size(&self) -> u32 {
        ARCFACE_INPUT_SIZE
    }

    fn model_version(&self) -> &str {
        ARCFACE_MODEL_VERSION
    }

    fn embed(&mut self, face: &FaceCrop) -> Result<Embedding, ClassifierError> {
        if face.size() != ARCFACE_INPUT_SIZE {
            return Err(ClassifierError::InputSize {
                expected: ARCFACE_INPUT_SIZE,
                actual: face.size(),
            });
        }

        let input = Self::preprocess(face.data());
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ClassifierError::DimensionMismatch {
                expected: ARCFACE_EMBEDDING_DIM,
                actual: raw_data.len(),
            });
        }

        Ok(Embedding { values: raw_data.to_vec() }.normalized())
    }
}

/// One enrolled identity: the normalized mean of its training embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: u32,
    pub samples: usize,
    pub embedding: Embedding,
}

/// Trained identity model, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gallery {
    pub model_version: String,
    pub input_size: u32,
    pub entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        if !path.exists() {
            return Err(ClassifierError::GalleryNotFound(path.display().to_string()));
        }
        let gallery: Gallery = serde_json::from_slice(&std::fs::read(path)?)?;
        if gallery.entries.is_empty() {
            return Err(ClassifierError::EmptyGallery);
        }
        tracing::info!(
            path = %path.display(),
            identities = gallery.entries.len(),
            model_version = %gallery.model_version,
            "loaded gallery"
        );
        Ok(gallery)
    }

    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Nearest enrolled identity by cosine distance.
    ///
    /// Always scans every entry so timing does not depend on match position.
    pub fn nearest(&self, query: &Embedding) -> Option<Prediction> {
        let mut best: Option<Prediction> = None;

        for entry in &self.entries {
            let distance = cosine_distance(query, &entry.embedding);
            let better = match best {
                None => true,
                Some(prev) => distance < prev.confidence,
            };
            if better {
                best = Some(Prediction { id: entry.id, confidence: distance });
            }
        }

        best
    }
}

/// `(1 - cosine) * DISTANCE_SCALE`: 0 for identical directions, 200 for opposite.
pub fn cosine_distance(a: &Embedding, b: &Embedding) -> f32 {
    (1.0 - a.similarity(b)) * DISTANCE_SCALE
}

/// [`IdentityClassifier`] backed by an [`Embedder`] and a [`Gallery`].
pub struct GalleryClassifier<E> {
    embedder: E,
    gallery: Gallery,
}

impl<E: Embedder> GalleryClassifier<E> {
    pub fn new(embedder: E, gallery: Gallery) -> Result<Self, ClassifierError> {
        if gallery.entries.is_empty() {
            return Err(ClassifierError::EmptyGallery);
        }
        if gallery.model_version != embedder.model_version() {
            return Err(ClassifierError::ModelMismatch {
                gallery: gallery.model_version.clone(),
                embedder: embedder.model_version().to_string(),
            });
        }
        if gallery.input_size != embedder.input_size() {
            return Err(ClassifierError::InputSize {
                expected: embedder.input_size(),
                actual: gallery.input_size,
            });
        }
        Ok(Self { embedder, gallery })
    }

}

impl<E: Embedder> IdentityClassifier for GalleryClassifier<E> {
    fn input_size(&self) -> u32 {
        self.embedder.input_size()
    }

    fn predict(&mut self, face: &FaceCrop) -> Result<Prediction, ClassifierError> {
        let query = self.embedder.embed(face)?;
        self.gallery.nearest(&query).ok_or(ClassifierError::EmptyGallery)
    }
}
