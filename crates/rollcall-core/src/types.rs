use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score in [0, 1].
    pub score: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Integer pixel rectangle `(x, y, w, h)` clipped to a `width` × `height` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(width as f32);
        let y1 = (self.y + self.height).ceil().min(height as f32);
        if !(x1 > x0 && y1 > y0) {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// A person the classifier was trained to recognize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: u32,
    pub name: String,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Return a unit-length copy. Zero vectors are returned unchanged.
    pub fn normalized(&self) -> Embedding {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            Embedding { values: self.values.iter().map(|x| x / norm).collect() }
        } else {
            self.clone()
        }
    }
}

/// A grayscale face crop at a classifier's canonical input size.
///
/// The only constructor is [`crate::preprocess::crop_and_resize`], so every crop
/// handed to a classifier is exactly `size` × `size` pixels.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub(crate) data: Vec<u8>,
    pub(crate) size: u32,
}

impl FaceCrop {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Edge length in pixels.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Raw classifier output before gating. Lower `confidence` is a better match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub id: u32,
    pub confidence: f32,
}

/// Outcome of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Known(Identity),
    Unknown,
}

/// A gated classification for one face in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub recognition: Recognition,
    pub confidence: f32,
}

impl Classification {
    pub fn identity(&self) -> Option<&Identity> {
        match &self.recognition {
            Recognition::Known(identity) => Some(identity),
            Recognition::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self.recognition, Recognition::Known(_))
    }
}

/// RGB color used to draw an annotation.
pub type Rgb = [u8; 3];

pub const KNOWN_COLOR: Rgb = [0, 255, 0];
pub const UNKNOWN_COLOR: Rgb = [255, 0, 0];

/// Operator-facing overlay for one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: String,
    pub color: Rgb,
}

impl Annotation {
    pub fn for_classification(bbox: BoundingBox, classification: &Classification) -> Self {
        match &classification.recognition {
            Recognition::Known(identity) => Self {
                bbox,
                label: format!("{} ({})", identity.name, classification.confidence as i32),
                color: KNOWN_COLOR,
            },
            Recognition::Unknown => Self {
                bbox,
                label: "Unknown".to_string(),
                color: UNKNOWN_COLOR,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, score: 0.9 }
    }

    #[test]
    fn test_identity_display() {
        let identity = Identity { id: 3, name: "alice".into() };
        assert_eq!(identity.to_string(), "alice (3)");
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding { values: vec![1.0, 0.0, 0.0] };
        let b = Embedding { values: vec![1.0, 0.0, 0.0] };
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding { values: vec![1.0, 0.0] };
        let b = Embedding { values: vec![-1.0, 0.0] };
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding { values: vec![0.0, 0.0] };
        let b = Embedding { values: vec![1.0, 0.0] };
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_normalized_unit_length() {
        let e = Embedding { values: vec![3.0, 4.0] }.normalized();
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_inside_frame() {
        assert_eq!(bbox(10.0, 20.0, 30.0, 40.0).clamp_to(100, 100), Some((10, 20, 30, 40)));
    }

    #[test]
    fn test_clamp_partially_outside() {
        assert_eq!(bbox(-10.0, 90.0, 30.0, 40.0).clamp_to(100, 100), Some((0, 90, 20, 10)));
    }

    #[test]
    fn test_clamp_fully_outside() {
        assert_eq!(bbox(120.0, 10.0, 30.0, 40.0).clamp_to(100, 100), None);
        assert_eq!(bbox(10.0, 10.0, 0.0, 40.0).clamp_to(100, 100), None);
    }

    #[test]
    fn test_annotation_labels() {
        let known = Classification {
            recognition: Recognition::Known(Identity { id: 0, name: "alice".into() }),
            confidence: 42.7,
        };
        let a = Annotation::for_classification(bbox(0.0, 0.0, 1.0, 1.0), &known);
        assert_eq!(a.label, "alice (42)");
        assert_eq!(a.color, KNOWN_COLOR);

        let unknown = Classification { recognition: Recognition::Unknown, confidence: 99.0 };
        let a = Annotation::for_classification(bbox(0.0, 0.0, 1.0, 1.0), &unknown);
        assert_eq!(a.label, "Unknown");
        assert_eq!(a.color, UNKNOWN_COLOR);
    }
}
