//! Offline gallery training from a `dataset/<person>/<image>` tree.
//!
//! People are enrolled in sorted directory order with dense ids starting at 0.
//! Each identity's gallery entry is the normalized mean of its image embeddings.

use crate::labels::{LabelError, LabelMap};
use crate::preprocess::crop_from_image;
use crate::recognizer::{ClassifierError, Embedder, Gallery, GalleryEntry};
use crate::types::Embedding;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("dataset directory not found: {0} — capture faces first")]
    DatasetNotFound(String),
    #[error("no usable images found under {0}")]
    NoImages(String),
    #[error("dataset io: {0}")]
    Io(#[from] std::io::Error),
    #[error("labels: {0}")]
    Labels(#[from] LabelError),
    #[error("embedding: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Trained artifacts, ready to be written next to each other.
#[derive(Debug)]
pub struct TrainedModel {
    pub labels: LabelMap,
    pub gallery: Gallery,
    /// Files that could not be decoded as images.
    pub skipped: usize,
}

impl TrainedModel {
    pub fn save(&self, gallery_path: &Path, labels_path: &Path) -> Result<(), TrainingError> {
        for path in [gallery_path, labels_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.gallery.save(gallery_path)?;
        self.labels.save(labels_path)?;
        tracing::info!(
            gallery = %gallery_path.display(),
            labels = %labels_path.display(),
            identities = self.labels.len(),
            "saved trained model"
        );
        Ok(())
    }
}

/// Build a gallery and label mapping from every person directory in `dataset_dir`.
pub fn train<E: Embedder>(dataset_dir: &Path, embedder: &mut E) -> Result<TrainedModel, TrainingError> {
    if !dataset_dir.is_dir() {
        return Err(TrainingError::DatasetNotFound(dataset_dir.display().to_string()));
    }

    let size = embedder.input_size();
    let mut names = Vec::new();
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for person_dir in sorted_entries(dataset_dir)?.into_iter().filter(|p| p.is_dir()) {
        let Some(name) = person_dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            tracing::warn!(path = %person_dir.display(), "skipping non-UTF-8 directory name");
            continue;
        };

        let mut sum: Option<Vec<f32>> = None;
        let mut samples = 0usize;

        for image_path in sorted_entries(&person_dir)?.into_iter().filter(|p| p.is_file()) {
            let gray = match image::open(&image_path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(path = %image_path.display(), error = %e, "skipping unreadable image");
                    skipped += 1;
                    continue;
                }
            };
            let Some(crop) = crop_from_image(gray.as_raw(), gray.width(), gray.height(), size) else {
                tracing::warn!(path = %image_path.display(), "skipping empty image");
                skipped += 1;
                continue;
            };

            let embedding = embedder.embed(&crop)?;
            match sum.as_mut() {
                Some(acc) => acc.iter_mut().zip(&embedding.values).for_each(|(a, v)| *a += v),
                None => sum = Some(embedding.values),
            }
            samples += 1;
        }

        let Some(sum) = sum else {
            tracing::warn!(person = %name, "no usable images; person not enrolled");
            continue;
        };

        let id = names.len() as u32;
        tracing::info!(person = %name, id, samples, "enrolled");
        entries.push(GalleryEntry {
            id,
            samples,
            embedding: Embedding { values: sum }.normalized(),
        });
        names.push(name);
    }

    if entries.is_empty() {
        return Err(TrainingError::NoImages(dataset_dir.display().to_string()));
    }

    Ok(TrainedModel {
        labels: LabelMap::from_names(names)?,
        gallery: Gallery {
            model_version: embedder.model_version().to_string(),
            input_size: size,
            entries,
        },
        skipped,
    })
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::tests::BrightnessEmbedder;
    use crate::recognizer::{GalleryClassifier, IdentityClassifier};
    use image::{GrayImage, Luma};

    /// Image whose top half is `top` and bottom half is `bottom`.
    fn split_image(top: u8, bottom: u8) -> GrayImage {
        GrayImage::from_fn(8, 8, |_, y| Luma([if y < 4 { top } else { bottom }]))
    }

    fn add_person(root: &Path, name: &str, images: &[GrayImage]) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for (i, img) in images.iter().enumerate() {
            img.save(dir.join(format!("{name}_{i:04}.png"))).unwrap();
        }
    }

    #[test]
    fn test_train_assigns_dense_sorted_ids() {
        let root = tempfile::tempdir().unwrap();
        add_person(root.path(), "bob", &[split_image(10, 240), split_image(20, 230)]);
        add_person(root.path(), "alice", &[split_image(240, 10)]);
        add_person(root.path(), "nobody", &[]);
        std::fs::write(root.path().join("README.txt"), "not a person").unwrap();
        std::fs::write(root.path().join("alice").join("notes.txt"), "not an image").unwrap();

        let model = train(root.path(), &mut BrightnessEmbedder { size: 4 }).unwrap();

        assert_eq!(model.labels.to_text(), "0:alice\n1:bob\n");
        assert_eq!(model.gallery.entries.len(), 2);
        assert_eq!(model.gallery.entries[0].samples, 1);
        assert_eq!(model.gallery.entries[1].samples, 2);
        assert_eq!(model.gallery.input_size, 4);
        assert_eq!(model.skipped, 1);
    }

    #[test]
    fn test_trained_gallery_classifies_training_faces() {
        let root = tempfile::tempdir().unwrap();
        add_person(root.path(), "alice", &[split_image(240, 10)]);
        add_person(root.path(), "bob", &[split_image(10, 240)]);

        let model = train(root.path(), &mut BrightnessEmbedder { size: 4 }).unwrap();
        let mut classifier = GalleryClassifier::new(BrightnessEmbedder { size: 4 }, model.gallery).unwrap();

        let img = split_image(10, 240);
        let crop = crop_from_image(img.as_raw(), 8, 8, 4).unwrap();
        assert_eq!(classifier.predict(&crop).unwrap().id, 1);
    }

    #[test]
    fn test_train_missing_dataset() {
        let err = train(Path::new("/nonexistent/dataset"), &mut BrightnessEmbedder { size: 4 }).unwrap_err();
        assert!(matches!(err, TrainingError::DatasetNotFound(_)));
    }

    #[test]
    fn test_train_no_images() {
        let root = tempfile::tempdir().unwrap();
        add_person(root.path(), "alice", &[]);
        let err = train(root.path(), &mut BrightnessEmbedder { size: 4 }).unwrap_err();
        assert!(matches!(err, TrainingError::NoImages(_)));
    }

    #[test]
    fn test_save_writes_both_artifacts() {
        let root = tempfile::tempdir().unwrap();
        add_person(root.path(), "alice", &[split_image(200, 100)]);
        let model = train(root.path(), &mut BrightnessEmbedder { size: 4 }).unwrap();

        let out = root.path().join("models");
        model.save(&out.join("gallery.json"), &out.join("labels.txt")).unwrap();

        assert_eq!(LabelMap::load(&out.join("labels.txt")).unwrap(), model.labels);
        assert_eq!(Gallery::load(&out.join("gallery.json")).unwrap().entries.len(), 1);
    }
}
