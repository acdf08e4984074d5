use crate::common::{AuthError, Result};
use crate::core::{BoundingBox, CapturedImage, FaceDetectionResult};
use crate::face::{FaceAuthBackend, FaceRegistration, FaceVerification};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Below this luma spread a frame is treated as empty (lens covered, blank wall).
const MIN_CONTRAST: f32 = 10.0;

const REFERENCES_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone)]
struct MockReference {
    identity: String,
    fingerprint: u64,
}

#[derive(Serialize, Deserialize)]
struct StoredReferences {
    version: u32,
    references: HashMap<String, MockReference>,
}

/// Stand-in for the face-recognition service.
///
/// Frames are compared by an 8x8 average-hash fingerprint: the same still
/// matches itself, visibly different stills do not. It is a simulation for
/// development and tests, not a recognizer.
///
/// Built with [`MockBackend::open`], registered references are kept in a
/// bincode table so they outlive the process, like the user records that
/// point at them.
pub struct MockBackend {
    references: RwLock<HashMap<String, MockReference>>,
    match_threshold: f32,
    table_path: Option<PathBuf>,
}

impl MockBackend {
    /// References live in memory only.
    pub fn new(match_threshold: f32) -> Self {
        Self {
            references: RwLock::new(HashMap::new()),
            match_threshold,
            table_path: None,
        }
    }

    /// Loads references from `table_path`, creating it on first registration.
    pub fn open(match_threshold: f32, table_path: PathBuf) -> Result<Self> {
        let references = match fs::read(&table_path) {
            Ok(data) => {
                let stored: StoredReferences = bincode::deserialize(&data).map_err(|e| {
                    AuthError::Storage(format!("Failed to deserialize {:?}: {}", table_path, e))
                })?;
                if stored.version > REFERENCES_VERSION {
                    return Err(AuthError::Storage(format!(
                        "Face reference table {:?} has unknown version {}",
                        table_path, stored.version
                    )));
                }
                stored.references
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("Loaded {} mock face references from {}", references.len(), table_path.display());

        Ok(Self {
            references: RwLock::new(references),
            match_threshold,
            table_path: Some(table_path),
        })
    }

    fn save(path: &Path, references: &HashMap<String, MockReference>) -> Result<()> {
        let stored = StoredReferences { version: REFERENCES_VERSION, references: references.clone() };
        let encoded = bincode::serialize(&stored)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, encoded)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn reference_count(&self) -> usize {
        self.references.read().map(|r| r.len()).unwrap_or(0)
    }

    fn analyze(image: &CapturedImage) -> Result<(FaceDetectionResult, u64)> {
        let decoded = image
            .decode()
            .map_err(|e| AuthError::InvalidInput(format!("Could not decode image: {}", e)))?;
        let (width, height) = decoded.dimensions();

        let small = decoded.resize_exact(8, 8, FilterType::Triangle).to_luma8();
        let values: Vec<f32> = small.pixels().map(|p| p[0] as f32).collect();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        let spread = variance.sqrt();

        let mut fingerprint = 0u64;
        for (i, v) in values.iter().enumerate() {
            if *v > mean {
                fingerprint |= 1u64 << i;
            }
        }

        let detection = if spread >= MIN_CONTRAST {
            FaceDetectionResult {
                detected: true,
                bounding_box: Some(BoundingBox {
                    x: width as f32 * 0.2,
                    y: height as f32 * 0.2,
                    width: width as f32 * 0.6,
                    height: height as f32 * 0.6,
                }),
                confidence: Some((spread / 64.0).min(1.0)),
            }
        } else {
            FaceDetectionResult::none()
        };

        Ok((detection, fingerprint))
    }
}

fn similarity(a: u64, b: u64) -> f32 {
    1.0 - (a ^ b).count_ones() as f32 / 64.0
}

#[async_trait]
impl FaceAuthBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn detect(&self, image: &CapturedImage) -> Result<FaceDetectionResult> {
        Ok(Self::analyze(image)?.0)
    }

    async fn register(&self, identity: &str, image: &CapturedImage) -> Result<FaceRegistration> {
        let (detection, fingerprint) = Self::analyze(image)?;
        if !detection.detected {
            return Err(AuthError::NoFaceDetected);
        }

        let reference = uuid::Uuid::new_v4().to_string();
        {
            let mut references = self
                .references
                .write()
                .map_err(|_| AuthError::Storage("Face reference table poisoned".into()))?;
            references.insert(reference.clone(), MockReference { identity: identity.to_string(), fingerprint });
            if let Some(path) = &self.table_path {
                if let Err(e) = Self::save(path, &references) {
                    references.remove(&reference);
                    return Err(e);
                }
            }
        }

        tracing::debug!("Mock backend registered face for {} as {}", identity, reference);
        Ok(FaceRegistration {
            success: true,
            reference: Some(reference),
            message: "Face registered successfully".into(),
        })
    }

    async fn verify(&self, reference: Option<&str>, image: &CapturedImage) -> Result<FaceVerification> {
        let reference = match reference {
            Some(reference) => reference,
            None => return Ok(FaceVerification::rejected("User ID is required for verification")),
        };

        let stored = {
            let references = self
                .references
                .read()
                .map_err(|_| AuthError::Storage("Face reference table poisoned".into()))?;
            references.get(reference).map(|r| (r.identity.clone(), r.fingerprint))
        };
        let (identity, stored_fingerprint) = match stored {
            Some(found) => found,
            None => return Ok(FaceVerification::rejected("User not found")),
        };

        let (detection, fingerprint) = Self::analyze(image)?;
        if !detection.detected {
            return Err(AuthError::NoFaceDetected);
        }

        let score = similarity(stored_fingerprint, fingerprint);
        tracing::debug!("Mock verify for {}: similarity {:.3}", identity, score);

        if score >= self.match_threshold {
            Ok(FaceVerification {
                success: true,
                confidence: Some(score),
                message: "Face verified successfully".into(),
            })
        } else {
            Ok(FaceVerification {
                success: false,
                confidence: Some(score),
                message: "Face verification failed".into(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, Luma, GrayImage};

    /// Bright on the right half.
    pub(crate) fn face_a() -> CapturedImage {
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([(x * 4) as u8]));
        CapturedImage::from_dynamic(&DynamicImage::ImageLuma8(img)).unwrap()
    }

    /// Bright on the bottom half.
    pub(crate) fn face_b() -> CapturedImage {
        let img = GrayImage::from_fn(64, 64, |_, y| Luma([(y * 4) as u8]));
        CapturedImage::from_dynamic(&DynamicImage::ImageLuma8(img)).unwrap()
    }

    pub(crate) fn blank() -> CapturedImage {
        let img = GrayImage::from_pixel(64, 64, Luma([128]));
        CapturedImage::from_dynamic(&DynamicImage::ImageLuma8(img)).unwrap()
    }

    #[tokio::test]
    async fn detects_contrast_only() {
        let backend = MockBackend::new(0.9);
        let found = backend.detect(&face_a()).await.unwrap();
        assert!(found.detected);
        assert!(found.bounding_box.is_some());
        assert!(!backend.detect(&blank()).await.unwrap().detected);
    }

    #[tokio::test]
    async fn same_image_verifies_different_does_not() {
        let backend = MockBackend::new(0.9);
        let reg = backend.register("a@x.com", &face_a()).await.unwrap();
        let reference = reg.reference.unwrap();

        let same = backend.verify(Some(&reference), &face_a()).await.unwrap();
        assert!(same.success);
        assert_eq!(same.confidence, Some(1.0));

        let other = backend.verify(Some(&reference), &face_b()).await.unwrap();
        assert!(!other.success);
    }

    #[tokio::test]
    async fn unknown_or_missing_reference_is_not_a_match() {
        let backend = MockBackend::new(0.9);
        assert!(!backend.verify(Some("nope"), &face_a()).await.unwrap().success);
        assert!(!backend.verify(None, &face_a()).await.unwrap().success);
    }

    #[tokio::test]
    async fn references_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("faces").join("face_references.bincode");

        let reference = {
            let backend = MockBackend::open(0.9, path.clone()).unwrap();
            backend.register("a@x.com", &face_a()).await.unwrap().reference.unwrap()
        };

        let reopened = MockBackend::open(0.9, path).unwrap();
        assert_eq!(reopened.reference_count(), 1);
        assert!(reopened.verify(Some(&reference), &face_a()).await.unwrap().success);
        assert!(!reopened.verify(Some(&reference), &face_b()).await.unwrap().success);
    }

    #[test]
    fn missing_table_opens_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = MockBackend::open(0.9, tmp.path().join("none.bincode")).unwrap();
        assert_eq!(backend.reference_count(), 0);
    }

    #[tokio::test]
    async fn blank_frame_cannot_register() {
        let backend = MockBackend::new(0.9);
        let err = backend.register("a@x.com", &blank()).await.unwrap_err();
        assert!(matches!(err, AuthError::NoFaceDetected));
        assert_eq!(backend.reference_count(), 0);
    }
}
