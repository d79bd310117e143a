//! The embedding collaborator: locate faces, encode them, compare vectors.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, DistanceMetric, Embedding};
use rollcall_hw::Frame;
use std::path::Path;
use thiserror::Error;

const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("face region outside frame: {0:?}")]
    RegionOutOfFrame(BoundingBox),
}

/// Produces feature vectors for faces and defines how they are compared.
pub trait FaceEmbedder: Send {
    /// Find face regions in a frame, most confident first.
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, EmbeddingError>;

    /// Encode each region; one result per region, in region order.
    fn encode(
        &mut self,
        frame: &Frame,
        regions: &[BoundingBox],
    ) -> Vec<Result<Embedding, EmbeddingError>>;

    /// The scale `distance` reports on.
    fn metric(&self) -> DistanceMetric;

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        self.metric().distance(a, b)
    }
}

/// SCRFD detection + ArcFace recognition, both via ONNX Runtime.
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EmbeddingError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, EmbeddingError> {
        Ok(self.detector.detect(frame)?)
    }

    fn encode(
        &mut self,
        frame: &Frame,
        regions: &[BoundingBox],
    ) -> Vec<Result<Embedding, EmbeddingError>> {
        regions
            .iter()
            .map(|region| {
                if region.x + region.width <= 0.0
                    || region.y + region.height <= 0.0
                    || region.x >= frame.width as f32
                    || region.y >= frame.height as f32
                {
                    return Err(EmbeddingError::RegionOutOfFrame(region.clone()));
                }
                Ok(self.recognizer.extract(frame, region)?)
            })
            .collect()
    }

    fn metric(&self) -> DistanceMetric {
        // ArcFace embeddings are L2-normalised; compare by angle.
        DistanceMetric::Cosine
    }
}
