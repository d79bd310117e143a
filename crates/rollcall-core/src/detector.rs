//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame into a 640x640 tensor, decodes the three
//! anchor-free stride heads, and suppresses overlaps with greedy NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_hw::Frame;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the frame landed inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let pad_x = ((size - (width as f32 * scale).round()) / 2.0).floor();
        let pad_y = ((size - (height as f32 * scale).round()) / 2.0).floor();
        Self { scale, pad_x, pad_y }
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideHead {
    stride: usize,
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [StrideHead; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), got {}",
                output_names.len()
            )));
        }

        let heads = map_stride_heads(&output_names);
        tracing::info!(path = %model_path.display(), ?heads, "loaded SCRFD model");

        Ok(Self { session, heads })
    }

    /// Detect faces, most confident first. Coordinates are in frame pixels.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = letterbox_tensor(frame)?;
        let heads = self.heads;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for head in heads {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {}: {e}", head.stride))
                    })
            };
            let scores = extract(head.score, "scores")?;
            let bboxes = extract(head.bbox, "bboxes")?;
            let kps = extract(head.kps, "kps")?;
            candidates.extend(decode_head(head.stride, scores, bboxes, kps, &letterbox));
        }

        Ok(suppress_overlaps(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Resize the frame into the centre of a mean-padded square NCHW tensor.
fn letterbox_tensor(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let letterbox = Letterbox::fit(frame.width, frame.height);
    let gray = GrayImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
        DetectorError::InferenceFailed(format!(
            "frame buffer does not match {}x{}",
            frame.width, frame.height
        ))
    })?;
    let new_w = ((frame.width as f32 * letterbox.scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((frame.height as f32 * letterbox.scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let resized = imageops::resize(&gray, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    let (off_x, off_y) = (letterbox.pad_x as u32, letterbox.pad_y as u32);
    let tensor = Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
        let (x, y) = (x as u32, y as u32);
        let pixel = if x >= off_x && y >= off_y && x - off_x < new_w && y - off_y < new_h {
            resized.get_pixel(x - off_x, y - off_y).0[0] as f32
        } else {
            SCRFD_MEAN
        };
        (pixel - SCRFD_MEAN) / SCRFD_STD
    });

    Ok((tensor, letterbox))
}

/// Resolve output tensors by name ("score_8", "bbox_16", ...), or fall back
/// to the positional layout [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn map_stride_heads(names: &[String]) -> [StrideHead; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideHead>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideHead {
                stride,
                score: find("score", stride)?,
                bbox: find("bbox", stride)?,
                kps: find("kps", stride)?,
            })
        })
        .collect();

    match named {
        Some(heads) => [heads[0], heads[1], heads[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognised, using positional mapping");
            std::array::from_fn(|i| StrideHead {
                stride: SCRFD_STRIDES[i],
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Decode one stride head into candidate boxes above the confidence threshold.
fn decode_head(
    stride: usize,
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE as usize / stride;
    let step = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > SCRFD_CONFIDENCE_THRESHOLD)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * step;
            let ay = (cell / grid_w) as f32 * step;

            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn suppress_overlaps(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
