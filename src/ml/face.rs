//! Face adapter for the BlazeFace short-range detector
//!
//! Input is `[1, 128, 128, 3]` RGB scaled to [-1, 1]. The network predicts
//! one box plus six landmarks per SSD anchor (896 anchors); scores are
//! logits. Landmarks come back in BlazeFace order: right eye, left eye, nose
//! tip, mouth, right ear tragion, left ear tragion.

use std::cmp::Ordering;

use image::RgbaImage;
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};

use super::{find_output, flip_point, letterbox, ort_error, to_nhwc, Detector, Letterbox};
use crate::error::DetectorError;
use crate::geometry::{Point, Rect};
use crate::subject::{face_parts, DetectedSubject, Keypoint, ModelKind};

/// Box (4) then landmark pairs (2 × 6)
const VALUES_PER_ANCHOR: usize = 4 + 2 * face_parts::COUNT;
/// Feature map strides; consecutive equal strides share one grid
const STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: usize = 2;
const SCORE_CLIP: f32 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceDetectorConfig {
    /// Mirror landmarks so they line up with the mirrored video
    pub flip_horizontal: bool,
    pub max_faces: usize,
    /// Minimum sigmoid score for a candidate box
    pub score_threshold: f32,
    /// Boxes overlapping a stronger box by more than this are dropped
    pub iou_threshold: f32,
    /// Model input side length
    pub input_size: u32,
    /// Feed NCHW instead of NHWC
    pub channels_first: bool,
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        Self {
            flip_horizontal: true,
            max_faces: 10,
            score_threshold: 0.75,
            iou_threshold: 0.3,
            input_size: 128,
            channels_first: false,
        }
    }
}

pub struct FaceDetector {
    session: Session,
    config: FaceDetectorConfig,
    anchors: Vec<Point>,
}

impl FaceDetector {
    pub fn new(session: Session, config: FaceDetectorConfig) -> Self {
        let anchors = generate_anchors(config.input_size);
        Self {
            session,
            config,
            anchors,
        }
    }

    fn infer(&mut self, frame: &RgbaImage) -> Result<(Vec<Vec<f32>>, Letterbox), DetectorError> {
        let (input, fit) = letterbox(frame, self.config.input_size)?;

        let mut array = to_nhwc(&input, |v| v as f32 / 127.5 - 1.0);
        if self.config.channels_first {
            array = array.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned();
        }
        let tensor = Tensor::from_array(array).map_err(ort_error)?;
        let outputs = self.session.run(ort::inputs![tensor]).map_err(ort_error)?;

        let mut tensors = Vec::new();
        for (_name, value) in outputs.iter() {
            let (_shape, data) = value.try_extract_tensor::<f32>().map_err(ort_error)?;
            tensors.push(data.to_vec());
        }
        Ok((tensors, fit))
    }
}

impl Detector for FaceDetector {
    fn kind(&self) -> ModelKind {
        ModelKind::BlazeFace
    }

    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<DetectedSubject>, DetectorError> {
        let (outputs, fit) = self.infer(frame)?;

        let n = self.anchors.len();
        let regressors = find_output(&outputs, n * VALUES_PER_ANCHOR).ok_or_else(|| {
            DetectorError::BadOutput(format!("no regressor output with {} values", n * VALUES_PER_ANCHOR))
        })?;
        let scores = find_output(&outputs, n)
            .ok_or_else(|| DetectorError::BadOutput(format!("no score output with {n} values")))?;

        decode_faces(&outputs[regressors], &outputs[scores], &self.anchors, &fit, &self.config)
    }
}

/// SSD anchor centers, normalized to the input, in network output order
pub fn generate_anchors(input_size: u32) -> Vec<Point> {
    let mut anchors = Vec::new();
    let mut layer = 0;
    while layer < STRIDES.len() {
        let stride = STRIDES[layer];
        let mut per_cell = 0;
        while layer < STRIDES.len() && STRIDES[layer] == stride {
            per_cell += ANCHORS_PER_LAYER;
            layer += 1;
        }

        let grid = input_size.div_ceil(stride);
        for y in 0..grid {
            for x in 0..grid {
                let center = Point::new(
                    (x as f32 + 0.5) / grid as f32,
                    (y as f32 + 0.5) / grid as f32,
                );
                anchors.extend(std::iter::repeat(center).take(per_cell));
            }
        }
    }
    anchors
}

fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit.clamp(-SCORE_CLIP, SCORE_CLIP)).exp())
}

/// Decode, threshold and suppress raw BlazeFace output into frame-space faces
pub fn decode_faces(
    regressors: &[f32],
    logits: &[f32],
    anchors: &[Point],
    fit: &Letterbox,
    config: &FaceDetectorConfig,
) -> Result<Vec<DetectedSubject>, DetectorError> {
    if logits.len() != anchors.len() || regressors.len() != anchors.len() * VALUES_PER_ANCHOR {
        return Err(DetectorError::BadOutput(format!(
            "face output sizes {} / {} do not match {} anchors",
            regressors.len(),
            logits.len(),
            anchors.len()
        )));
    }

    let input = config.input_size as f32;
    let mut candidates = Vec::new();
    for ((raw, &logit), anchor) in regressors
        .chunks_exact(VALUES_PER_ANCHOR)
        .zip(logits)
        .zip(anchors)
    {
        let score = sigmoid(logit);
        if score < config.score_threshold {
            continue;
        }

        let center = fit.to_frame(raw[0] / input + anchor.x, raw[1] / input + anchor.y);
        let width = fit.length_to_frame(raw[2] / input);
        let height = fit.length_to_frame(raw[3] / input);
        let bounds = Rect::new(center.x - width / 2.0, center.y - height / 2.0, width, height);

        let keypoints = raw[4..]
            .chunks_exact(2)
            .map(|lm| Keypoint {
                position: fit.to_frame(lm[0] / input + anchor.x, lm[1] / input + anchor.y),
                score,
            })
            .collect();
        candidates.push(DetectedSubject::new(score, keypoints).with_bounds(bounds));
    }

    let mut faces = non_max_suppression(candidates, config.iou_threshold);
    faces.truncate(config.max_faces);

    if config.flip_horizontal {
        for face in &mut faces {
            for keypoint in &mut face.keypoints {
                keypoint.position = flip_point(keypoint.position, fit.frame_width);
            }
            face.bounds = face.bounds.map(|b| b.mirrored(fit.frame_width as f32));
        }
    }
    Ok(faces)
}

/// Greedy NMS: sort by score descending, drop boxes overlapping a kept box
fn non_max_suppression(mut faces: Vec<DetectedSubject>, iou_threshold: f32) -> Vec<DetectedSubject> {
    faces.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<DetectedSubject> = Vec::new();
    for face in faces {
        let overlaps = match face.bounds {
            Some(bounds) => kept
                .iter()
                .filter_map(|k| k.bounds)
                .any(|k| k.iou(&bounds) > iou_threshold),
            None => false,
        };
        if !overlaps {
            kept.push(face);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIT: Letterbox = Letterbox {
        size: 128,
        scale: 0.2,
        frame_width: 640,
        frame_height: 480,
    };

    fn unflipped() -> FaceDetectorConfig {
        FaceDetectorConfig {
            flip_horizontal: false,
            ..Default::default()
        }
    }

    /// Raw output with `faces` placed as (anchor index, logit, box size px)
    fn raw_output(anchors: &[Point], faces: &[(usize, f32, f32)]) -> (Vec<f32>, Vec<f32>) {
        let mut regressors = vec![0.0; anchors.len() * VALUES_PER_ANCHOR];
        let mut logits = vec![-10.0; anchors.len()];
        for &(index, logit, size) in faces {
            logits[index] = logit;
            let raw = &mut regressors[index * VALUES_PER_ANCHOR..(index + 1) * VALUES_PER_ANCHOR];
            raw[2] = size;
            raw[3] = size;
            // right eye 10 px left of the anchor, left eye 10 px right
            raw[4] = -10.0;
            raw[6] = 10.0;
        }
        (regressors, logits)
    }

    #[test]
    fn test_anchor_count_and_order() {
        let anchors = generate_anchors(128);
        assert_eq!(anchors.len(), 896);
        // 16×16 grid with 2 anchors per cell first
        assert_eq!(anchors[0], anchors[1]);
        assert!((anchors[0].x - 0.5 / 16.0).abs() < 1e-6);
        assert!((anchors[2].x - 1.5 / 16.0).abs() < 1e-6);
        // then an 8×8 grid with 6 anchors per cell
        assert!((anchors[512].x - 0.5 / 8.0).abs() < 1e-6);
        assert_eq!(anchors[512], anchors[517]);
        assert!((anchors[518].x - 1.5 / 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(1000.0) <= 1.0);
        assert!(sigmoid(-1000.0) >= 0.0);
    }

    #[test]
    fn test_decode_single_face() {
        let anchors = generate_anchors(128);
        // anchor 0 sits at (4, 4) in input pixels, (20, 20) in the frame
        let (regressors, logits) = raw_output(&anchors, &[(0, 5.0, 20.0)]);
        let faces = decode_faces(&regressors, &logits, &anchors, &FIT, &unflipped()).unwrap();
        assert_eq!(faces.len(), 1);

        let face = &faces[0];
        assert!(face.score > 0.99);
        assert_eq!(face.keypoints.len(), face_parts::COUNT);
        let bounds = face.bounds.unwrap();
        assert!((bounds.width - 100.0).abs() < 1e-3);
        assert!((bounds.x - (20.0 - 50.0)).abs() < 1e-3);

        let right = face.keypoint(face_parts::RIGHT_EYE).unwrap().position;
        let left = face.keypoint(face_parts::LEFT_EYE).unwrap().position;
        assert!((right.x - (20.0 - 50.0)).abs() < 1e-3);
        assert!((left.x - (20.0 + 50.0)).abs() < 1e-3);
    }

    #[test]
    fn test_decode_flip_puts_right_eye_on_the_right() {
        let anchors = generate_anchors(128);
        let (regressors, logits) = raw_output(&anchors, &[(300, 5.0, 20.0)]);
        let faces =
            decode_faces(&regressors, &logits, &anchors, &FIT, &FaceDetectorConfig::default()).unwrap();
        let right = faces[0].keypoint(face_parts::RIGHT_EYE).unwrap().position;
        let left = faces[0].keypoint(face_parts::LEFT_EYE).unwrap().position;
        assert!(right.x > left.x);

        let bounds = faces[0].bounds.unwrap();
        let nose = faces[0].keypoint(face_parts::NOSE).unwrap().position;
        assert!(nose.x > bounds.x && nose.x < bounds.right());
    }

    #[test]
    fn test_decode_suppresses_overlaps() {
        let anchors = generate_anchors(128);
        // anchors 0 and 1 share a center: same box, lower score dropped
        // anchor 40 is on a distant row
        let (regressors, logits) =
            raw_output(&anchors, &[(0, 3.0, 20.0), (1, 4.0, 20.0), (40, 2.0, 20.0)]);
        let faces = decode_faces(&regressors, &logits, &anchors, &FIT, &unflipped()).unwrap();
        assert_eq!(faces.len(), 2);
        assert!((faces[0].score - sigmoid(4.0)).abs() < 1e-6);
        assert!((faces[1].score - sigmoid(2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_decode_threshold_and_limit() {
        let anchors = generate_anchors(128);
        // logit 0 -> 0.5, below the 0.75 default
        let (regressors, logits) = raw_output(&anchors, &[(0, 0.0, 10.0)]);
        let faces = decode_faces(&regressors, &logits, &anchors, &FIT, &unflipped()).unwrap();
        assert!(faces.is_empty());

        let spread: Vec<(usize, f32, f32)> = (0..12).map(|i| (i * 40, 5.0, 4.0)).collect();
        let (regressors, logits) = raw_output(&anchors, &spread);
        let config = FaceDetectorConfig {
            max_faces: 3,
            ..unflipped()
        };
        let faces = decode_faces(&regressors, &logits, &anchors, &FIT, &config).unwrap();
        assert_eq!(faces.len(), 3);
    }

    #[test]
    fn test_decode_rejects_mismatched_outputs() {
        let anchors = generate_anchors(128);
        let err = decode_faces(&[0.0; 16], &[0.0; 1], &anchors, &FIT, &unflipped()).unwrap_err();
        assert!(matches!(err, DetectorError::BadOutput(_)));
    }
}
