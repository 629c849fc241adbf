//! Multi-person pose adapter
//!
//! Expects a MoveNet-style network: `[1, S, S, 3]` RGB input and either a
//! multi-person output of `[1, N, 56]` (17 × `(y, x, score)` keypoints, then
//! `ymin, xmin, ymax, xmax, score`) or a single-person output of
//! `[1, 1, 17, 3]`. Keypoints come back in COCO-17 order.

use std::cmp::Ordering;

use image::RgbaImage;
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};

use super::{flip_point, letterbox, ort_error, to_nhwc, Detector, Letterbox};
use crate::error::DetectorError;
use crate::subject::{pose_parts, DetectedSubject, Keypoint, ModelKind};

const VALUES_PER_KEYPOINT: usize = 3;
const KEYPOINT_VALUES: usize = pose_parts::COUNT * VALUES_PER_KEYPOINT;
/// Keypoints followed by the box and the instance score
const VALUES_PER_INSTANCE: usize = KEYPOINT_VALUES + 5;

/// How many people the decoder looks for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodingMethod {
    SinglePerson,
    #[default]
    MultiPerson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseDetectorConfig {
    pub decoding_method: DecodingMethod,
    /// Mirror keypoints so they line up with the mirrored video
    pub flip_horizontal: bool,
    pub max_detections: usize,
    /// Instances scoring below this are dropped by the decoder
    pub score_threshold: f32,
    /// Two poses whose root keypoints are closer than this (frame pixels)
    /// are the same person
    pub nms_radius: f32,
    /// Model input side length
    pub input_size: u32,
    /// Feed int32 pixels instead of float32
    pub int_input: bool,
}

impl Default for PoseDetectorConfig {
    fn default() -> Self {
        Self {
            decoding_method: DecodingMethod::MultiPerson,
            flip_horizontal: true,
            max_detections: 5,
            score_threshold: 0.1,
            nms_radius: 30.0,
            input_size: 256,
            int_input: true,
        }
    }
}

pub struct PoseDetector {
    session: Session,
    config: PoseDetectorConfig,
}

impl PoseDetector {
    pub fn new(session: Session, config: PoseDetectorConfig) -> Self {
        Self { session, config }
    }

    fn infer(&mut self, frame: &RgbaImage) -> Result<(Vec<f32>, Letterbox), DetectorError> {
        let (input, fit) = letterbox(frame, self.config.input_size)?;

        let outputs = if self.config.int_input {
            let tensor = Tensor::from_array(to_nhwc(&input, i32::from)).map_err(ort_error)?;
            self.session.run(ort::inputs![tensor]).map_err(ort_error)?
        } else {
            let tensor = Tensor::from_array(to_nhwc(&input, f32::from)).map_err(ort_error)?;
            self.session.run(ort::inputs![tensor]).map_err(ort_error)?
        };

        let mut tensors = Vec::new();
        for (_name, value) in outputs.iter() {
            let (_shape, data) = value.try_extract_tensor::<f32>().map_err(ort_error)?;
            tensors.push(data.to_vec());
        }

        let raw = tensors
            .into_iter()
            .next()
            .ok_or_else(|| DetectorError::BadOutput("pose model produced no output".into()))?;
        Ok((raw, fit))
    }
}

impl Detector for PoseDetector {
    fn kind(&self) -> ModelKind {
        ModelKind::PoseNet
    }

    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<DetectedSubject>, DetectorError> {
        let (raw, fit) = self.infer(frame)?;
        decode_poses(&raw, &fit, &self.config)
    }
}

/// Turn raw network output into scored, suppressed poses in frame pixels
pub fn decode_poses(
    raw: &[f32],
    fit: &Letterbox,
    config: &PoseDetectorConfig,
) -> Result<Vec<DetectedSubject>, DetectorError> {
    let mut poses = if raw.len() == KEYPOINT_VALUES {
        vec![parse_single(raw, fit)]
    } else if !raw.is_empty() && raw.len() % VALUES_PER_INSTANCE == 0 {
        raw.chunks_exact(VALUES_PER_INSTANCE)
            .map(|instance| parse_instance(instance, fit))
            .collect()
    } else {
        return Err(DetectorError::BadOutput(format!(
            "pose output has {} values, expected {} or a multiple of {}",
            raw.len(),
            KEYPOINT_VALUES,
            VALUES_PER_INSTANCE
        )));
    };

    poses.retain(|p| p.score >= config.score_threshold);
    poses.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let limit = match config.decoding_method {
        DecodingMethod::SinglePerson => 1,
        DecodingMethod::MultiPerson => config.max_detections,
    };
    let mut kept = suppress_duplicates(poses, config.nms_radius, limit);

    if config.flip_horizontal {
        for pose in &mut kept {
            for keypoint in &mut pose.keypoints {
                keypoint.position = flip_point(keypoint.position, fit.frame_width);
            }
        }
    }
    Ok(kept)
}

fn parse_keypoints(values: &[f32], fit: &Letterbox) -> Vec<Keypoint> {
    values
        .chunks_exact(VALUES_PER_KEYPOINT)
        .map(|kp| {
            let position = fit.to_frame(kp[1], kp[0]);
            Keypoint {
                position,
                score: kp[2],
            }
        })
        .collect()
}

fn parse_instance(instance: &[f32], fit: &Letterbox) -> DetectedSubject {
    let keypoints = parse_keypoints(&instance[..KEYPOINT_VALUES], fit);
    DetectedSubject::new(instance[VALUES_PER_INSTANCE - 1], keypoints)
}

/// Single-person models carry no instance score; use the mean keypoint score
fn parse_single(raw: &[f32], fit: &Letterbox) -> DetectedSubject {
    let keypoints = parse_keypoints(raw, fit);
    let score = keypoints.iter().map(|k| k.score).sum::<f32>() / keypoints.len() as f32;
    DetectedSubject::new(score, keypoints)
}

/// Greedy suppression over poses sorted by descending score: a pose is
/// dropped when its strongest keypoint lies within `radius` of the same
/// keypoint of an already kept pose.
fn suppress_duplicates(
    poses: Vec<DetectedSubject>,
    radius: f32,
    limit: usize,
) -> Vec<DetectedSubject> {
    let mut kept: Vec<DetectedSubject> = Vec::new();
    for pose in poses {
        if kept.len() >= limit {
            break;
        }
        let root = pose
            .keypoints
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
            .map(|(i, k)| (i, k.position));

        let duplicate = root.is_some_and(|(i, position)| {
            kept.iter()
                .filter_map(|other| other.keypoint(i))
                .any(|other| other.position.distance(position) < radius)
        });
        if !duplicate {
            kept.push(pose);
        }
    }
    kept
}
