//! Per-frame detection results
//!
//! Every model adapter produces the same [`DetectedSubject`] shape. What an
//! index in `keypoints` means depends on the model, and is described by the
//! model's [`SubjectLayout`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect};

/// Minimum overall score for a pose to be drawn
pub const MIN_POSE_CONFIDENCE: f32 = 0.15;
/// Minimum score for an individual keypoint to be drawn
pub const MIN_PART_CONFIDENCE: f32 = 0.1;
/// Minimum overall score for a face to be drawn
pub const MIN_FACE_CONFIDENCE: f32 = 0.15;

/// A located keypoint or landmark
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Keypoint {
    pub position: Point,
    pub score: f32,
}

impl Keypoint {
    pub const fn new(x: f32, y: f32, score: f32) -> Self {
        Self {
            position: Point::new(x, y),
            score,
        }
    }
}

/// One person or face found in a frame.
///
/// Subjects are created fresh every frame; there is no identity across
/// frames.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectedSubject {
    /// Overall detection score in [0, 1]
    pub score: f32,
    /// Keypoints in model output order
    pub keypoints: Vec<Keypoint>,
    /// Box reported by the detector, if it reports one
    pub bounds: Option<Rect>,
}

impl DetectedSubject {
    pub fn new(score: f32, keypoints: Vec<Keypoint>) -> Self {
        Self {
            score,
            keypoints,
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Rect) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn keypoint(&self, index: usize) -> Option<&Keypoint> {
        self.keypoints.get(index)
    }

    /// Position of the layout's anchor keypoint (the nose)
    pub fn anchor(&self, layout: &SubjectLayout) -> Option<Point> {
        self.keypoint(layout.anchor).map(|k| k.position)
    }

    /// Position of keypoint `index` if it scores at least
    /// [`MIN_PART_CONFIDENCE`]
    pub fn confident_position(&self, index: usize) -> Option<Point> {
        self.keypoint(index)
            .filter(|k| k.score >= MIN_PART_CONFIDENCE)
            .map(|k| k.position)
    }

    /// `(left, right)` eye positions, when both are confident
    pub fn eyes(&self, layout: &SubjectLayout) -> Option<(Point, Point)> {
        let left = self.confident_position(layout.left_eye)?;
        let right = self.confident_position(layout.right_eye)?;
        Some((left, right))
    }

    /// `(left, right)` outermost head landmarks (the ears), when both are
    /// confident
    pub fn outer_landmarks(&self, layout: &SubjectLayout) -> Option<(Point, Point)> {
        let left = self.confident_position(layout.left_outer)?;
        let right = self.confident_position(layout.right_outer)?;
        Some((left, right))
    }

    /// Face region: the detector's box if present, otherwise the padded
    /// bounds of the confident head keypoints.
    pub fn face_bounds(&self, layout: &SubjectLayout) -> Option<Rect> {
        if let Some(bounds) = self.bounds {
            return Some(bounds);
        }
        let head = layout
            .head
            .iter()
            .filter_map(|&i| self.confident_position(i));
        Rect::bounding(head).map(|r| r.padded(0.25))
    }
}

/// Index table describing one model's keypoint convention
#[derive(Debug, PartialEq)]
pub struct SubjectLayout {
    /// Keypoint measured against the frame center when picking the main subject
    pub anchor: usize,
    pub left_eye: usize,
    pub right_eye: usize,
    pub left_outer: usize,
    pub right_outer: usize,
    /// Keypoints spanning the face
    pub head: &'static [usize],
    /// Keypoint pairs joined when drawing the skeleton
    pub edges: &'static [(usize, usize)],
    /// Eye separation (px) at which the sunglasses sprite is drawn at its native size
    pub sunglasses_calibration: f32,
    /// Minimum subject score for this model
    pub min_confidence: f32,
}

/// COCO-17 pose keypoints
pub mod pose_parts {
    pub const NOSE: usize = 0;
    pub const LEFT_EYE: usize = 1;
    pub const RIGHT_EYE: usize = 2;
    pub const LEFT_EAR: usize = 3;
    pub const RIGHT_EAR: usize = 4;
    pub const LEFT_SHOULDER: usize = 5;
    pub const RIGHT_SHOULDER: usize = 6;
    pub const LEFT_ELBOW: usize = 7;
    pub const RIGHT_ELBOW: usize = 8;
    pub const LEFT_WRIST: usize = 9;
    pub const RIGHT_WRIST: usize = 10;
    pub const LEFT_HIP: usize = 11;
    pub const RIGHT_HIP: usize = 12;
    pub const LEFT_KNEE: usize = 13;
    pub const RIGHT_KNEE: usize = 14;
    pub const LEFT_ANKLE: usize = 15;
    pub const RIGHT_ANKLE: usize = 16;
    pub const COUNT: usize = 17;
}

/// BlazeFace landmarks
pub mod face_parts {
    pub const RIGHT_EYE: usize = 0;
    pub const LEFT_EYE: usize = 1;
    pub const NOSE: usize = 2;
    pub const MOUTH: usize = 3;
    pub const RIGHT_EAR: usize = 4;
    pub const LEFT_EAR: usize = 5;
    pub const COUNT: usize = 6;
}

pub static POSE_LAYOUT: SubjectLayout = {
    use pose_parts::*;
    SubjectLayout {
        anchor: NOSE,
        left_eye: LEFT_EYE,
        right_eye: RIGHT_EYE,
        left_outer: LEFT_EAR,
        right_outer: RIGHT_EAR,
        head: &[NOSE, LEFT_EYE, RIGHT_EYE, LEFT_EAR, RIGHT_EAR],
        edges: &[
            (LEFT_HIP, LEFT_SHOULDER),
            (LEFT_ELBOW, LEFT_SHOULDER),
            (LEFT_ELBOW, LEFT_WRIST),
            (LEFT_HIP, LEFT_KNEE),
            (LEFT_KNEE, LEFT_ANKLE),
            (RIGHT_HIP, RIGHT_SHOULDER),
            (RIGHT_ELBOW, RIGHT_SHOULDER),
            (RIGHT_ELBOW, RIGHT_WRIST),
            (RIGHT_HIP, RIGHT_KNEE),
            (RIGHT_KNEE, RIGHT_ANKLE),
            (LEFT_SHOULDER, RIGHT_SHOULDER),
            (LEFT_HIP, RIGHT_HIP),
        ],
        sunglasses_calibration: 110.0,
        min_confidence: MIN_POSE_CONFIDENCE,
    }
};

pub static FACE_LAYOUT: SubjectLayout = {
    use face_parts::*;
    SubjectLayout {
        anchor: NOSE,
        left_eye: LEFT_EYE,
        right_eye: RIGHT_EYE,
        left_outer: LEFT_EAR,
        right_outer: RIGHT_EAR,
        head: &[RIGHT_EYE, LEFT_EYE, NOSE, MOUTH, RIGHT_EAR, LEFT_EAR],
        edges: &[],
        sunglasses_calibration: 130.0,
        min_confidence: MIN_FACE_CONFIDENCE,
    }
};

/// Selectable model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Multi-person body pose
    #[default]
    PoseNet,
    /// Short-range face detector with six landmarks
    BlazeFace,
}

impl ModelKind {
    pub fn layout(&self) -> &'static SubjectLayout {
        match self {
            ModelKind::PoseNet => &POSE_LAYOUT,
            ModelKind::BlazeFace => &FACE_LAYOUT,
        }
    }

    /// Name used on the command line and in the config file
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::PoseNet => "posenet",
            ModelKind::BlazeFace => "blazeface",
        }
    }

    /// Label for the UI
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::PoseNet => "Pose",
            ModelKind::BlazeFace => "Face",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "posenet" | "pose" => Ok(ModelKind::PoseNet),
            "blazeface" | "face" => Ok(ModelKind::BlazeFace),
            other => Err(format!("unknown model '{other}' (expected posenet or blazeface)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_with_head(points: [(f32, f32, f32); 5]) -> DetectedSubject {
        let mut keypoints = vec![Keypoint::default(); pose_parts::COUNT];
        for (i, (x, y, s)) in points.into_iter().enumerate() {
            keypoints[i] = Keypoint::new(x, y, s);
        }
        DetectedSubject::new(0.9, keypoints)
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("posenet".parse::<ModelKind>(), Ok(ModelKind::PoseNet));
        assert_eq!("BlazeFace".parse::<ModelKind>(), Ok(ModelKind::BlazeFace));
        assert!("yolo".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::default(), ModelKind::PoseNet);
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(ModelKind::PoseNet.layout().sunglasses_calibration, 110.0);
        assert_eq!(ModelKind::BlazeFace.layout().sunglasses_calibration, 130.0);
        assert_eq!(FACE_LAYOUT.right_eye, 0);
        assert_eq!(FACE_LAYOUT.left_eye, 1);
    }

    #[test]
    fn test_eyes_follow_layout() {
        let subject = pose_with_head([
            (50.0, 50.0, 0.9),
            (40.0, 45.0, 0.9),
            (60.0, 45.0, 0.9),
            (30.0, 50.0, 0.9),
            (70.0, 50.0, 0.9),
        ]);
        let (left, right) = subject.eyes(&POSE_LAYOUT).unwrap();
        assert_eq!(left, Point::new(40.0, 45.0));
        assert_eq!(right, Point::new(60.0, 45.0));
        assert_eq!(subject.anchor(&POSE_LAYOUT), Some(Point::new(50.0, 50.0)));
    }

    #[test]
    fn test_weak_eyes_and_ears_are_ignored() {
        let subject = pose_with_head([
            (50.0, 50.0, 0.9),
            (40.0, 45.0, 0.05),
            (60.0, 45.0, 0.9),
            (30.0, 50.0, 0.9),
            (70.0, 50.0, 0.09),
        ]);
        assert!(subject.eyes(&POSE_LAYOUT).is_none());
        assert!(subject.outer_landmarks(&POSE_LAYOUT).is_none());
        assert_eq!(subject.confident_position(pose_parts::RIGHT_EYE), Some(Point::new(60.0, 45.0)));
        assert_eq!(subject.confident_position(pose_parts::LEFT_EYE), None);
    }

    #[test]
    fn test_face_bounds_skips_weak_keypoints() {
        let subject = pose_with_head([
            (50.0, 50.0, 0.9),
            (40.0, 40.0, 0.9),
            (60.0, 40.0, 0.9),
            (0.0, 0.0, 0.01),
            (60.0, 60.0, 0.9),
        ]);
        let bounds = subject.face_bounds(&POSE_LAYOUT).unwrap();
        assert_eq!(bounds, Rect::new(40.0, 40.0, 20.0, 20.0).padded(0.25));
    }

    #[test]
    fn test_face_bounds_prefers_detector_box() {
        let boxed = Rect::new(1.0, 2.0, 3.0, 4.0);
        let subject = DetectedSubject::new(0.9, vec![]).with_bounds(boxed);
        assert_eq!(subject.face_bounds(&FACE_LAYOUT), Some(boxed));
        assert!(DetectedSubject::default().face_bounds(&FACE_LAYOUT).is_none());
    }
}
