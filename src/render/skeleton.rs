//! Keypoint and skeleton drawing

use image::Rgba;

use super::{Canvas, Color};
use crate::subject::{DetectedSubject, SubjectLayout};

/// Per-subject colors, cycled by subject index
pub const PALETTE: [Color; 6] = [
    Rgba([0, 255, 255, 255]),
    Rgba([255, 0, 255, 255]),
    Rgba([255, 255, 0, 255]),
    Rgba([0, 255, 0, 255]),
    Rgba([255, 128, 0, 255]),
    Rgba([0, 128, 255, 255]),
];

const KEYPOINT_RADIUS: f32 = 3.0;
const LINE_WIDTH: f32 = 2.0;

/// Color for the `index`-th subject of a frame
pub fn subject_color(index: usize) -> Color {
    PALETTE[index % PALETTE.len()]
}

/// Dots for every keypoint scoring at least `min_part_confidence`
pub fn draw_keypoints(
    canvas: &mut dyn Canvas,
    subject: &DetectedSubject,
    min_part_confidence: f32,
    color: Color,
) {
    for keypoint in subject.keypoints.iter().filter(|k| k.score >= min_part_confidence) {
        canvas.fill_circle(keypoint.position, KEYPOINT_RADIUS, color);
    }
}

/// Segments for every layout edge whose two ends are confident
pub fn draw_skeleton(
    canvas: &mut dyn Canvas,
    subject: &DetectedSubject,
    layout: &SubjectLayout,
    min_part_confidence: f32,
    color: Color,
) {
    for &(from, to) in layout.edges {
        let (Some(a), Some(b)) = (subject.keypoint(from), subject.keypoint(to)) else {
            continue;
        };
        if a.score < min_part_confidence || b.score < min_part_confidence {
            continue;
        }
        canvas.stroke_line(a.position, b.position, LINE_WIDTH, color);
    }
}

/// Outline of the detector's box, for models that report one
pub fn draw_bounds(canvas: &mut dyn Canvas, subject: &DetectedSubject, color: Color) {
    if let Some(bounds) = subject.bounds {
        canvas.stroke_rect(bounds, LINE_WIDTH, color);
    }
}

/// Everything drawn for one subject regardless of privacy mode
pub fn draw_subject(
    canvas: &mut dyn Canvas,
    subject: &DetectedSubject,
    layout: &SubjectLayout,
    min_part_confidence: f32,
    color: Color,
) {
    draw_keypoints(canvas, subject, min_part_confidence, color);
    draw_skeleton(canvas, subject, layout, min_part_confidence, color);
    draw_bounds(canvas, subject, color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RasterCanvas;
    use crate::subject::{pose_parts, Keypoint, MIN_PART_CONFIDENCE, POSE_LAYOUT};

    fn arm(shoulder_score: f32) -> DetectedSubject {
        let mut keypoints = vec![Keypoint::new(0.0, 0.0, 0.0); pose_parts::COUNT];
        keypoints[pose_parts::LEFT_SHOULDER] = Keypoint::new(10.0, 10.0, shoulder_score);
        keypoints[pose_parts::LEFT_ELBOW] = Keypoint::new(40.0, 10.0, 0.9);
        DetectedSubject::new(0.8, keypoints)
    }

    #[test]
    fn test_palette_cycles() {
        assert_eq!(subject_color(0), subject_color(PALETTE.len()));
        assert_ne!(subject_color(0), subject_color(1));
    }

    #[test]
    fn test_skeleton_joins_confident_parts() {
        let mut canvas = RasterCanvas::new(50, 20);
        draw_skeleton(&mut canvas, &arm(0.9), &POSE_LAYOUT, MIN_PART_CONFIDENCE, PALETTE[0]);
        assert_eq!(canvas.image().get_pixel(25, 10), &PALETTE[0]);
    }

    #[test]
    fn test_weak_parts_are_not_drawn() {
        let mut canvas = RasterCanvas::new(50, 20);
        let subject = arm(0.05);
        draw_skeleton(&mut canvas, &subject, &POSE_LAYOUT, MIN_PART_CONFIDENCE, PALETTE[0]);
        assert_eq!(canvas.image().get_pixel(25, 10).0, [0, 0, 0, 0]);

        draw_keypoints(&mut canvas, &subject, MIN_PART_CONFIDENCE, PALETTE[1]);
        assert_eq!(canvas.image().get_pixel(10, 10).0, [0, 0, 0, 0]);
        assert_eq!(canvas.image().get_pixel(40, 10), &PALETTE[1]);
    }
}
