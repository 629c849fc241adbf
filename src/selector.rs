//! Confidence filtering and main-subject selection

use crate::geometry::Point;
use crate::subject::{DetectedSubject, SubjectLayout};

/// Keep the subjects scoring at least `min_score`, preserving order
pub fn filter_confident(subjects: &[DetectedSubject], min_score: f32) -> Vec<DetectedSubject> {
    subjects
        .iter()
        .filter(|s| s.score >= min_score)
        .cloned()
        .collect()
}

/// Index of the subject whose anchor keypoint is closest to `frame_center`.
///
/// Ties go to the earliest subject. Subjects missing the anchor keypoint,
/// or whose anchor is not a finite position, are never selected. Returns
/// `None` when nothing qualifies.
pub fn select_main(
    subjects: &[DetectedSubject],
    layout: &SubjectLayout,
    frame_center: Point,
) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, subject) in subjects.iter().enumerate() {
        let Some(anchor) = subject.anchor(layout) else {
            continue;
        };
        let distance = anchor.distance(frame_center);
        if !distance.is_finite() {
            continue;
        }
        // Strict comparison: an equal distance keeps the earlier subject
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            best = Some((index, distance));
        }
    }
    best.map(|(index, _)| index)
}
