//! Privacy overlays
//!
//! Three interchangeable ways to hide a subject's eyes or face. Which
//! subjects get one is decided by [`OverlayTarget`]; the main subject is
//! left visible unless the target is [`OverlayTarget::All`].

use std::path::Path;

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_ellipse_mut, draw_polygon_mut};
use imageproc::point::Point as PolyPoint;
use serde::{Deserialize, Serialize};

use super::{Canvas, BLACK, TRANSLUCENT_RED};
use crate::geometry::{Point, Rect};
use crate::subject::{DetectedSubject, SubjectLayout};

/// Horizontal extent of the eye-line bar
pub const EYE_BAR_LENGTH: f32 = 100.0;
/// Thickness of the eye-line bar
pub const EYE_BAR_THICKNESS: f32 = 24.0;
/// The sprite's top edge sits `height / SUNGLASSES_LIFT` above the eye center
pub const SUNGLASSES_LIFT: f32 = 2.3;

const SPRITE_WIDTH: u32 = 260;
const SPRITE_HEIGHT: u32 = 100;

/// Overlay drawn over hidden subjects
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyStyle {
    /// Opaque bar across the eyes
    EyeLine,
    /// Translucent red box over the face
    RedBox,
    /// Sunglasses sprite aligned with the eye axis
    #[default]
    Sunglasses,
}

impl PrivacyStyle {
    pub const ALL: [PrivacyStyle; 3] = [
        PrivacyStyle::EyeLine,
        PrivacyStyle::RedBox,
        PrivacyStyle::Sunglasses,
    ];

    /// Get display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            PrivacyStyle::EyeLine => "Eye line",
            PrivacyStyle::RedBox => "Red box",
            PrivacyStyle::Sunglasses => "Sunglasses",
        }
    }
}

/// Which subjects receive the overlay
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayTarget {
    /// Everyone except the main subject
    #[default]
    Others,
    /// Every confident subject, main included
    All,
}

impl OverlayTarget {
    pub fn applies_to(&self, is_main: bool) -> bool {
        match self {
            OverlayTarget::Others => !is_main,
            OverlayTarget::All => true,
        }
    }

    /// Get display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            OverlayTarget::Others => "Everyone but the main subject",
            OverlayTarget::All => "Everyone",
        }
    }
}

/// Angle of the eye axis, from the left eye to the right eye
pub fn eye_angle(left: Point, right: Point) -> f32 {
    (right.y - left.y).atan2(right.x - left.x)
}

/// Sprite scale for a given eye separation
pub fn sprite_scale(left: Point, right: Point, calibration: f32) -> f32 {
    (right.x - left.x).abs() / calibration
}

/// Where and how the sunglasses sprite is drawn
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpritePlacement {
    /// Rotation center (midpoint between the eyes)
    pub center: Point,
    /// Rotation in radians
    pub angle: f32,
    /// Drawn width
    pub width: f32,
    /// Drawn height
    pub height: f32,
}

impl SpritePlacement {
    pub fn new(left: Point, right: Point, calibration: f32, sprite_width: u32, sprite_height: u32) -> Self {
        let scale = sprite_scale(left, right, calibration);
        Self {
            center: left.midpoint(right),
            angle: eye_angle(left, right),
            width: sprite_width as f32 * scale,
            height: sprite_height as f32 * scale,
        }
    }

    /// Destination rectangle in the rotated frame centered on the eyes
    pub fn local_rect(&self) -> Rect {
        Rect::new(
            -self.width / 2.0,
            -self.height / SUNGLASSES_LIFT,
            self.width,
            self.height,
        )
    }
}

/// Endpoints of the eye-line bar: centered between the outer landmarks,
/// following their heights
pub fn eye_bar(left_outer: Point, right_outer: Point) -> (Point, Point) {
    let mid_x = (left_outer.x + right_outer.x) / 2.0;
    (
        Point::new(mid_x - EYE_BAR_LENGTH / 2.0, left_outer.y),
        Point::new(mid_x + EYE_BAR_LENGTH / 2.0, right_outer.y),
    )
}

/// Privacy overlay renderer, owning the sunglasses sprite
pub struct PrivacyOverlay {
    sprite: RgbaImage,
}

impl Default for PrivacyOverlay {
    fn default() -> Self {
        Self::new(default_sprite())
    }
}

impl PrivacyOverlay {
    pub fn new(sprite: RgbaImage) -> Self {
        Self { sprite }
    }

    /// Load the sprite from `path`, falling back to the built-in one
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match image::open(path) {
            Ok(image) => {
                tracing::info!(path = %path.display(), "Loaded sunglasses sprite");
                Self::new(image.into_rgba8())
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load sunglasses sprite, using built-in");
                Self::default()
            }
        }
    }

    /// Draw `style` over `subject`. Leaves the canvas transform as it found it.
    pub fn render(
        &self,
        canvas: &mut dyn Canvas,
        subject: &DetectedSubject,
        layout: &SubjectLayout,
        style: PrivacyStyle,
    ) {
        match style {
            PrivacyStyle::EyeLine => {
                if let Some((left, right)) = subject.outer_landmarks(layout) {
                    let (from, to) = eye_bar(left, right);
                    canvas.stroke_line(from, to, EYE_BAR_THICKNESS, BLACK);
                }
            }
            PrivacyStyle::RedBox => {
                if let Some(bounds) = subject.face_bounds(layout) {
                    canvas.fill_rect(bounds, TRANSLUCENT_RED);
                }
            }
            PrivacyStyle::Sunglasses => {
                let Some((left, right)) = subject.eyes(layout) else {
                    return;
                };
                let placement = SpritePlacement::new(
                    left,
                    right,
                    layout.sunglasses_calibration,
                    self.sprite.width(),
                    self.sprite.height(),
                );
                canvas.save();
                canvas.translate(placement.center.x, placement.center.y);
                canvas.rotate(placement.angle);
                canvas.draw_image(&self.sprite, placement.local_rect());
                canvas.restore();
            }
        }
    }
}

/// Procedural sunglasses: two dark lenses joined by a bridge
pub fn default_sprite() -> RgbaImage {
    let mut sprite = RgbaImage::new(SPRITE_WIDTH, SPRITE_HEIGHT);
    let frame = Rgba([10, 10, 10, 255]);
    let lens = Rgba([25, 25, 30, 240]);
    let glint = Rgba([200, 200, 210, 160]);

    let cy = (SPRITE_HEIGHT / 2) as i32;
    let left_cx = (SPRITE_WIDTH / 4) as i32 + 6;
    let right_cx = (SPRITE_WIDTH * 3 / 4) as i32 - 6;

    for cx in [left_cx, right_cx] {
        draw_filled_ellipse_mut(&mut sprite, (cx, cy), 58, 42, frame);
        draw_filled_ellipse_mut(&mut sprite, (cx, cy), 52, 36, lens);
        draw_filled_ellipse_mut(&mut sprite, (cx - 24, cy - 16), 10, 6, glint);
    }

    let bridge = [
        PolyPoint::new(left_cx + 50, cy - 14),
        PolyPoint::new(right_cx - 50, cy - 14),
        PolyPoint::new(right_cx - 50, cy - 6),
        PolyPoint::new(left_cx + 50, cy - 6),
    ];
    draw_polygon_mut(&mut sprite, &bridge, frame);

    sprite
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RasterCanvas;
    use crate::subject::{face_parts, pose_parts, Keypoint, FACE_LAYOUT, POSE_LAYOUT};
    use std::f32::consts::FRAC_PI_2;

    fn pose(eyes: ((f32, f32), (f32, f32)), ears: ((f32, f32), (f32, f32))) -> DetectedSubject {
        let mut keypoints = vec![Keypoint::new(0.0, 0.0, 0.0); pose_parts::COUNT];
        keypoints[pose_parts::NOSE] = Keypoint::new(
            (eyes.0 .0 + eyes.1 .0) / 2.0,
            eyes.0 .1 + 15.0,
            0.9,
        );
        keypoints[pose_parts::LEFT_EYE] = Keypoint::new(eyes.0 .0, eyes.0 .1, 0.9);
        keypoints[pose_parts::RIGHT_EYE] = Keypoint::new(eyes.1 .0, eyes.1 .1, 0.9);
        keypoints[pose_parts::LEFT_EAR] = Keypoint::new(ears.0 .0, ears.0 .1, 0.9);
        keypoints[pose_parts::RIGHT_EAR] = Keypoint::new(ears.1 .0, ears.1 .1, 0.9);
        DetectedSubject::new(0.9, keypoints)
    }

    #[test]
    fn test_eye_angle() {
        assert_eq!(eye_angle(Point::new(0.0, 0.0), Point::new(10.0, 0.0)), 0.0);
        assert!((eye_angle(Point::new(0.0, 0.0), Point::new(0.0, 10.0)) - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_sprite_scale_per_model() {
        let left = Point::new(100.0, 50.0);
        let right = Point::new(210.0, 60.0);
        assert!((sprite_scale(left, right, POSE_LAYOUT.sunglasses_calibration) - 1.0).abs() < 1e-6);
        assert!((sprite_scale(right, left, FACE_LAYOUT.sunglasses_calibration) - 110.0 / 130.0).abs() < 1e-6);
    }

    #[test]
    fn test_doubling_separation_doubles_sprite() {
        let near = SpritePlacement::new(Point::new(0.0, 0.0), Point::new(40.0, 0.0), 110.0, 260, 100);
        let far = SpritePlacement::new(Point::new(0.0, 0.0), Point::new(80.0, 0.0), 110.0, 260, 100);
        assert!((far.width - 2.0 * near.width).abs() < 1e-4);
        assert!((far.height - 2.0 * near.height).abs() < 1e-4);
        assert_eq!(near.center, Point::new(20.0, 0.0));
    }

    #[test]
    fn test_sprite_sits_over_the_eyes() {
        let placement = SpritePlacement::new(Point::new(0.0, 0.0), Point::new(110.0, 0.0), 110.0, 260, 100);
        let rect = placement.local_rect();
        assert_eq!(rect.x, -130.0);
        assert!((rect.y + 100.0 / 2.3).abs() < 1e-4);
        assert!(rect.y < 0.0 && rect.bottom() > 0.0);
    }

    #[test]
    fn test_eye_bar_endpoints() {
        let (from, to) = eye_bar(Point::new(100.0, 40.0), Point::new(160.0, 44.0));
        assert_eq!(from, Point::new(80.0, 40.0));
        assert_eq!(to, Point::new(180.0, 44.0));
    }

    #[test]
    fn test_overlay_target() {
        assert!(!OverlayTarget::Others.applies_to(true));
        assert!(OverlayTarget::Others.applies_to(false));
        assert!(OverlayTarget::All.applies_to(true));
    }

    #[test]
    fn test_sunglasses_restores_transform() {
        let overlay = PrivacyOverlay::default();
        let mut canvas = RasterCanvas::new(320, 240);
        let subject = pose(((120.0, 100.0), (200.0, 110.0)), ((90.0, 105.0), (230.0, 115.0)));
        overlay.render(&mut canvas, &subject, &POSE_LAYOUT, PrivacyStyle::Sunglasses);
        assert_eq!(canvas.save_depth(), 0);
        assert_eq!(canvas.transform(), crate::render::Affine::IDENTITY);
        // lens covers the left eye
        assert!(canvas.image().get_pixel(120, 100).0[3] > 0);
    }

    #[test]
    fn test_eye_line_covers_eye_height() {
        let overlay = PrivacyOverlay::default();
        let mut canvas = RasterCanvas::new(320, 240);
        let subject = pose(((120.0, 100.0), (200.0, 100.0)), ((100.0, 100.0), (220.0, 100.0)));
        overlay.render(&mut canvas, &subject, &POSE_LAYOUT, PrivacyStyle::EyeLine);
        assert_eq!(canvas.image().get_pixel(160, 100), &BLACK);
        assert_eq!(canvas.image().get_pixel(160, 130).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_red_box_uses_face_bounds() {
        let overlay = PrivacyOverlay::default();
        let mut canvas = RasterCanvas::new(200, 200);
        let mut keypoints = vec![Keypoint::new(0.0, 0.0, 0.9); face_parts::COUNT];
        keypoints[face_parts::NOSE] = Keypoint::new(100.0, 100.0, 0.9);
        let subject = DetectedSubject::new(0.9, keypoints).with_bounds(Rect::new(50.0, 50.0, 60.0, 60.0));
        overlay.render(&mut canvas, &subject, &FACE_LAYOUT, PrivacyStyle::RedBox);
        let inside = canvas.image().get_pixel(80, 80);
        assert!(inside.0[0] >= 254);
        assert!(inside.0[3] > 0);
        assert_eq!(canvas.image().get_pixel(150, 150).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_missing_landmarks_draw_nothing() {
        let overlay = PrivacyOverlay::default();
        let mut canvas = RasterCanvas::new(50, 50);
        let subject = DetectedSubject::new(0.9, vec![]);
        for style in PrivacyStyle::ALL {
            overlay.render(&mut canvas, &subject, &POSE_LAYOUT, style);
        }
        assert!(canvas.image().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn test_weak_eyes_and_ears_draw_nothing() {
        let overlay = PrivacyOverlay::default();
        let mut canvas = RasterCanvas::new(320, 240);
        let mut subject = pose(((120.0, 100.0), (200.0, 110.0)), ((90.0, 105.0), (230.0, 115.0)));
        subject.keypoints[pose_parts::LEFT_EYE].score = 0.05;
        subject.keypoints[pose_parts::RIGHT_EAR].score = 0.05;
        overlay.render(&mut canvas, &subject, &POSE_LAYOUT, PrivacyStyle::Sunglasses);
        overlay.render(&mut canvas, &subject, &POSE_LAYOUT, PrivacyStyle::EyeLine);
        assert!(canvas.image().pixels().all(|p| p.0 == [0, 0, 0, 0]));
        assert_eq!(canvas.save_depth(), 0);
    }

    #[test]
    fn test_default_sprite_shape() {
        let sprite = default_sprite();
        assert_eq!(sprite.dimensions(), (SPRITE_WIDTH, SPRITE_HEIGHT));
        assert_eq!(sprite.get_pixel(0, 0).0[3], 0);
        assert!(sprite.get_pixel(SPRITE_WIDTH / 4, SPRITE_HEIGHT / 2).0[3] > 200);
    }
}
