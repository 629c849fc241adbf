//! 2D drawing surface
//!
//! The overlay renderers draw through the [`Canvas`] trait, a small subset
//! of an HTML-canvas style API: a current transform with a save/restore
//! stack, and a handful of fill/stroke/image primitives. [`RasterCanvas`]
//! implements it on top of an RGBA image.

pub mod privacy;
pub mod raster;
pub mod skeleton;

use image::{Rgba, RgbaImage};

use crate::geometry::{Point, Rect};

pub use privacy::{OverlayTarget, PrivacyOverlay, PrivacyStyle};
pub use raster::RasterCanvas;

/// RGBA color, straight alpha
pub type Color = Rgba<u8>;

pub const BLACK: Color = Rgba([0, 0, 0, 255]);
pub const TRANSLUCENT_RED: Color = Rgba([255, 0, 0, 128]);

/// 2D affine transform, laid out like a canvas matrix:
///
/// ```text
/// x' = a * x + c * y + e
/// y' = b * x + d * y + f
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Affine = Affine {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            e: dx,
            f: dy,
            ..Self::IDENTITY
        }
    }

    pub fn scaling(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn rotation(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    /// `self` applied after `inner`: `(self * inner)(p) == self(inner(p))`
    pub fn compose(&self, inner: &Affine) -> Affine {
        Affine {
            a: self.a * inner.a + self.c * inner.b,
            b: self.b * inner.a + self.d * inner.b,
            c: self.a * inner.c + self.c * inner.d,
            d: self.b * inner.c + self.d * inner.d,
            e: self.a * inner.e + self.c * inner.f + self.e,
            f: self.b * inner.e + self.d * inner.f + self.f,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    pub fn determinant(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    /// Average linear scale factor, used for stroke widths and radii
    pub fn linear_scale(&self) -> f32 {
        self.determinant().abs().sqrt()
    }

    pub fn inverse(&self) -> Option<Affine> {
        let det = self.determinant();
        if det.abs() < f32::EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        Some(Affine {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }
}

/// Drawing surface used by the overlay renderers.
///
/// Coordinates passed to drawing calls are in the current user space,
/// i.e. they go through the current transform.
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Push the current transform
    fn save(&mut self);
    /// Pop the transform pushed by the matching `save`
    fn restore(&mut self);
    /// Current transform
    fn transform(&self) -> Affine;

    fn translate(&mut self, dx: f32, dy: f32);
    fn rotate(&mut self, angle: f32);
    fn scale(&mut self, sx: f32, sy: f32);

    /// Fill the whole surface, ignoring the transform
    fn clear(&mut self, color: Color);
    /// Draw `image` stretched into `dest`
    fn draw_image(&mut self, image: &RgbaImage, dest: Rect);
    fn fill_rect(&mut self, rect: Rect, color: Color);
    fn stroke_line(&mut self, from: Point, to: Point, width: f32, color: Color);
    fn fill_circle(&mut self, center: Point, radius: f32, color: Color);

    fn stroke_rect(&mut self, rect: Rect, width: f32, color: Color) {
        let tl = Point::new(rect.x, rect.y);
        let tr = Point::new(rect.right(), rect.y);
        let br = Point::new(rect.right(), rect.bottom());
        let bl = Point::new(rect.x, rect.bottom());
        self.stroke_line(tl, tr, width, color);
        self.stroke_line(tr, br, width, color);
        self.stroke_line(br, bl, width, color);
        self.stroke_line(bl, tl, width, color);
    }
}
