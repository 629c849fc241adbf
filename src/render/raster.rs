//! CPU canvas backed by an RGBA image

use image::{Pixel, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_line_segment_mut, draw_polygon_mut, Blend,
};
use imageproc::point::Point as PolyPoint;

use super::{Affine, Canvas, Color};
use crate::geometry::{Point, Rect};

/// Strokes thinner than this (device pixels) are drawn as hairlines
const HAIRLINE_WIDTH: f32 = 1.5;

/// Canvas drawing into an owned [`RgbaImage`] with alpha blending
pub struct RasterCanvas {
    target: Blend<RgbaImage>,
    transform: Affine,
    stack: Vec<Affine>,
}

impl RasterCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            target: Blend(RgbaImage::new(width, height)),
            transform: Affine::IDENTITY,
            stack: Vec::new(),
        }
    }

    /// Rendered pixels
    pub fn image(&self) -> &RgbaImage {
        &self.target.0
    }

    /// Resize the surface, discarding its content when the size changes
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.target.0.width() != width || self.target.0.height() != height {
            self.target = Blend(RgbaImage::new(width, height));
        }
    }

    /// Depth of the save stack; zero once every `save` has been restored
    pub fn save_depth(&self) -> usize {
        self.stack.len()
    }

    /// Fill a device-space polygon, skipping shapes that collapse below a pixel
    fn fill_device_polygon(&mut self, corners: &[Point], color: Color) {
        let mut poly: Vec<PolyPoint<i32>> = Vec::with_capacity(corners.len());
        for p in corners {
            let q = PolyPoint::new(p.x.round() as i32, p.y.round() as i32);
            if poly.last() != Some(&q) {
                poly.push(q);
            }
        }
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }
        if poly.len() < 3 {
            return;
        }
        draw_polygon_mut(&mut self.target, &poly, color);
    }
}

/// Bilinear sample with clamped edges, straight alpha
fn sample_bilinear(image: &RgbaImage, u: f32, v: f32) -> Rgba<u8> {
    let max_x = image.width() as i64 - 1;
    let max_y = image.height() as i64 - 1;
    let fx = u - 0.5;
    let fy = v - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let clamp_x = |x: i64| x.clamp(0, max_x) as u32;
    let clamp_y = |y: i64| y.clamp(0, max_y) as u32;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let p00 = image.get_pixel(clamp_x(x0), clamp_y(y0)).0;
    let p10 = image.get_pixel(clamp_x(x0 + 1), clamp_y(y0)).0;
    let p01 = image.get_pixel(clamp_x(x0), clamp_y(y0 + 1)).0;
    let p11 = image.get_pixel(clamp_x(x0 + 1), clamp_y(y0 + 1)).0;

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - tx) + p10[c] as f32 * tx;
        let bottom = p01[c] as f32 * (1.0 - tx) + p11[c] as f32 * tx;
        out[c] = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

impl Canvas for RasterCanvas {
    fn width(&self) -> u32 {
        self.target.0.width()
    }

    fn height(&self) -> u32 {
        self.target.0.height()
    }

    fn save(&mut self) {
        self.stack.push(self.transform);
    }

    fn restore(&mut self) {
        if let Some(transform) = self.stack.pop() {
            self.transform = transform;
        }
    }

    fn transform(&self) -> Affine {
        self.transform
    }

    fn translate(&mut self, dx: f32, dy: f32) {
        self.transform = self.transform.compose(&Affine::translation(dx, dy));
    }

    fn rotate(&mut self, angle: f32) {
        self.transform = self.transform.compose(&Affine::rotation(angle));
    }

    fn scale(&mut self, sx: f32, sy: f32) {
        self.transform = self.transform.compose(&Affine::scaling(sx, sy));
    }

    fn clear(&mut self, color: Color) {
        for pixel in self.target.0.pixels_mut() {
            *pixel = color;
        }
    }

    fn draw_image(&mut self, image: &RgbaImage, dest: Rect) {
        if image.width() == 0 || image.height() == 0 || dest.width <= 0.0 || dest.height <= 0.0 {
            return;
        }

        // image pixel space -> device space
        let to_device = self
            .transform
            .compose(&Affine::translation(dest.x, dest.y))
            .compose(&Affine::scaling(
                dest.width / image.width() as f32,
                dest.height / image.height() as f32,
            ));
        let Some(to_image) = to_device.inverse() else {
            return;
        };

        let (iw, ih) = (image.width() as f32, image.height() as f32);
        let corners = [
            to_device.apply(Point::new(0.0, 0.0)),
            to_device.apply(Point::new(iw, 0.0)),
            to_device.apply(Point::new(iw, ih)),
            to_device.apply(Point::new(0.0, ih)),
        ];
        let Some(bounds) = Rect::bounding(corners) else {
            return;
        };

        let canvas_w = self.width() as i64;
        let canvas_h = self.height() as i64;
        let x_start = (bounds.x.floor() as i64).clamp(0, canvas_w);
        let x_end = (bounds.right().ceil() as i64).clamp(0, canvas_w);
        let y_start = (bounds.y.floor() as i64).clamp(0, canvas_h);
        let y_end = (bounds.bottom().ceil() as i64).clamp(0, canvas_h);

        let target = &mut self.target.0;
        for y in y_start..y_end {
            for x in x_start..x_end {
                let src = to_image.apply(Point::new(x as f32 + 0.5, y as f32 + 0.5));
                if src.x < 0.0 || src.y < 0.0 || src.x >= iw || src.y >= ih {
                    continue;
                }
                let color = sample_bilinear(image, src.x, src.y);
                match color.0[3] {
                    0 => {}
                    255 => target.put_pixel(x as u32, y as u32, color),
                    _ => target.get_pixel_mut(x as u32, y as u32).blend(&color),
                }
            }
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return;
        }
        let corners = [
            self.transform.apply(Point::new(rect.x, rect.y)),
            self.transform.apply(Point::new(rect.right(), rect.y)),
            self.transform.apply(Point::new(rect.right(), rect.bottom())),
            self.transform.apply(Point::new(rect.x, rect.bottom())),
        ];
        self.fill_device_polygon(&corners, color);
    }

    fn stroke_line(&mut self, from: Point, to: Point, width: f32, color: Color) {
        let a = self.transform.apply(from);
        let b = self.transform.apply(to);
        let device_width = width * self.transform.linear_scale();

        if device_width <= HAIRLINE_WIDTH {
            draw_line_segment_mut(&mut self.target, (a.x, a.y), (b.x, b.y), color);
            return;
        }

        let length = a.distance(b);
        if length <= f32::EPSILON {
            return;
        }
        let half = device_width * 0.5;
        let nx = -(b.y - a.y) / length * half;
        let ny = (b.x - a.x) / length * half;
        let corners = [
            Point::new(a.x + nx, a.y + ny),
            Point::new(b.x + nx, b.y + ny),
            Point::new(b.x - nx, b.y - ny),
            Point::new(a.x - nx, a.y - ny),
        ];
        self.fill_device_polygon(&corners, color);
    }

    fn fill_circle(&mut self, center: Point, radius: f32, color: Color) {
        let c = self.transform.apply(center);
        let r = (radius * self.transform.linear_scale()).round() as i32;
        if r <= 0 {
            return;
        }
        draw_filled_circle_mut(&mut self.target, (c.x.round() as i32, c.y.round() as i32), r, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::BLACK;

    const WHITE: Color = Rgba([255, 255, 255, 255]);

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 0, 255]))
    }

    #[test]
    fn test_save_restore() {
        let mut canvas = RasterCanvas::new(10, 10);
        canvas.save();
        canvas.translate(5.0, 5.0);
        canvas.rotate(1.0);
        assert_ne!(canvas.transform(), Affine::IDENTITY);
        canvas.restore();
        assert_eq!(canvas.transform(), Affine::IDENTITY);
        assert_eq!(canvas.save_depth(), 0);
        // unmatched restore is a no-op
        canvas.restore();
        assert_eq!(canvas.transform(), Affine::IDENTITY);
    }

    #[test]
    fn test_draw_image_identity() {
        let source = gradient(8, 4);
        let mut canvas = RasterCanvas::new(8, 4);
        canvas.draw_image(&source, Rect::new(0.0, 0.0, 8.0, 4.0));
        assert_eq!(canvas.image(), &source);
    }

    #[test]
    fn test_draw_image_mirrored() {
        let source = gradient(8, 4);
        let mut canvas = RasterCanvas::new(8, 4);
        canvas.save();
        canvas.scale(-1.0, 1.0);
        canvas.translate(-8.0, 0.0);
        canvas.draw_image(&source, Rect::new(0.0, 0.0, 8.0, 4.0));
        canvas.restore();
        for y in 0..4 {
            for x in 0..8 {
                assert_eq!(canvas.image().get_pixel(x, y), source.get_pixel(7 - x, y));
            }
        }
    }

    #[test]
    fn test_transparent_pixels_are_skipped() {
        let mut canvas = RasterCanvas::new(4, 4);
        canvas.clear(WHITE);
        let sprite = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        canvas.draw_image(&sprite, Rect::new(0.0, 0.0, 4.0, 4.0));
        assert!(canvas.image().pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn test_fill_rect_blends() {
        let mut canvas = RasterCanvas::new(20, 20);
        canvas.clear(WHITE);
        canvas.fill_rect(Rect::new(5.0, 5.0, 10.0, 10.0), Rgba([255, 0, 0, 128]));
        let inside = canvas.image().get_pixel(10, 10);
        assert!(inside.0[0] >= 254);
        assert!(inside.0[1] > 100 && inside.0[1] < 160);
        assert_eq!(canvas.image().get_pixel(1, 1), &WHITE);
    }

    #[test]
    fn test_thick_line_covers_its_width() {
        let mut canvas = RasterCanvas::new(40, 40);
        canvas.clear(WHITE);
        canvas.stroke_line(Point::new(5.0, 20.0), Point::new(35.0, 20.0), 10.0, BLACK);
        assert_eq!(canvas.image().get_pixel(20, 17), &BLACK);
        assert_eq!(canvas.image().get_pixel(20, 23), &BLACK);
        assert_eq!(canvas.image().get_pixel(20, 30), &WHITE);
    }

    #[test]
    fn test_degenerate_shapes_are_ignored() {
        let mut canvas = RasterCanvas::new(10, 10);
        canvas.fill_rect(Rect::new(1.0, 1.0, 0.0, 5.0), BLACK);
        canvas.stroke_line(Point::new(3.0, 3.0), Point::new(3.0, 3.0), 6.0, BLACK);
        canvas.fill_circle(Point::new(5.0, 5.0), 0.2, BLACK);
        canvas.draw_image(&RgbaImage::new(0, 0), Rect::new(0.0, 0.0, 5.0, 5.0));
        assert!(canvas.image().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }
}
