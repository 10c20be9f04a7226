//! Per-frame camera snapshot handed to the photo layer.
use glam::{Mat4, Vec3};

/// Pixel dimensions of a canvas or element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned rectangle in image pixels, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The crop clamped to an image of `width` x `height`; `None` if nothing is left.
    pub fn clamped_to(&self, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (width as f32, height as f32);
        let x0 = self.x.clamp(0.0, w);
        let y0 = self.y.clamp(0.0, h);
        let x1 = (self.x + self.width).clamp(0.0, w);
        let y1 = (self.y + self.height).clamp(0.0, h);
        (x1 > x0 && y1 > y0).then(|| Self::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Immutable description of how the canvas looks at the photo.
///
/// Replaced wholesale whenever anything changes; equality decides whether the
/// layer has to push new transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraMetrics {
    pub canvas_size: Size,
    pub projection: Mat4,
    pub camera: Mat4,
    pub crop: Option<Rect>,
}

impl CameraMetrics {
    /// Letterboxed fit of a `texture_width` x `texture_height` image, or of its
    /// `crop` region, into `canvas_size`.
    ///
    /// World space is texture pixels with y pointing up, which is why the layer
    /// binds textures with `flip_y`.
    pub fn fit(
        canvas_size: Size,
        texture_width: u32,
        texture_height: u32,
        crop: Option<Rect>,
    ) -> Self {
        let crop = crop.and_then(|c| c.clamped_to(texture_width, texture_height));
        let content = crop.unwrap_or(Rect::new(
            0.0,
            0.0,
            texture_width as f32,
            texture_height as f32,
        ));
        let cw = canvas_size.width.max(1) as f32;
        let ch = canvas_size.height.max(1) as f32;
        let scale = (cw / content.width.max(1.0)).min(ch / content.height.max(1.0));

        // content centre in y-up world coordinates
        let cx = content.x + content.width / 2.0;
        let cy = texture_height as f32 - (content.y + content.height / 2.0);

        let camera = Mat4::from_translation(Vec3::new(cw / 2.0, ch / 2.0, 0.0))
            * Mat4::from_scale(Vec3::new(scale, scale, 1.0))
            * Mat4::from_translation(Vec3::new(-cx, -cy, 0.0));
        let projection = Mat4::orthographic_rh(0.0, cw, 0.0, ch, -1.0, 1.0);

        Self {
            canvas_size,
            projection,
            camera,
            crop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn to_ndc(m: &CameraMetrics, x: f32, y: f32) -> (f32, f32) {
        let p = m.projection * m.camera * Vec4::new(x, y, 0.0, 1.0);
        (p.x / p.w, p.y / p.w)
    }

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-4 && (a.1 - b.1).abs() < 1e-4
    }

    #[test]
    fn wide_image_fills_width() {
        let m = CameraMetrics::fit(Size::new(800, 600), 1600, 800, None);
        assert!(close(to_ndc(&m, 0.0, 0.0), (-1.0, -2.0 / 3.0)));
        assert!(close(to_ndc(&m, 1600.0, 800.0), (1.0, 2.0 / 3.0)));
        assert!(close(to_ndc(&m, 800.0, 400.0), (0.0, 0.0)));
    }

    #[test]
    fn crop_region_is_centred() {
        let crop = Rect::new(0.0, 0.0, 100.0, 100.0);
        let m = CameraMetrics::fit(Size::new(100, 100), 200, 200, Some(crop));
        // top-left quadrant of the image sits at y-up world (0..100, 100..200)
        assert!(close(to_ndc(&m, 0.0, 200.0), (-1.0, 1.0)));
        assert!(close(to_ndc(&m, 100.0, 100.0), (1.0, -1.0)));
        assert_eq!(m.crop, Some(crop));
    }

    #[test]
    fn crop_outside_the_image_is_dropped() {
        let crop = Rect::new(500.0, 500.0, 10.0, 10.0);
        let m = CameraMetrics::fit(Size::new(100, 100), 200, 200, Some(crop));
        assert_eq!(m.crop, None);
    }

    #[test]
    fn clamps_partial_crops() {
        let crop = Rect::new(-10.0, 50.0, 100.0, 500.0);
        assert_eq!(
            crop.clamped_to(200, 200),
            Some(Rect::new(0.0, 50.0, 90.0, 150.0))
        );
    }
}
