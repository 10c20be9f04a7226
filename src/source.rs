//! Where image bytes come from and how they become RGBA8 pixels.
//!
//! Decoding runs on the blocking pool; everything here is synchronous.
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, RwLock};

use fast_image_resize as fir;
use image::{ImageError, RgbaImage};
use tracing::debug;

use crate::error::TextureError;

/// Stable identifier of a decodable image, usually its file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey(Arc<str>);

impl ImageKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&*self.0)
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImageKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&Path> for ImageKey {
    fn from(value: &Path) -> Self {
        Self::new(value.to_string_lossy())
    }
}

/// Supplies encoded image bytes for a key.
pub trait ImageSource: Send + Sync + 'static {
    fn read(&self, key: &ImageKey) -> Result<Vec<u8>, TextureError>;
}

/// Reads keys as filesystem paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSource;

impl ImageSource for FileSource {
    fn read(&self, key: &ImageKey) -> Result<Vec<u8>, TextureError> {
        std::fs::read(key.as_path()).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => TextureError::NotFound(key.to_string()),
            _ => TextureError::DecodeFailure(format!("{key}: {err}")),
        })
    }
}

/// In-process byte store, for hosts that already hold the encoded data.
#[derive(Debug, Default)]
pub struct MemorySource {
    images: RwLock<HashMap<ImageKey, Arc<[u8]>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<ImageKey>, bytes: impl Into<Arc<[u8]>>) {
        let mut images = self.images.write().unwrap_or_else(|e| e.into_inner());
        images.insert(key.into(), bytes.into());
    }

    pub fn remove(&self, key: &ImageKey) -> bool {
        let mut images = self.images.write().unwrap_or_else(|e| e.into_inner());
        images.remove(key).is_some()
    }
}

impl ImageSource for MemorySource {
    fn read(&self, key: &ImageKey) -> Result<Vec<u8>, TextureError> {
        let images = self.images.read().unwrap_or_else(|e| e.into_inner());
        images
            .get(key)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| TextureError::NotFound(key.to_string()))
    }
}

/// RGBA8 pixels ready for GPU upload.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Reads `key` from `source` and decodes it.
pub fn load(
    source: &dyn ImageSource,
    key: &ImageKey,
    max_dimension: Option<u32>,
) -> Result<DecodedImage, TextureError> {
    let bytes = source.read(key)?;
    let decoded = decode(&bytes, max_dimension)?;
    debug!(
        path = %key,
        width = decoded.width,
        height = decoded.height,
        "decoded image"
    );
    Ok(decoded)
}

/// Decodes to RGBA8, applies EXIF orientation, and downscales so neither side
/// exceeds `max_dimension`.
pub fn decode(bytes: &[u8], max_dimension: Option<u32>) -> Result<DecodedImage, TextureError> {
    let img = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| TextureError::DecodeFailure(err.to_string()))?
        .decode()
        .map_err(classify)?;
    let mut img = img.to_rgba8();

    let orientation = read_orientation(bytes).unwrap_or(1);
    img = apply_orientation(img, orientation);

    if let Some(limit) = max_dimension {
        if let Some((w, h)) = fit_within(img.width(), img.height(), limit) {
            img = resize_rgba(&img, w, h)?;
        }
    }

    let (width, height) = img.dimensions();
    Ok(DecodedImage {
        width,
        height,
        pixels: img.into_raw(),
    })
}

fn classify(err: ImageError) -> TextureError {
    match err {
        ImageError::Unsupported(inner) => TextureError::UnsupportedFormat(inner.to_string()),
        other => TextureError::DecodeFailure(other.to_string()),
    }
}

fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!("exif orientation {}", o);
    Some(o)
}

// EXIF orientations 2..=8; anything else is left as decoded.
fn apply_orientation(img: RgbaImage, orientation: u16) -> RgbaImage {
    use image::imageops::{flip_horizontal, flip_vertical, rotate90, rotate180, rotate270};
    match orientation {
        2 => flip_horizontal(&img),
        3 => rotate180(&img),
        4 => flip_vertical(&img),
        5 => flip_horizontal(&rotate90(&img)),
        6 => rotate90(&img),
        7 => flip_horizontal(&rotate270(&img)),
        8 => rotate270(&img),
        _ => img,
    }
}

/// Target size that fits `limit` on both axes, or `None` if already within.
fn fit_within(width: u32, height: u32, limit: u32) -> Option<(u32, u32)> {
    let limit = limit.max(1);
    if width <= limit && height <= limit {
        return None;
    }
    let scale = f64::from(limit) / f64::from(width.max(height));
    let w = ((f64::from(width) * scale).round() as u32).clamp(1, limit);
    let h = ((f64::from(height) * scale).round() as u32).clamp(1, limit);
    Some((w, h))
}

fn resize_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage, TextureError> {
    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|err| TextureError::DecodeFailure(format!("resize source: {err}")))?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| TextureError::DecodeFailure(format!("resize: {err}")))?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| TextureError::DecodeFailure("resized buffer has wrong length".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    #[test]
    fn applies_orientation_six() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        let img = decode(&bytes, None).unwrap();
        assert_eq!((img.width, img.height), (1, 2));
        assert_eq!(img.pixels.len(), 8);
    }

    #[test]
    fn downscales_to_max_dimension() {
        let img = decode(&png_bytes(40, 10), Some(20)).unwrap();
        assert_eq!((img.width, img.height), (20, 5));
        assert_eq!(img.pixels.len(), 20 * 5 * 4);
    }

    #[test]
    fn leaves_small_images_alone() {
        let img = decode(&png_bytes(4, 3), Some(20)).unwrap();
        assert_eq!((img.width, img.height), (4, 3));
    }

    #[test]
    fn unknown_bytes_are_unsupported() {
        let err = decode(b"definitely not an image", None).unwrap_err();
        assert_eq!(err.kind(), "unsupported-format");
    }

    #[test]
    fn truncated_png_is_a_decode_failure() {
        let mut bytes = png_bytes(8, 8);
        bytes.truncate(40);
        let err = decode(&bytes, None).unwrap_err();
        assert_eq!(err.kind(), "decode-failure");
    }

    #[test]
    fn memory_source_reports_missing_keys() {
        let source = MemorySource::new();
        source.insert("/a.png", png_bytes(1, 1));
        assert!(source.read(&ImageKey::from("/a.png")).is_ok());
        let err = source.read(&ImageKey::from("/b.png")).unwrap_err();
        assert_eq!(err, TextureError::NotFound("/b.png".into()));
    }

    #[test]
    fn file_source_maps_missing_files_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let key = ImageKey::from(dir.path().join("missing.jpg").as_path());
        let err = FileSource.read(&key).unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[test]
    fn fit_within_keeps_aspect() {
        assert_eq!(fit_within(4000, 3000, 1000), Some((1000, 750)));
        assert_eq!(fit_within(100, 5000, 1000), Some((20, 1000)));
        assert_eq!(fit_within(800, 600, 1000), None);
    }
}
