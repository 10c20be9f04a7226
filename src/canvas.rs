//! The narrow surface the photo layer drives.
//!
//! Implementations own the GPU surface and draw calls; the layer only pushes
//! state and asks whether that state is renderable.
use glam::Mat4;

use crate::camera::{Rect, Size};
use crate::texture_cache::Texture;

pub trait Canvas {
    /// Backend texture handle, shared with the uploader feeding the cache.
    type Handle;
    type Element: CanvasElement;

    /// Binds `texture` as the photo to draw, or unbinds with `None`.
    ///
    /// The texture is owned by the cache; implementations may keep backend
    /// views of it but must drop them when unbound.
    fn set_base_texture(&mut self, texture: Option<&Texture<Self::Handle>>, flip_y: bool);

    /// Restricts drawing to a region of the image (image pixels, top-left origin).
    fn set_clip_rect(&mut self, rect: Option<Rect>);

    fn set_size(&mut self, size: Size);

    fn set_projection_matrix(&mut self, matrix: Mat4);

    fn set_camera_matrix(&mut self, matrix: Mat4);

    /// Redraws with the current state.
    fn update(&mut self);

    /// Whether a texture, a size and both matrices are set.
    fn is_valid(&self) -> bool;

    fn element_mut(&mut self) -> &mut Self::Element;
}

/// The visual element hosting a canvas.
pub trait CanvasElement {
    fn show(&mut self);

    fn hide(&mut self);

    fn is_visible(&self) -> bool;

    /// Layout size of the element; not a GPU operation.
    fn set_display_size(&mut self, size: Size);

    /// Removes the element from its host. Called once on teardown.
    fn detach(&mut self);
}
